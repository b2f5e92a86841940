#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the x402 calldata-nonce payment protocol.
//!
//! A client asks for a protected resource, the server answers with `402 Payment Required`
//! and a challenge carrying a one-time correlation token (the "nonce"). The client pays with
//! an ordinary ERC-20 `transfer` whose calldata has the token's bytes appended, then retries
//! the request with the transaction hash and the nonce. Once the server has inspected the
//! transaction on-chain it hands out a signed receipt that unlocks the same resource for a
//! while without further chain reads.
//!
//! This crate holds only the pieces both sides agree on. It does not talk to a chain
//! or open sockets.
//!
//! # Modules
//!
//! - [`proto`] - Header names and JSON bodies exchanged over HTTP
//! - [`evm`] - Checksummed addresses, decimal `U256` serde, token assets
//! - [`config`] - RPC endpoint config and `$ENV` resolution for config values
//! - [`timestamp`] - Unix timestamps used for receipt expiry and nonce pruning
//! - [`util`] - Helper types (base64url, money amounts)

pub mod config;
pub mod evm;
pub mod proto;
pub mod timestamp;
pub mod util;
