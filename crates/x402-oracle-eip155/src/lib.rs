#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EVM support for the x402 calldata-nonce payment protocol.
//!
//! The protocol needs very little from a chain: look a transaction and its receipt up by
//! hash, read balances, and (on the paying side) send one ERC-20 `transfer` with a few
//! extra bytes glued to its calldata. This crate expresses those needs as two narrow
//! capabilities, [`ChainReader`] and [`TransferSender`], and backs them with alloy.
//!
//! # Feature Flags
//!
//! - `client` - Signing provider that implements [`TransferSender`]
//! - `telemetry` - Tracing spans around RPC calls
//!
//! [`ChainReader`]: chain::ChainReader
//! [`TransferSender`]: chain::TransferSender

pub mod chain;

pub use chain::*;
