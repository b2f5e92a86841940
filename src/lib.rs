//! A price oracle that charges per request through the x402 flow.
//!
//! A client without credentials receives `402 Payment Required` together with a one-time
//! correlation token (a nonce). It pays by sending an ERC-20 `transfer` whose calldata has the
//! token bytes appended, then retries with the transaction hash and the token. The server checks
//! the transaction on-chain and, if it paid enough to the right address, serves the resource and
//! hands out a short-lived signed receipt. Presenting that receipt later skips the chain entirely.
//!
//! # Modules
//!
//! - [`config`] - JSON configuration with environment overrides.
//! - [`nonce`] - Issued correlation tokens and their one-shot consumption.
//! - [`receipt`] - HS256 access receipts.
//! - [`verifier`] - On-chain payment verification against fixed terms.
//! - [`gateway`] - The per-request decision: receipt, proof or challenge.
//! - [`oracle`] - The protected price quotes.
//! - [`handlers`] - Axum routes.
//! - [`util`] - Signal handling and telemetry.

pub mod config;
pub mod gateway;
pub mod handlers;
pub mod nonce;
pub mod oracle;
pub mod receipt;
pub mod util;
pub mod verifier;
