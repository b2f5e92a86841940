//! Buyer side of the x402 calldata-nonce flow, on top of `reqwest`.
//!
//! [`PaymentSubmitter::fetch`] requests a URL and, when the server answers `402 Payment Required`,
//! pays the challenge with an ERC-20 transfer carrying the nonce in its calldata, waits for the
//! transfer to be mined, and retries with the proof headers.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use x402_oracle_eip155::{Eip155WalletProvider, EvmPrivateKey};
//! use x402_oracle_reqwest::{PaymentSubmitter, SubmitterConfig};
//!
//! let wallet = Arc::new(Eip155WalletProvider::connect(&rpc, &key, false)?);
//! let submitter = PaymentSubmitter::new(wallet.clone(), wallet, SubmitterConfig::new(token));
//! let paid = submitter.fetch("http://localhost:3000/api/price/match_final_001").await?;
//! println!("{}", paid.body);
//! ```

mod client;

pub use client::*;
