//! Chain capabilities, the views they return, and their alloy-backed implementation.

pub mod calldata;
pub mod config;
pub mod erc20;
pub mod provider;

pub use calldata::*;
pub use config::*;
pub use provider::*;

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_provider::PendingTransactionError;
use alloy_transport::TransportError;
use std::time::Duration;

/// A transaction as far as payment verification cares about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTransaction {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract creations.
    pub to: Option<Address>,
    pub input: Bytes,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedReceipt {
    pub transaction_hash: B256,
    pub success: bool,
    pub logs: Vec<ObservedLog>,
}

/// A single event log from a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedLog {
    /// Contract that emitted the event.
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainReadError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Contract(#[from] alloy_contract::Error),
    #[error("Chain read timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ChainWriteError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    PendingTransaction(PendingTransactionError),
    #[error("Transaction {0} not confirmed within {1:?}")]
    Timeout(B256, Duration),
    #[error("Transaction {0} reverted")]
    Reverted(B256),
}

/// Read-only view of an EVM chain.
///
/// Every method is a single JSON-RPC round trip (or `eth_call`). `Ok(None)` means the
/// node does not know the transaction, which is different from failing to ask.
#[async_trait::async_trait]
pub trait ChainReader: Send + Sync {
    async fn get_transaction(&self, hash: B256)
    -> Result<Option<ObservedTransaction>, ChainReadError>;

    async fn get_receipt(&self, hash: B256) -> Result<Option<ObservedReceipt>, ChainReadError>;

    async fn get_token_balance(&self, token: Address, account: Address)
    -> Result<U256, ChainReadError>;

    async fn get_native_balance(&self, account: Address) -> Result<U256, ChainReadError>;

    async fn get_token_decimals(&self, token: Address) -> Result<u8, ChainReadError>;
}

/// An ERC-20 transfer with trailing calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Token contract the transaction is sent to.
    pub token: Address,
    /// Recipient of the tokens.
    pub to: Address,
    pub amount: U256,
    /// Bytes appended after the ABI-encoded `transfer` call.
    pub extra_data: Bytes,
    pub gas_limit: u64,
}

/// The paying side's write access to the chain.
#[async_trait::async_trait]
pub trait TransferSender: Send + Sync {
    /// Account that signs and pays for transfers.
    fn payer(&self) -> Address;

    /// Signs and broadcasts the transfer, returning its hash without waiting for inclusion.
    async fn submit_transfer(&self, request: TransferRequest) -> Result<B256, ChainWriteError>;

    /// Waits until `hash` is mined. A reverted transaction is an error.
    async fn wait_for_confirmation(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> Result<ObservedReceipt, ChainWriteError>;
}
