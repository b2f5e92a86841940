//! ERC-20 `transfer` calldata carrying a correlation token, and `Transfer` log decoding.
//!
//! Token contracts decode `transfer(address,uint256)` from the first 68 bytes of calldata
//! and ignore anything after. Bytes appended there cost a little gas, change nothing about
//! the transfer, and stay readable forever in the transaction input.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{SolCall, SolEvent};

use crate::chain::ObservedLog;
use crate::chain::erc20::IERC20;

/// Selector plus two ABI words.
pub const TRANSFER_CALL_LEN: usize = 4 + 32 + 32;

/// Encodes `transfer(to, amount)` followed by `extra`.
pub fn transfer_calldata(to: Address, amount: U256, extra: &[u8]) -> Bytes {
    let mut data = IERC20::transferCall { to, amount }.abi_encode();
    data.extend_from_slice(extra);
    Bytes::from(data)
}

/// Bytes after the `transfer` arguments, or `None` if the input is too short to be a transfer.
pub fn trailing_calldata(input: &[u8]) -> Option<&[u8]> {
    input.get(TRANSFER_CALL_LEN..)
}

/// Whether `needle` occurs anywhere in the trailing calldata of `input`.
pub fn trailing_calldata_contains(input: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return false;
    }
    match trailing_calldata(input) {
        Some(tail) => tail.windows(needle.len()).any(|w| w == needle),
        None => false,
    }
}

/// A decoded `Transfer(address,address,uint256)` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLog {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

impl TransferLog {
    /// Decodes `log` if it is a standard ERC-20 `Transfer` event.
    ///
    /// Both addresses are indexed and arrive as left-padded topics; the value is the
    /// first word of the data.
    pub fn decode(log: &ObservedLog) -> Option<Self> {
        let [signature, from, to] = log.topics.as_slice() else {
            return None;
        };
        if *signature != IERC20::Transfer::SIGNATURE_HASH {
            return None;
        }
        let word = log.data.get(..32)?;
        Some(Self {
            token: log.address,
            from: Address::from_word(*from),
            to: Address::from_word(*to),
            value: U256::from_be_slice(word),
        })
    }
}

/// All `Transfer` events in `logs` emitted by `token`.
pub fn token_transfers<'a>(
    logs: &'a [ObservedLog],
    token: Address,
) -> impl Iterator<Item = TransferLog> + 'a {
    logs.iter()
        .filter(move |log| log.address == token)
        .filter_map(TransferLog::decode)
}
