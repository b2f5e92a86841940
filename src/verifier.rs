//! On-chain proof that a given transaction paid for a given challenge.

use alloy_primitives::{Address, B256, U256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use x402_oracle_eip155::chain::{
    ChainReadError, ChainReader, TransferLog, token_transfers, trailing_calldata_contains,
};
use x402_oracle_types::proto::CorrelationToken;

/// What a settling transfer has to look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentTerms {
    /// ERC-20 contract the payment must be made in.
    pub asset: Address,
    pub pay_to: Address,
    /// Smallest token units.
    pub amount: U256,
}

/// A transaction that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub transaction: B256,
    pub payer: Address,
    pub amount: U256,
}

/// The first check a transaction failed.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Transaction {0} not found")]
    TransactionNotFound(B256),
    #[error("Transaction {0} did not succeed")]
    TransactionReverted(B256),
    #[error("Chain read failed: {0}")]
    ChainRead(#[from] ChainReadError),
    #[error("Transaction was sent to {actual:?}, expected token contract {expected}")]
    WrongContract {
        expected: Address,
        actual: Option<Address>,
    },
    #[error("Nonce {0} is not embedded in the transaction calldata")]
    CorrelationTokenMissing(CorrelationToken),
    #[error("No Transfer event emitted by {0}")]
    TransferEventMissing(Address),
    #[error("Transfer does not pay {0}")]
    WrongRecipient(Address),
    #[error("Transferred {paid}, required {required}")]
    InsufficientAmount { paid: U256, required: U256 },
}

/// Checks transactions against fixed [`PaymentTerms`].
///
/// Fails closed: anything that cannot be established, including a chain read that errors
/// or times out, is a failed verification.
#[derive(Clone)]
pub struct PaymentVerifier {
    chain: Arc<dyn ChainReader>,
    terms: PaymentTerms,
    read_timeout: Duration,
}

impl std::fmt::Debug for PaymentVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentVerifier")
            .field("terms", &self.terms)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl PaymentVerifier {
    pub fn new(chain: Arc<dyn ChainReader>, terms: PaymentTerms, read_timeout: Duration) -> Self {
        Self {
            chain,
            terms,
            read_timeout,
        }
    }

    pub fn terms(&self) -> &PaymentTerms {
        &self.terms
    }

    pub async fn is_settled(&self, transaction: B256, token: &CorrelationToken) -> bool {
        self.verify(transaction, token).await.is_ok()
    }

    #[instrument(skip_all, err, fields(tx = %transaction, nonce = %token))]
    pub async fn verify(
        &self,
        transaction: B256,
        token: &CorrelationToken,
    ) -> Result<Settlement, SettlementError> {
        let (tx, receipt) = tokio::try_join!(
            self.bounded(self.chain.get_transaction(transaction)),
            self.bounded(self.chain.get_receipt(transaction)),
        )?;
        let tx = tx.ok_or(SettlementError::TransactionNotFound(transaction))?;
        let receipt = receipt.ok_or(SettlementError::TransactionNotFound(transaction))?;
        if !receipt.success {
            return Err(SettlementError::TransactionReverted(transaction));
        }

        if tx.to != Some(self.terms.asset) {
            return Err(SettlementError::WrongContract {
                expected: self.terms.asset,
                actual: tx.to,
            });
        }

        if !trailing_calldata_contains(&tx.input, token.as_bytes()) {
            return Err(SettlementError::CorrelationTokenMissing(token.clone()));
        }

        let transfers: Vec<TransferLog> =
            token_transfers(&receipt.logs, self.terms.asset).collect();
        if transfers.is_empty() {
            return Err(SettlementError::TransferEventMissing(self.terms.asset));
        }
        let to_payee: Vec<&TransferLog> = transfers
            .iter()
            .filter(|t| t.to == self.terms.pay_to)
            .collect();
        let Some(first) = to_payee.first() else {
            return Err(SettlementError::WrongRecipient(self.terms.pay_to));
        };
        let paid = to_payee
            .iter()
            .fold(U256::ZERO, |acc, t| acc.saturating_add(t.value));
        if paid < self.terms.amount {
            return Err(SettlementError::InsufficientAmount {
                paid,
                required: self.terms.amount,
            });
        }

        Ok(Settlement {
            transaction,
            payer: first.from,
            amount: paid,
        })
    }

    async fn bounded<T>(
        &self,
        read: impl Future<Output = Result<T, ChainReadError>>,
    ) -> Result<T, ChainReadError> {
        tokio::time::timeout(self.read_timeout, read)
            .await
            .map_err(|_| ChainReadError::Timeout(self.read_timeout))?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy_primitives::Bytes;
    use alloy_sol_types::SolEvent;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use x402_oracle_eip155::chain::erc20::IERC20;
    use x402_oracle_eip155::chain::{
        ObservedLog, ObservedReceipt, ObservedTransaction, transfer_calldata,
    };

    pub const ASSET: Address = Address::new([0xe4; 20]);
    pub const PAY_TO: Address = Address::new([0x1e; 20]);
    pub const PAYER: Address = Address::new([0xaa; 20]);

    /// Chain double serving canned transactions and counting reads.
    #[derive(Default)]
    pub struct MockChain {
        pub transactions: Mutex<HashMap<B256, ObservedTransaction>>,
        pub receipts: Mutex<HashMap<B256, ObservedReceipt>>,
        pub reads: AtomicUsize,
        pub fail: bool,
        pub delay: Option<Duration>,
    }

    impl MockChain {
        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        pub fn insert(&self, tx: ObservedTransaction, receipt: ObservedReceipt) {
            self.transactions.lock().unwrap().insert(tx.hash, tx);
            self.receipts
                .lock()
                .unwrap()
                .insert(receipt.transaction_hash, receipt);
        }

        async fn read(&self) -> Result<(), ChainReadError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(ChainReadError::Timeout(Duration::ZERO));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl ChainReader for MockChain {
        async fn get_transaction(
            &self,
            hash: B256,
        ) -> Result<Option<ObservedTransaction>, ChainReadError> {
            self.read().await?;
            Ok(self.transactions.lock().unwrap().get(&hash).cloned())
        }

        async fn get_receipt(&self, hash: B256) -> Result<Option<ObservedReceipt>, ChainReadError> {
            self.read().await?;
            Ok(self.receipts.lock().unwrap().get(&hash).cloned())
        }

        async fn get_token_balance(
            &self,
            _token: Address,
            _account: Address,
        ) -> Result<U256, ChainReadError> {
            self.read().await?;
            Ok(U256::ZERO)
        }

        async fn get_native_balance(&self, _account: Address) -> Result<U256, ChainReadError> {
            self.read().await?;
            Ok(U256::ZERO)
        }

        async fn get_token_decimals(&self, _token: Address) -> Result<u8, ChainReadError> {
            self.read().await?;
            Ok(18)
        }
    }

    pub fn transfer_event(token: Address, from: Address, to: Address, value: U256) -> ObservedLog {
        ObservedLog {
            address: token,
            topics: vec![
                IERC20::Transfer::SIGNATURE_HASH,
                from.into_word(),
                to.into_word(),
            ],
            data: Bytes::from(value.to_be_bytes::<32>().to_vec()),
        }
    }

    /// A successful `amount` transfer to `PAY_TO` carrying `nonce` in its calldata.
    pub fn paying_transaction(
        hash: B256,
        nonce: &str,
        amount: U256,
    ) -> (ObservedTransaction, ObservedReceipt) {
        let tx = ObservedTransaction {
            hash,
            from: PAYER,
            to: Some(ASSET),
            input: transfer_calldata(PAY_TO, amount, nonce.as_bytes()),
        };
        let receipt = ObservedReceipt {
            transaction_hash: hash,
            success: true,
            logs: vec![transfer_event(ASSET, PAYER, PAY_TO, amount)],
        };
        (tx, receipt)
    }

    pub fn terms(amount: u64) -> PaymentTerms {
        PaymentTerms {
            asset: ASSET,
            pay_to: PAY_TO,
            amount: U256::from(amount),
        }
    }

    fn verifier(chain: Arc<MockChain>) -> PaymentVerifier {
        PaymentVerifier::new(chain, terms(10), Duration::from_secs(1))
    }

    fn nonce() -> CorrelationToken {
        CorrelationToken::new("x402_abcdefghijklmnop")
    }

    #[tokio::test]
    async fn test_valid_settlement() {
        let chain = Arc::new(MockChain::default());
        let hash = B256::repeat_byte(1);
        let (tx, receipt) = paying_transaction(hash, nonce().as_str(), U256::from(10u64));
        chain.insert(tx, receipt);

        let settlement = verifier(chain.clone()).verify(hash, &nonce()).await.unwrap();
        assert_eq!(settlement.payer, PAYER);
        assert_eq!(settlement.amount, U256::from(10u64));
        assert_eq!(chain.reads(), 2);
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let chain = Arc::new(MockChain::default());
        let result = verifier(chain).verify(B256::ZERO, &nonce()).await;
        assert!(matches!(result, Err(SettlementError::TransactionNotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_receipt_status() {
        let chain = Arc::new(MockChain::default());
        let hash = B256::repeat_byte(2);
        let (tx, mut receipt) = paying_transaction(hash, nonce().as_str(), U256::from(10u64));
        receipt.success = false;
        chain.insert(tx, receipt);
        let result = verifier(chain).verify(hash, &nonce()).await;
        assert!(matches!(result, Err(SettlementError::TransactionReverted(_))));
    }

    #[tokio::test]
    async fn test_wrong_contract() {
        let chain = Arc::new(MockChain::default());
        let hash = B256::repeat_byte(3);
        let (mut tx, receipt) = paying_transaction(hash, nonce().as_str(), U256::from(10u64));
        tx.to = Some(Address::repeat_byte(0x77));
        chain.insert(tx, receipt);
        let result = verifier(chain).verify(hash, &nonce()).await;
        assert!(matches!(result, Err(SettlementError::WrongContract { .. })));
    }

    #[tokio::test]
    async fn test_mismatched_nonce() {
        let chain = Arc::new(MockChain::default());
        let hash = B256::repeat_byte(4);
        let (tx, receipt) = paying_transaction(hash, "x402_someoneelse00000", U256::from(10u64));
        chain.insert(tx, receipt);
        let result = verifier(chain).verify(hash, &nonce()).await;
        assert!(matches!(
            result,
            Err(SettlementError::CorrelationTokenMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_transfer_event() {
        let chain = Arc::new(MockChain::default());
        let hash = B256::repeat_byte(5);
        let (tx, mut receipt) = paying_transaction(hash, nonce().as_str(), U256::from(10u64));
        receipt.logs.clear();
        chain.insert(tx, receipt);
        let result = verifier(chain).verify(hash, &nonce()).await;
        assert!(matches!(
            result,
            Err(SettlementError::TransferEventMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_transfer_event_from_other_contract_is_ignored() {
        let chain = Arc::new(MockChain::default());
        let hash = B256::repeat_byte(6);
        let (tx, mut receipt) = paying_transaction(hash, nonce().as_str(), U256::from(10u64));
        receipt.logs = vec![transfer_event(
            Address::repeat_byte(0x55),
            PAYER,
            PAY_TO,
            U256::from(10u64),
        )];
        chain.insert(tx, receipt);
        let result = verifier(chain).verify(hash, &nonce()).await;
        assert!(matches!(
            result,
            Err(SettlementError::TransferEventMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_recipient() {
        let chain = Arc::new(MockChain::default());
        let hash = B256::repeat_byte(7);
        let (tx, mut receipt) = paying_transaction(hash, nonce().as_str(), U256::from(10u64));
        receipt.logs = vec![transfer_event(
            ASSET,
            PAYER,
            Address::repeat_byte(0x99),
            U256::from(10u64),
        )];
        chain.insert(tx, receipt);
        let result = verifier(chain).verify(hash, &nonce()).await;
        assert!(matches!(result, Err(SettlementError::WrongRecipient(_))));
    }

    #[tokio::test]
    async fn test_insufficient_amount() {
        let chain = Arc::new(MockChain::default());
        let hash = B256::repeat_byte(8);
        let (tx, receipt) = paying_transaction(hash, nonce().as_str(), U256::from(9u64));
        chain.insert(tx, receipt);
        let result = verifier(chain).verify(hash, &nonce()).await;
        assert!(matches!(
            result,
            Err(SettlementError::InsufficientAmount { .. })
        ));
    }

    #[tokio::test]
    async fn test_chain_error_fails_closed() {
        let chain = Arc::new(MockChain {
            fail: true,
            ..Default::default()
        });
        let verifier = verifier(chain);
        assert!(!verifier.is_settled(B256::ZERO, &nonce()).await);
        assert!(matches!(
            verifier.verify(B256::ZERO, &nonce()).await,
            Err(SettlementError::ChainRead(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_chain_times_out() {
        let chain = Arc::new(MockChain {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let verifier = PaymentVerifier::new(chain, terms(10), Duration::from_millis(20));
        assert!(matches!(
            verifier.verify(B256::ZERO, &nonce()).await,
            Err(SettlementError::ChainRead(ChainReadError::Timeout(_)))
        ));
    }
}
