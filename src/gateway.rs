//! Per-request access decision: receipt, then proof, then challenge.
//!
//! The order matters. A valid receipt is honored before anything else and costs no chain
//! read. A request carrying both proof headers is judged on that proof alone and never
//! receives a new challenge. Anything else is asked to pay.

use std::sync::Arc;
use tracing::instrument;
use x402_oracle_types::evm::ChecksummedAddress;
use x402_oracle_types::proto::{MalformedProof, PaymentChallenge, PaymentProof};

use crate::nonce::{NonceError, NonceRegistry};
use crate::receipt::{AccessReceipt, ReceiptIssuer};
use crate::verifier::{PaymentVerifier, SettlementError};

/// Raw credential headers of a request, any of which may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub receipt: Option<String>,
    pub proof_transaction: Option<String>,
    pub proof_nonce: Option<String>,
}

/// Why a proof was refused.
#[derive(Debug, thiserror::Error)]
pub enum Denial {
    #[error(transparent)]
    MalformedProof(#[from] MalformedProof),
    #[error(transparent)]
    Nonce(#[from] NonceError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

#[derive(Debug)]
pub enum GatewayDecision {
    /// Serve the resource. `receipt` is set when one was minted for this request.
    Granted { receipt: Option<AccessReceipt> },
    PaymentRequired(PaymentChallenge),
    Forbidden(Denial),
}

/// Guards one family of resources priced by the same [`PaymentVerifier`] terms.
#[derive(Debug, Clone)]
pub struct ResourceGateway {
    nonces: NonceRegistry,
    receipts: Arc<ReceiptIssuer>,
    verifier: PaymentVerifier,
}

impl ResourceGateway {
    pub fn new(nonces: NonceRegistry, receipts: ReceiptIssuer, verifier: PaymentVerifier) -> Self {
        Self {
            nonces,
            receipts: Arc::new(receipts),
            verifier,
        }
    }

    pub fn nonces(&self) -> &NonceRegistry {
        &self.nonces
    }

    #[instrument(skip_all, fields(resource = %resource))]
    pub async fn handle(&self, resource: &str, credentials: &Credentials) -> GatewayDecision {
        if let Some(receipt) = credentials.receipt.as_deref() {
            match self.receipts.inspect(receipt, resource) {
                Ok(_) => {
                    tracing::debug!("Access via receipt");
                    return GatewayDecision::Granted { receipt: None };
                }
                Err(error) => tracing::debug!(%error, "Receipt not honored"),
            }
        }

        if let (Some(transaction), Some(nonce)) = (
            credentials.proof_transaction.as_deref(),
            credentials.proof_nonce.as_deref(),
        ) {
            return match self.settle(resource, transaction, nonce).await {
                Ok(receipt) => GatewayDecision::Granted {
                    receipt: Some(receipt),
                },
                Err(denial) => {
                    tracing::warn!(%denial, "Payment proof rejected");
                    GatewayDecision::Forbidden(denial)
                }
            };
        }

        GatewayDecision::PaymentRequired(self.challenge(resource))
    }

    async fn settle(
        &self,
        resource: &str,
        transaction: &str,
        nonce: &str,
    ) -> Result<AccessReceipt, Denial> {
        let proof = PaymentProof::from_headers(transaction, nonce)?;
        self.nonces.ensure_unsettled(&proof.transaction)?;
        let claim = self.nonces.claim(&proof.nonce, resource)?;
        let settlement = self
            .verifier
            .verify(proof.transaction, claim.token())
            .await?;
        claim.consume(settlement.transaction)?;
        tracing::info!(
            tx = %settlement.transaction,
            payer = %settlement.payer,
            amount = %settlement.amount,
            monotonic_counter.payments_settled = 1u64,
            "Payment settled"
        );
        Ok(self.receipts.issue(resource))
    }

    fn challenge(&self, resource: &str) -> PaymentChallenge {
        let terms = self.verifier.terms();
        let nonce = self.nonces.issue(resource);
        tracing::debug!(%nonce, "Issued payment challenge");
        PaymentChallenge {
            resource: resource.to_string(),
            nonce,
            amount: terms.amount,
            destination: ChecksummedAddress(terms.pay_to),
            asset: ChecksummedAddress(terms.asset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::ReceiptSecret;
    use crate::verifier::tests::{
        ASSET, MockChain, PAY_TO, PAYER, paying_transaction, terms, transfer_event,
    };
    use alloy_primitives::{B256, U256};
    use x402_oracle_eip155::chain::{ObservedReceipt, ObservedTransaction, transfer_calldata};
    use std::time::Duration;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn gateway(chain: Arc<MockChain>) -> ResourceGateway {
        let secret: ReceiptSecret = SECRET.parse().unwrap();
        ResourceGateway::new(
            NonceRegistry::new(),
            ReceiptIssuer::new(&secret, 3600).unwrap(),
            PaymentVerifier::new(chain, terms(10), Duration::from_secs(1)),
        )
    }

    fn proof(hash: B256, nonce: &str) -> Credentials {
        Credentials {
            receipt: None,
            proof_transaction: Some(hash.to_string()),
            proof_nonce: Some(nonce.to_string()),
        }
    }

    async fn challenge(gateway: &ResourceGateway, resource: &str) -> PaymentChallenge {
        match gateway.handle(resource, &Credentials::default()).await {
            GatewayDecision::PaymentRequired(challenge) => challenge,
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_credentials_issues_challenge() {
        let chain = Arc::new(MockChain::default());
        let gateway = gateway(chain.clone());
        let challenge = challenge(&gateway, "match_final_001").await;
        assert!(challenge.nonce.as_str().starts_with("x402_"));
        assert_eq!(challenge.destination.0, PAY_TO);
        assert_eq!(challenge.amount, U256::from(10u64));
        assert_eq!(gateway.nonces().len(), 1);
        assert_eq!(chain.reads(), 0);
    }

    #[tokio::test]
    async fn test_single_proof_header_is_treated_as_no_proof() {
        let gateway = gateway(Arc::new(MockChain::default()));
        let only_tx = Credentials {
            proof_transaction: Some(B256::ZERO.to_string()),
            ..Default::default()
        };
        assert!(matches!(
            gateway.handle("a", &only_tx).await,
            GatewayDecision::PaymentRequired(_)
        ));
        let only_nonce = Credentials {
            proof_nonce: Some("x402_abc".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            gateway.handle("a", &only_nonce).await,
            GatewayDecision::PaymentRequired(_)
        ));
    }

    #[tokio::test]
    async fn test_proof_then_receipt_fast_path() {
        let chain = Arc::new(MockChain::default());
        let gateway = gateway(chain.clone());
        let nonce = challenge(&gateway, "a").await.nonce;
        let hash = B256::repeat_byte(1);
        let (tx, receipt) = paying_transaction(hash, nonce.as_str(), U256::from(10u64));
        chain.insert(tx, receipt);

        let receipt = match gateway.handle("a", &proof(hash, nonce.as_str())).await {
            GatewayDecision::Granted {
                receipt: Some(receipt),
            } => receipt,
            other => panic!("expected grant with receipt, got {other:?}"),
        };
        let reads_after_settlement = chain.reads();

        let with_receipt = Credentials {
            receipt: Some(receipt.into_inner()),
            ..Default::default()
        };
        assert!(matches!(
            gateway.handle("a", &with_receipt).await,
            GatewayDecision::Granted { receipt: None }
        ));
        assert_eq!(chain.reads(), reads_after_settlement);
    }

    #[tokio::test]
    async fn test_receipt_for_other_resource_falls_through() {
        let chain = Arc::new(MockChain::default());
        let gateway = gateway(chain);
        let receipt = gateway.receipts.issue("a").into_inner();
        let credentials = Credentials {
            receipt: Some(receipt),
            ..Default::default()
        };
        assert!(matches!(
            gateway.handle("b", &credentials).await,
            GatewayDecision::PaymentRequired(_)
        ));
    }

    #[tokio::test]
    async fn test_replayed_proof_is_forbidden() {
        let chain = Arc::new(MockChain::default());
        let gateway = gateway(chain.clone());
        let nonce = challenge(&gateway, "a").await.nonce;
        let hash = B256::repeat_byte(2);
        let (tx, receipt) = paying_transaction(hash, nonce.as_str(), U256::from(10u64));
        chain.insert(tx, receipt);

        assert!(matches!(
            gateway.handle("a", &proof(hash, nonce.as_str())).await,
            GatewayDecision::Granted { .. }
        ));
        assert!(matches!(
            gateway.handle("a", &proof(hash, nonce.as_str())).await,
            GatewayDecision::Forbidden(Denial::Nonce(NonceError::AlreadyConsumed))
        ));
    }

    #[tokio::test]
    async fn test_failed_verification_releases_nonce() {
        let chain = Arc::new(MockChain::default());
        let gateway = gateway(chain.clone());
        let nonce = challenge(&gateway, "a").await.nonce;
        let hash = B256::repeat_byte(3);

        // Not indexed yet.
        assert!(matches!(
            gateway.handle("a", &proof(hash, nonce.as_str())).await,
            GatewayDecision::Forbidden(Denial::Settlement(
                SettlementError::TransactionNotFound(_)
            ))
        ));

        let (tx, receipt) = paying_transaction(hash, nonce.as_str(), U256::from(10u64));
        chain.insert(tx, receipt);
        assert!(matches!(
            gateway.handle("a", &proof(hash, nonce.as_str())).await,
            GatewayDecision::Granted { receipt: Some(_) }
        ));
    }

    #[tokio::test]
    async fn test_nonce_for_other_resource_is_forbidden() {
        let chain = Arc::new(MockChain::default());
        let gateway = gateway(chain.clone());
        let nonce = challenge(&gateway, "a").await.nonce;
        let hash = B256::repeat_byte(4);
        let (tx, receipt) = paying_transaction(hash, nonce.as_str(), U256::from(10u64));
        chain.insert(tx, receipt);
        assert!(matches!(
            gateway.handle("b", &proof(hash, nonce.as_str())).await,
            GatewayDecision::Forbidden(Denial::Nonce(NonceError::ResourceMismatch))
        ));
        assert_eq!(chain.reads(), 0);
    }

    #[tokio::test]
    async fn test_malformed_transaction_hash_is_forbidden() {
        let gateway = gateway(Arc::new(MockChain::default()));
        let credentials = Credentials {
            receipt: None,
            proof_transaction: Some("0xnothex".to_string()),
            proof_nonce: Some("x402_abc".to_string()),
        };
        assert!(matches!(
            gateway.handle("a", &credentials).await,
            GatewayDecision::Forbidden(Denial::MalformedProof(_))
        ));
    }

    #[tokio::test]
    async fn test_one_transfer_cannot_pay_two_challenges() {
        let chain = Arc::new(MockChain::default());
        let gateway = gateway(chain.clone());
        let first = challenge(&gateway, "a").await.nonce;
        let second = challenge(&gateway, "b").await.nonce;

        let hash = B256::repeat_byte(5);
        let both = format!("{}{}", first.as_str(), second.as_str());
        let amount = U256::from(10u64);
        chain.insert(
            ObservedTransaction {
                hash,
                from: PAYER,
                to: Some(ASSET),
                input: transfer_calldata(PAY_TO, amount, both.as_bytes()),
            },
            ObservedReceipt {
                transaction_hash: hash,
                success: true,
                logs: vec![transfer_event(ASSET, PAYER, PAY_TO, amount)],
            },
        );

        assert!(matches!(
            gateway.handle("a", &proof(hash, first.as_str())).await,
            GatewayDecision::Granted { receipt: Some(_) }
        ));
        let reads = chain.reads();
        assert!(matches!(
            gateway.handle("b", &proof(hash, second.as_str())).await,
            GatewayDecision::Forbidden(Denial::Nonce(NonceError::TransactionAlreadySettled(h)))
                if h == hash
        ));
        assert_eq!(chain.reads(), reads);

        // The second challenge is still open to a fresh payment.
        let fresh = B256::repeat_byte(6);
        let (tx, receipt) = paying_transaction(fresh, second.as_str(), amount);
        chain.insert(tx, receipt);
        assert!(matches!(
            gateway.handle("b", &proof(fresh, second.as_str())).await,
            GatewayDecision::Granted { receipt: Some(_) }
        ));
    }
}
