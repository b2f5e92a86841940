//! Issuance and one-time redemption of correlation tokens.
//!
//! Every `402` challenge carries a fresh [`CorrelationToken`] bound to the resource that was
//! asked for. A token moves through three states:
//!
//! ```text
//! Outstanding --claim--> Claimed --consume--> Consumed
//!      ^                    |
//!      +------ drop --------+
//! ```
//!
//! Only an `Outstanding` token can be claimed, so two concurrent proofs for the same token
//! cannot both be verified, and a token whose payment was accepted is never honored again.
//! Consuming a token also binds the paying transaction to it: a transaction hash settles at
//! most one token, however many tokens its calldata carries.
//! A [`Claim`] that is dropped without being consumed (failed verification, cancelled
//! request) puts the token back to `Outstanding`, letting the client retry once its
//! transaction is indexed.

use alloy_primitives::B256;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use x402_oracle_types::proto::CorrelationToken;
use x402_oracle_types::timestamp::UnixTimestamp;

/// Random characters after the `x402_` prefix.
const TOKEN_RANDOM_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NonceState {
    Outstanding,
    Claimed,
    Consumed,
}

#[derive(Debug)]
struct NonceEntry {
    resource: String,
    issued_at: UnixTimestamp,
    state: NonceState,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NonceError {
    #[error("Unknown nonce")]
    Unknown,
    #[error("Nonce was issued for a different resource")]
    ResourceMismatch,
    #[error("Nonce was already used")]
    AlreadyConsumed,
    #[error("Nonce is being verified by another request")]
    InFlight,
    #[error("Transaction {0} already settled another nonce")]
    TransactionAlreadySettled(B256),
}

/// In-memory registry of issued correlation tokens.
///
/// Cloning is cheap and every clone shares the same map.
#[derive(Debug, Clone, Default)]
pub struct NonceRegistry {
    entries: Arc<DashMap<CorrelationToken, NonceEntry>>,
    /// Transactions already accepted, with the token each one paid for. Never pruned.
    settled: Arc<DashMap<B256, CorrelationToken>>,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a new token for `resource`.
    pub fn issue(&self, resource: &str) -> CorrelationToken {
        self.issue_at(resource, UnixTimestamp::now())
    }

    pub fn issue_at(&self, resource: &str, now: UnixTimestamp) -> CorrelationToken {
        loop {
            let token = random_token();
            if let Entry::Vacant(vacant) = self.entries.entry(token.clone()) {
                vacant.insert(NonceEntry {
                    resource: resource.to_string(),
                    issued_at: now,
                    state: NonceState::Outstanding,
                });
                return token;
            }
        }
    }

    /// Reserves an outstanding token for verification against `resource`.
    pub fn claim(&self, token: &CorrelationToken, resource: &str) -> Result<Claim, NonceError> {
        let mut entry = self.entries.get_mut(token).ok_or(NonceError::Unknown)?;
        if entry.resource != resource {
            return Err(NonceError::ResourceMismatch);
        }
        match entry.state {
            NonceState::Outstanding => {
                entry.state = NonceState::Claimed;
                Ok(Claim {
                    registry: self.clone(),
                    token: token.clone(),
                    consumed: false,
                })
            }
            NonceState::Claimed => Err(NonceError::InFlight),
            NonceState::Consumed => Err(NonceError::AlreadyConsumed),
        }
    }

    /// Fails when `transaction` has already paid for a token.
    pub fn ensure_unsettled(&self, transaction: &B256) -> Result<(), NonceError> {
        if self.settled.contains_key(transaction) {
            return Err(NonceError::TransactionAlreadySettled(*transaction));
        }
        Ok(())
    }

    /// Drops every token issued before `older_than`, except those currently claimed.
    ///
    /// A pruned token is unknown afterwards, so replaying it still fails.
    pub fn prune(&self, older_than: UnixTimestamp) -> usize {
        let mut pruned = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.issued_at >= older_than || entry.state == NonceState::Claimed;
            if !keep {
                pruned += 1;
            }
            keep
        });
        pruned
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prunes tokens older than `ttl` every `period` until `shutdown` fires.
    pub async fn prune_periodically(
        self,
        ttl: Duration,
        period: Duration,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let cutoff = UnixTimestamp::now().saturating_sub(ttl.as_secs());
                    let pruned = self.prune(cutoff);
                    if pruned > 0 {
                        tracing::debug!(pruned, remaining = self.len(), "Pruned stale nonces");
                    }
                }
            }
        }
    }

    fn set_state(&self, token: &CorrelationToken, from: NonceState, to: NonceState) {
        if let Some(mut entry) = self.entries.get_mut(token) {
            if entry.state == from {
                entry.state = to;
            }
        }
    }
}

/// Exclusive hold on a token while its payment is being verified.
#[derive(Debug)]
pub struct Claim {
    registry: NonceRegistry,
    token: CorrelationToken,
    consumed: bool,
}

impl Claim {
    pub fn token(&self) -> &CorrelationToken {
        &self.token
    }

    /// Marks the token as spent by `transaction`. It can never be claimed again.
    ///
    /// Fails, releasing the token, when `transaction` already paid for another one.
    pub fn consume(mut self, transaction: B256) -> Result<(), NonceError> {
        match self.registry.settled.entry(transaction) {
            Entry::Occupied(_) => return Err(NonceError::TransactionAlreadySettled(transaction)),
            Entry::Vacant(vacant) => {
                vacant.insert(self.token.clone());
            }
        }
        self.registry
            .set_state(&self.token, NonceState::Claimed, NonceState::Consumed);
        self.consumed = true;
        Ok(())
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.consumed {
            self.registry
                .set_state(&self.token, NonceState::Claimed, NonceState::Outstanding);
        }
    }
}

fn random_token() -> CorrelationToken {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_RANDOM_LEN)
        .map(char::from)
        .collect();
    CorrelationToken::new(format!("{}{}", CorrelationToken::PREFIX, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_issued_tokens_are_prefixed_and_unique() {
        let registry = NonceRegistry::new();
        let tokens: HashSet<_> = (0..1000).map(|_| registry.issue("match_final_001")).collect();
        assert_eq!(tokens.len(), 1000);
        assert_eq!(registry.len(), 1000);
        for token in &tokens {
            assert!(token.as_str().starts_with("x402_"));
            assert_eq!(token.as_str().len(), 5 + TOKEN_RANDOM_LEN);
        }
    }

    #[test]
    fn test_claim_checks_resource_binding() {
        let registry = NonceRegistry::new();
        let token = registry.issue("a");
        assert_eq!(
            registry.claim(&token, "b").unwrap_err(),
            NonceError::ResourceMismatch
        );
        assert!(registry.claim(&token, "a").is_ok());
    }

    #[test]
    fn test_unknown_token() {
        let registry = NonceRegistry::new();
        let token = CorrelationToken::new("x402_nothing");
        assert_eq!(registry.claim(&token, "a").unwrap_err(), NonceError::Unknown);
    }

    #[test]
    fn test_claim_is_exclusive_until_released() {
        let registry = NonceRegistry::new();
        let token = registry.issue("a");
        let claim = registry.claim(&token, "a").unwrap();
        assert_eq!(registry.claim(&token, "a").unwrap_err(), NonceError::InFlight);
        drop(claim);
        assert!(registry.claim(&token, "a").is_ok());
    }

    #[test]
    fn test_consumed_token_is_never_honored_again() {
        let registry = NonceRegistry::new();
        let token = registry.issue("a");
        registry
            .claim(&token, "a")
            .unwrap()
            .consume(B256::repeat_byte(1))
            .unwrap();
        assert_eq!(
            registry.claim(&token, "a").unwrap_err(),
            NonceError::AlreadyConsumed
        );
    }

    #[test]
    fn test_transaction_settles_one_token_only() {
        let registry = NonceRegistry::new();
        let first = registry.issue("a");
        let second = registry.issue("b");
        let hash = B256::repeat_byte(7);
        assert!(registry.ensure_unsettled(&hash).is_ok());

        registry.claim(&first, "a").unwrap().consume(hash).unwrap();
        assert_eq!(
            registry.ensure_unsettled(&hash).unwrap_err(),
            NonceError::TransactionAlreadySettled(hash)
        );
        let claim = registry.claim(&second, "b").unwrap();
        assert_eq!(
            claim.consume(hash).unwrap_err(),
            NonceError::TransactionAlreadySettled(hash)
        );

        // Refused token goes back to outstanding and can still be paid by another transaction.
        let claim = registry.claim(&second, "b").unwrap();
        assert!(claim.consume(B256::repeat_byte(8)).is_ok());
    }

    #[test]
    fn test_prune_removes_stale_tokens() {
        let registry = NonceRegistry::new();
        let old = registry.issue_at("a", UnixTimestamp::from_secs(100));
        let held = registry.issue_at("a", UnixTimestamp::from_secs(100));
        let fresh = registry.issue_at("a", UnixTimestamp::from_secs(1000));
        let _claim = registry.claim(&held, "a").unwrap();

        assert_eq!(registry.prune(UnixTimestamp::from_secs(500)), 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.claim(&old, "a").unwrap_err(), NonceError::Unknown);
        assert!(registry.claim(&fresh, "a").is_ok());
    }

    #[tokio::test]
    async fn test_pruner_stops_on_shutdown() {
        let registry = NonceRegistry::new();
        registry.issue_at("a", UnixTimestamp::from_secs(1));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(registry.clone().prune_periodically(
            Duration::from_secs(60),
            Duration::from_millis(10),
            shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        task.await.unwrap();
        assert!(registry.is_empty());
    }
}
