//! HTTP-level vocabulary of the protocol: header names and JSON bodies.
//!
//! A `402` response carries a [`ChallengeBody`]. The client answers by repeating the
//! request with [`PAYMENT_PROOF_HEADER`] and [`NONCE_HEADER`], and later requests may
//! present a receipt in [`RECEIPT_HEADER`] instead.

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::evm::{ChecksummedAddress, decimal_u256};

/// Transaction hash of the settling transfer, `0x`-prefixed hex.
pub const PAYMENT_PROOF_HEADER: &str = "x-402-payment-proof";
/// Correlation token the transfer was made for.
pub const NONCE_HEADER: &str = "x-402-nonce";
/// Access receipt from an earlier settled request.
pub const RECEIPT_HEADER: &str = "x-402-receipt";

/// The `error` text every 402 body carries.
pub const PAYMENT_REQUIRED_ERROR: &str = "402 Payment Required";

/// Opaque one-time token binding a payment to a challenge.
///
/// Issued by the server as `x402_` followed by random alphanumerics. The client appends
/// its UTF-8 bytes to the transfer calldata, where the server later looks for them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    pub const PREFIX: &'static str = "x402_";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Display for CorrelationToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What the server demands before it serves `resource`.
///
/// Built fresh for every unauthenticated request and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentChallenge {
    pub resource: String,
    pub nonce: CorrelationToken,
    /// Smallest token units.
    pub amount: U256,
    pub destination: ChecksummedAddress,
    pub asset: ChecksummedAddress,
}

/// JSON body of a `402 Payment Required` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeBody {
    pub error: String,
    #[serde(with = "decimal_u256")]
    pub amount: U256,
    pub destination: ChecksummedAddress,
    pub nonce: CorrelationToken,
    /// Token contract to pay with. Optional on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<ChecksummedAddress>,
}

impl From<PaymentChallenge> for ChallengeBody {
    fn from(challenge: PaymentChallenge) -> Self {
        Self {
            error: PAYMENT_REQUIRED_ERROR.to_string(),
            amount: challenge.amount,
            destination: challenge.destination,
            nonce: challenge.nonce,
            asset: Some(challenge.asset),
        }
    }
}

/// JSON body of a `403` or any other refusal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// A `200` body: the protected payload, plus a receipt when one was just minted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantedResponse<T> {
    #[serde(flatten)]
    pub payload: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
}

/// Proof of payment as carried by the retry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProof {
    pub transaction: B256,
    pub nonce: CorrelationToken,
}

#[derive(Debug, thiserror::Error)]
#[error("Malformed transaction hash {0:?}")]
pub struct MalformedProof(pub String);

impl PaymentProof {
    /// Builds a proof from raw header values.
    ///
    /// # Errors
    ///
    /// [`MalformedProof`] when the transaction value is not a 32-byte hex hash.
    pub fn from_headers(transaction: &str, nonce: &str) -> Result<Self, MalformedProof> {
        let transaction = B256::from_str(transaction.trim())
            .map_err(|_| MalformedProof(transaction.to_string()))?;
        Ok(Self {
            transaction,
            nonce: CorrelationToken::new(nonce.trim()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use serde_json::json;

    #[test]
    fn test_challenge_body_shape() {
        let challenge = PaymentChallenge {
            resource: "match_final_001".into(),
            nonce: CorrelationToken::new("x402_abc"),
            amount: U256::from(10u64),
            destination: ChecksummedAddress(Address::repeat_byte(0x11)),
            asset: ChecksummedAddress(Address::repeat_byte(0x22)),
        };
        let body = serde_json::to_value(ChallengeBody::from(challenge)).unwrap();
        assert_eq!(body["error"], "402 Payment Required");
        assert_eq!(body["amount"], "10");
        assert_eq!(body["nonce"], "x402_abc");
        assert_eq!(
            body["destination"],
            "0x1111111111111111111111111111111111111111"
        );
        assert_eq!(body["asset"], "0x2222222222222222222222222222222222222222");
    }

    #[test]
    fn test_challenge_body_without_asset() {
        let body: ChallengeBody = serde_json::from_value(json!({
            "error": "402 Payment Required",
            "amount": "10000000000000000000",
            "destination": "0x1ec1053074ba13c21c46c2a7443412cc04140203",
            "nonce": "x402_abc"
        }))
        .unwrap();
        assert!(body.asset.is_none());
        assert_eq!(body.amount.to_string(), "10000000000000000000");
    }

    #[test]
    fn test_granted_response_flattens_payload() {
        let granted = GrantedResponse {
            payload: json!({"price": "98000.5"}),
            receipt: Some("r".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&granted).unwrap(),
            json!({"price": "98000.5", "receipt": "r"})
        );
        let no_receipt = GrantedResponse {
            payload: json!({"price": "98000.5"}),
            receipt: None,
        };
        assert_eq!(
            serde_json::to_value(&no_receipt).unwrap(),
            json!({"price": "98000.5"})
        );
    }

    #[test]
    fn test_proof_from_headers() {
        let hash = format!("0x{}", "ab".repeat(32));
        let proof = PaymentProof::from_headers(&hash, "x402_abc").unwrap();
        assert_eq!(proof.transaction, B256::repeat_byte(0xab));
        assert_eq!(proof.nonce.as_str(), "x402_abc");
        assert!(PaymentProof::from_headers("0x1234", "x402_abc").is_err());
        assert!(PaymentProof::from_headers("not-a-hash", "x402_abc").is_err());
    }
}
