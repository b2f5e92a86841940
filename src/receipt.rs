//! Signed, time-bounded access receipts.
//!
//! A receipt is an HS256 JWT in compact form: `base64url(header).base64url(claims).base64url(mac)`
//! where the claims are `{"resource": ..., "exp": ...}`. Any JWT library holding the same
//! secret can read it, but nothing here depends on one.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use x402_oracle_types::timestamp::UnixTimestamp;
use x402_oracle_types::util::b64url;

type HmacSha256 = Hmac<Sha256>;

/// Shortest accepted signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct ReceiptHeader {
    alg: String,
    typ: String,
}

/// What a receipt asserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptClaims {
    pub resource: String,
    pub exp: UnixTimestamp,
}

/// A compact receipt string as handed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessReceipt(String);

impl AccessReceipt {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for AccessReceipt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// HMAC signing secret. Never printed.
#[derive(Clone)]
pub struct ReceiptSecret(Vec<u8>);

impl ReceiptSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for ReceiptSecret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReceiptSecret(<{} bytes>)", self.0.len())
    }
}

impl FromStr for ReceiptSecret {
    type Err = ReceiptSecretError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secret = Self(s.as_bytes().to_vec());
        if secret.0.len() < MIN_SECRET_LEN {
            return Err(ReceiptSecretError::TooShort(secret.0.len()));
        }
        Ok(secret)
    }
}

impl From<&[u8]> for ReceiptSecret {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiptSecretError {
    #[error("Receipt secret must be at least {MIN_SECRET_LEN} bytes, got {0}")]
    TooShort(usize),
}

/// Why a presented receipt was not honored.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReceiptError {
    #[error("Malformed receipt")]
    Malformed,
    #[error("Unsupported receipt algorithm {0}")]
    UnsupportedAlgorithm(String),
    #[error("Receipt signature does not verify")]
    BadSignature,
    #[error("Receipt expired at {0}")]
    Expired(UnixTimestamp),
    #[error("Receipt is for resource {0:?}")]
    ResourceMismatch(String),
}

/// Mints and checks receipts with a single HMAC-SHA256 key.
#[derive(Clone)]
pub struct ReceiptIssuer {
    mac: HmacSha256,
    ttl_secs: u64,
}

impl Debug for ReceiptIssuer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptIssuer")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl ReceiptIssuer {
    pub fn new(secret: &ReceiptSecret, ttl_secs: u64) -> Result<Self, ReceiptSecretError> {
        let bytes = secret.as_bytes();
        if bytes.len() < MIN_SECRET_LEN {
            return Err(ReceiptSecretError::TooShort(bytes.len()));
        }
        let mac = HmacSha256::new_from_slice(bytes)
            .map_err(|_| ReceiptSecretError::TooShort(bytes.len()))?;
        Ok(Self { mac, ttl_secs })
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn issue(&self, resource: &str) -> AccessReceipt {
        self.issue_at(resource, UnixTimestamp::now())
    }

    pub fn issue_at(&self, resource: &str, now: UnixTimestamp) -> AccessReceipt {
        let header = ReceiptHeader {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };
        let claims = ReceiptClaims {
            resource: resource.to_string(),
            exp: now + self.ttl_secs,
        };
        // Serializing these two plain structs cannot fail.
        let header = serde_json::to_vec(&header).unwrap_or_default();
        let claims = serde_json::to_vec(&claims).unwrap_or_default();
        let signing_input = format!("{}.{}", b64url::encode(header), b64url::encode(claims));
        let signature = self.sign(signing_input.as_bytes());
        AccessReceipt(format!("{}.{}", signing_input, b64url::encode(signature)))
    }

    /// Whether `receipt` currently grants access to `resource`.
    pub fn validate(&self, receipt: &str, resource: &str) -> bool {
        self.inspect(receipt, resource).is_ok()
    }

    pub fn validate_at(&self, receipt: &str, resource: &str, now: UnixTimestamp) -> bool {
        self.inspect_at(receipt, resource, now).is_ok()
    }

    /// Like [`validate`](Self::validate), but says why a receipt was refused.
    pub fn inspect(&self, receipt: &str, resource: &str) -> Result<ReceiptClaims, ReceiptError> {
        self.inspect_at(receipt, resource, UnixTimestamp::now())
    }

    pub fn inspect_at(
        &self,
        receipt: &str,
        resource: &str,
        now: UnixTimestamp,
    ) -> Result<ReceiptClaims, ReceiptError> {
        let mut parts = receipt.trim().split('.');
        let (Some(header), Some(claims), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ReceiptError::Malformed);
        };

        let header_bytes = b64url::decode(header).map_err(|_| ReceiptError::Malformed)?;
        let header_json: ReceiptHeader =
            serde_json::from_slice(&header_bytes).map_err(|_| ReceiptError::Malformed)?;
        if header_json.alg != ALGORITHM {
            return Err(ReceiptError::UnsupportedAlgorithm(header_json.alg));
        }

        let signature = b64url::decode(signature).map_err(|_| ReceiptError::Malformed)?;
        let signed_len = header.len() + 1 + claims.len();
        let signing_input = &receipt.trim()[..signed_len];
        let mut mac = self.mac.clone();
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| ReceiptError::BadSignature)?;

        let claims_bytes = b64url::decode(claims).map_err(|_| ReceiptError::Malformed)?;
        let claims: ReceiptClaims =
            serde_json::from_slice(&claims_bytes).map_err(|_| ReceiptError::Malformed)?;
        if now >= claims.exp {
            return Err(ReceiptError::Expired(claims.exp));
        }
        if claims.resource != resource {
            return Err(ReceiptError::ResourceMismatch(claims.resource));
        }
        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }
}
