use alloy_primitives::{Address, B256, Bytes, U256};
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use x402_oracle_eip155::{
    ChainReadError, ChainReader, ChainWriteError, TransferRequest, TransferSender,
};
use x402_oracle_types::proto::{
    ChallengeBody, ErrorResponse, NONCE_HEADER, PAYMENT_PROOF_HEADER, RECEIPT_HEADER,
};

/// Gas limit for the payment transfer. Appending the nonce costs a little more than a
/// bare `transfer`.
pub const DEFAULT_GAS_LIMIT: u64 = 100_000;
/// 0.0005 of the native coin, in wei.
pub const DEFAULT_MIN_GAS_BALANCE: u64 = 500_000_000_000_000;
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);
/// Upper bound on the balance checks made before paying.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Which balance fell short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundsKind {
    Token,
    Gas,
}

impl Display for FundsKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FundsKind::Token => f.write_str("token"),
            FundsKind::Gas => f.write_str("gas"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("Malformed payment challenge: {0}")]
    MalformedChallenge(String),
    #[error("Server asks for token {requested}, configured token is {configured}")]
    UnexpectedAsset {
        requested: Address,
        configured: Address,
    },
    #[error("Insufficient {kind} balance: required {required}, available {available}")]
    InsufficientFunds {
        kind: FundsKind,
        required: U256,
        available: U256,
    },
    #[error(transparent)]
    ChainRead(#[from] ChainReadError),
    #[error("Payment transaction failed: {0}")]
    SubmissionFailed(#[source] ChainWriteError),
    #[error("Server rejected the request with status {status}: {detail}")]
    Rejected { status: u16, detail: String },
}

/// Settings of a [`PaymentSubmitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitterConfig {
    /// The only token this buyer pays with.
    pub token: Address,
    pub gas_limit: u64,
    /// Native balance below which no payment is attempted.
    pub min_gas_balance: U256,
    pub confirmation_timeout: Duration,
    pub read_timeout: Duration,
}

impl SubmitterConfig {
    pub fn new(token: Address) -> Self {
        Self {
            token,
            gas_limit: DEFAULT_GAS_LIMIT,
            min_gas_balance: U256::from(DEFAULT_MIN_GAS_BALANCE),
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_min_gas_balance(mut self, min_gas_balance: U256) -> Self {
        self.min_gas_balance = min_gas_balance;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct PaidResponse {
    /// Response body without the `receipt` field.
    pub body: Value,
    /// Receipt minted for this request, to be sent as `x-402-receipt` next time.
    pub receipt: Option<String>,
    /// Hash of the payment transaction, when a payment was made.
    pub transaction: Option<B256>,
}

/// Fetches x402-protected resources, paying for them when asked.
///
/// One `fetch` pays at most once. Every failure is reported as a [`SubmitError`] variant and
/// no funds move unless the balance checks pass first.
pub struct PaymentSubmitter {
    http: reqwest::Client,
    chain: Arc<dyn ChainReader>,
    sender: Arc<dyn TransferSender>,
    config: SubmitterConfig,
    receipt: Option<String>,
}

impl PaymentSubmitter {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        sender: Arc<dyn TransferSender>,
        config: SubmitterConfig,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            chain,
            sender,
            config,
            receipt: None,
        }
    }

    /// Uses a preconfigured `reqwest` client instead of the default one.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Presents `receipt` on the first request, skipping payment while it is still honored.
    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipt = Some(receipt.into());
        self
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &str) -> Result<PaidResponse, SubmitError> {
        let mut request = self.http.get(url);
        if let Some(receipt) = self.receipt.as_deref() {
            request = request.header(RECEIPT_HEADER, receipt);
        }
        let response = request.send().await?;
        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return granted(response, None).await;
        }

        let challenge = parse_challenge(&response.text().await?)?;
        if let Some(asset) = challenge.asset {
            if asset.0 != self.config.token {
                return Err(SubmitError::UnexpectedAsset {
                    requested: asset.0,
                    configured: self.config.token,
                });
            }
        }
        tracing::info!(
            amount = %challenge.amount,
            destination = %challenge.destination,
            nonce = %challenge.nonce,
            "Payment required"
        );

        self.ensure_funded(challenge.amount).await?;
        let transaction = self.pay(&challenge).await?;

        let response = self
            .http
            .get(url)
            .header(PAYMENT_PROOF_HEADER, transaction.to_string())
            .header(NONCE_HEADER, challenge.nonce.as_str())
            .send()
            .await?;
        granted(response, Some(transaction)).await
    }

    async fn ensure_funded(&self, amount: U256) -> Result<(), SubmitError> {
        let payer = self.sender.payer();
        let token = self.config.token;
        let reads = async {
            tokio::try_join!(
                self.chain.get_token_balance(token, payer),
                self.chain.get_native_balance(payer),
                self.chain.get_token_decimals(token),
            )
        };
        let (token_balance, native_balance, decimals) =
            tokio::time::timeout(self.config.read_timeout, reads)
                .await
                .map_err(|_| ChainReadError::Timeout(self.config.read_timeout))??;
        tracing::debug!(
            %payer,
            %token_balance,
            %native_balance,
            decimals,
            "Fetched payer balances"
        );
        if token_balance < amount {
            return Err(SubmitError::InsufficientFunds {
                kind: FundsKind::Token,
                required: amount,
                available: token_balance,
            });
        }
        if native_balance < self.config.min_gas_balance {
            return Err(SubmitError::InsufficientFunds {
                kind: FundsKind::Gas,
                required: self.config.min_gas_balance,
                available: native_balance,
            });
        }
        Ok(())
    }

    async fn pay(&self, challenge: &ChallengeBody) -> Result<B256, SubmitError> {
        let request = TransferRequest {
            token: self.config.token,
            to: challenge.destination.0,
            amount: challenge.amount,
            extra_data: Bytes::copy_from_slice(challenge.nonce.as_bytes()),
            gas_limit: self.config.gas_limit,
        };
        let hash = self
            .sender
            .submit_transfer(request)
            .await
            .map_err(SubmitError::SubmissionFailed)?;
        tracing::info!(tx = %hash, "Payment submitted, waiting for confirmation");
        self.sender
            .wait_for_confirmation(hash, self.config.confirmation_timeout)
            .await
            .map_err(SubmitError::SubmissionFailed)?;
        tracing::info!(tx = %hash, "Payment confirmed");
        Ok(hash)
    }
}

fn parse_challenge(body: &str) -> Result<ChallengeBody, SubmitError> {
    serde_json::from_str(body).map_err(|e| SubmitError::MalformedChallenge(e.to_string()))
}

async fn granted(
    response: reqwest::Response,
    transaction: Option<B256>,
) -> Result<PaidResponse, SubmitError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await?;
        let detail = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.error)
            .unwrap_or(text);
        return Err(SubmitError::Rejected {
            status: status.as_u16(),
            detail,
        });
    }
    let mut body: Value = response.json().await?;
    let receipt = body
        .as_object_mut()
        .and_then(|object| object.remove("receipt"))
        .and_then(|receipt| receipt.as_str().map(str::to_string));
    Ok(PaidResponse {
        body,
        receipt,
        transaction,
    })
}
