//! Configuration for the oracle server.
//!
//! The config file path comes from `--config` (or `$CONFIG`), defaulting to `config.json`.
//! Secrets and addresses may be given as `"$VAR"` and are resolved from the environment
//! while the file is parsed.

use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use x402_oracle_types::config::{LiteralOrEnv, RpcConfig};
use x402_oracle_types::evm::{ChecksummedAddress, TokenAsset};
use x402_oracle_types::util::{MoneyAmount, MoneyAmountParseError};

use crate::oracle::PriceOracle;
use crate::receipt::ReceiptSecret;
use crate::verifier::PaymentTerms;

/// CLI arguments for the oracle server.
#[derive(Parser, Debug)]
#[command(name = "x402-oracle")]
#[command(about = "Price oracle gated by x402 payments")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
///
/// `host` and `port` fall back to the `HOST` and `PORT` environment variables, then to
/// built-in defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    rpc: Vec<RpcConfig>,
    #[serde(default = "config_defaults::default_chain_read_timeout_secs")]
    chain_read_timeout_secs: u64,
    receipt_secret: LiteralOrEnv<ReceiptSecret>,
    #[serde(default = "config_defaults::default_receipt_ttl_secs")]
    receipt_ttl_secs: u64,
    #[serde(default = "config_defaults::default_nonce_ttl_secs")]
    nonce_ttl_secs: u64,
    resource: ResourceConfig,
}

/// Price and payout for the protected route.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    pub asset: TokenAsset,
    pub pay_to: LiteralOrEnv<ChecksummedAddress>,
    /// Human amount of `asset`, e.g. `"10"`.
    pub price: LiteralOrEnv<MoneyAmount>,
    #[serde(default)]
    pub quotes: HashMap<String, String>,
    pub default_quote: String,
    #[serde(default = "config_defaults::default_currency")]
    pub currency: String,
}

pub mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};

    pub const DEFAULT_PORT: u16 = 3000;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

    /// Returns the default port value with fallback: $PORT env var -> 3000
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HOST)
    }

    pub fn default_chain_read_timeout_secs() -> u64 {
        10
    }

    pub fn default_receipt_ttl_secs() -> u64 {
        3600
    }

    pub fn default_nonce_ttl_secs() -> u64 {
        900
    }

    pub fn default_currency() -> String {
        "USD".to_string()
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("At least one RPC endpoint is required")]
    NoRpc,
    #[error("Invalid resource price: {0}")]
    Price(#[from] MoneyAmountParseError),
}

impl Config {
    /// Load configuration from CLI arguments and JSON file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        Self::from_json(&content)
    }

    /// Parses and validates a JSON config document.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        if config.rpc.is_empty() {
            return Err(ConfigError::NoRpc);
        }
        config.payment_terms()?;
        Ok(config)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn rpc(&self) -> &[RpcConfig] {
        &self.rpc
    }

    pub fn chain_read_timeout(&self) -> Duration {
        Duration::from_secs(self.chain_read_timeout_secs)
    }

    pub fn receipt_secret(&self) -> &ReceiptSecret {
        self.receipt_secret.inner()
    }

    pub fn receipt_ttl_secs(&self) -> u64 {
        self.receipt_ttl_secs
    }

    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_secs)
    }

    pub fn resource(&self) -> &ResourceConfig {
        &self.resource
    }

    /// The configured price converted to smallest token units, with payout and asset.
    pub fn payment_terms(&self) -> Result<PaymentTerms, ConfigError> {
        let resource = &self.resource;
        let amount = resource.price.to_token_units(resource.asset.decimals)?;
        Ok(PaymentTerms {
            asset: resource.asset.address.0,
            pay_to: resource.pay_to.inner().0,
            amount,
        })
    }

    pub fn price_oracle(&self) -> PriceOracle {
        PriceOracle::new(
            self.resource.quotes.clone(),
            self.resource.default_quote.clone(),
            self.resource.currency.clone(),
        )
    }
}
