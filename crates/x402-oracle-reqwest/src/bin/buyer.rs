//! Pays for and fetches one x402-protected URL.
//!
//! ```text
//! EVM_PRIVATE_KEY=0x... x402-buyer \
//!     --url http://localhost:3000/api/price/match_final_001 \
//!     --rpc https://bsc-dataseed.binance.org/ \
//!     --token 0xe4a47ca9be22b07ea37dbe6cb7479d7ef2f18548
//! ```
//!
//! The response body is printed to stdout. A freshly minted receipt is printed to stderr and can
//! be passed back with `--receipt` to skip payment while it is valid.

use alloy_primitives::U256;
use clap::Parser;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;
use x402_oracle_eip155::{Eip155WalletProvider, EvmPrivateKey};
use x402_oracle_reqwest::{
    DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_GAS_LIMIT, DEFAULT_MIN_GAS_BALANCE,
    DEFAULT_READ_TIMEOUT, PaymentSubmitter, SubmitterConfig,
};
use x402_oracle_types::config::RpcConfig;
use x402_oracle_types::evm::ChecksummedAddress;

#[derive(Parser, Debug)]
#[command(name = "x402-buyer")]
#[command(about = "Fetch an x402-protected resource, paying with an ERC-20 transfer")]
struct Args {
    /// Protected URL
    #[arg(long)]
    url: String,
    /// HTTP JSON-RPC endpoint of the payment chain
    #[arg(long, env = "RPC_URL")]
    rpc: Url,
    /// ERC-20 contract to pay with
    #[arg(long, env = "TOKEN_ADDRESS")]
    token: ChecksummedAddress,
    #[arg(long, env = "EVM_PRIVATE_KEY", hide_env_values = true)]
    private_key: EvmPrivateKey,
    #[arg(long, default_value_t = DEFAULT_GAS_LIMIT)]
    gas_limit: u64,
    /// Minimum native balance in wei
    #[arg(long, default_value_t = DEFAULT_MIN_GAS_BALANCE)]
    min_gas_balance: u64,
    #[arg(long, default_value_t = DEFAULT_CONFIRMATION_TIMEOUT.as_secs())]
    confirmation_timeout_secs: u64,
    /// Upper bound on the balance checks made before paying
    #[arg(long, default_value_t = DEFAULT_READ_TIMEOUT.as_secs())]
    read_timeout_secs: u64,
    /// Send EIP-1559 transactions instead of legacy ones
    #[arg(long)]
    eip1559: bool,
    /// Receipt from an earlier paid request
    #[arg(long)]
    receipt: Option<String>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Args::parse()).await {
        eprintln!("{e}");
        process::exit(1)
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let rpc = [RpcConfig {
        http: args.rpc,
        rate_limit: None,
    }];
    let wallet = Arc::new(Eip155WalletProvider::connect(
        &rpc,
        &args.private_key,
        args.eip1559,
    )?);
    let config = SubmitterConfig::new(args.token.0)
        .with_gas_limit(args.gas_limit)
        .with_min_gas_balance(U256::from(args.min_gas_balance))
        .with_confirmation_timeout(Duration::from_secs(args.confirmation_timeout_secs))
        .with_read_timeout(Duration::from_secs(args.read_timeout_secs));
    let mut submitter = PaymentSubmitter::new(wallet.clone(), wallet, config);
    if let Some(receipt) = args.receipt {
        submitter = submitter.with_receipt(receipt);
    }

    let paid = submitter.fetch(&args.url).await?;
    if let Some(transaction) = paid.transaction {
        tracing::info!(tx = %transaction, "Paid");
    }
    if let Some(receipt) = paid.receipt {
        eprintln!("receipt: {receipt}");
    }
    println!("{}", serde_json::to_string_pretty(&paid.body)?);
    Ok(())
}
