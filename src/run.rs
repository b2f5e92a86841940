use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors;
use x402_oracle::config::Config;
use x402_oracle::gateway::ResourceGateway;
use x402_oracle::handlers::{self, OracleState};
use x402_oracle::nonce::NonceRegistry;
use x402_oracle::receipt::ReceiptIssuer;
use x402_oracle::util::{SigDown, Telemetry};
use x402_oracle::verifier::PaymentVerifier;
use x402_oracle_eip155::Eip155ChainProvider;

/// Starts the oracle server.
///
/// - Loads `.env` variables and the JSON config.
/// - Connects to the configured RPC endpoints.
/// - Starts the nonce pruner and the Axum server, both stopped by SIGTERM or SIGINT.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Another provider may already be installed by a dependency
    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    );

    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;

    let chain = Eip155ChainProvider::connect(config.rpc())?;
    let terms = config.payment_terms()?;
    tracing::info!(
        asset = %terms.asset,
        pay_to = %terms.pay_to,
        amount = %terms.amount,
        "Payment terms loaded"
    );
    let verifier = PaymentVerifier::new(Arc::new(chain), terms, config.chain_read_timeout());
    let receipts = ReceiptIssuer::new(config.receipt_secret(), config.receipt_ttl_secs())?;
    let nonces = NonceRegistry::new();
    let gateway = ResourceGateway::new(nonces.clone(), receipts, verifier);
    let state = Arc::new(OracleState {
        gateway,
        oracle: config.price_oracle(),
    });

    let sig_down = SigDown::try_new()?;

    let nonce_ttl = config.nonce_ttl();
    let prune_period = (nonce_ttl / 4).max(Duration::from_secs(1));
    let pruner = tokio::spawn(nonces.prune_periodically(
        nonce_ttl,
        prune_period,
        sig_down.cancellation_token(),
    ));

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(state))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    sig_down.recv().await;
    if let Err(error) = pruner.await {
        tracing::warn!(%error, "Nonce pruner did not stop cleanly");
    }
    tracing::info!("Server stopped");

    Ok(())
}
