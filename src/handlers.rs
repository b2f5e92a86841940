//! HTTP endpoints of the oracle.
//!
//! - `GET /health` - Liveness check, never gated
//! - `GET /api/price/{event_id}` - Price quote, gated by [`ResourceGateway`]
//!
//! The gated route answers `200` with the quote (plus a `receipt` after a fresh settlement),
//! `402` with a payment challenge, or `403` when a presented proof does not hold up.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;
use x402_oracle_types::proto::{
    ChallengeBody, ErrorResponse, GrantedResponse, NONCE_HEADER, PAYMENT_PROOF_HEADER,
    RECEIPT_HEADER,
};

use crate::gateway::{Credentials, GatewayDecision, ResourceGateway};
use crate::oracle::{PriceOracle, RECEIPT_ACCESS_STATUS};

/// Shared state of all handlers.
#[derive(Debug, Clone)]
pub struct OracleState {
    pub gateway: ResourceGateway,
    pub oracle: PriceOracle,
}

pub fn routes() -> Router<Arc<OracleState>> {
    Router::new()
        .route("/health", get(get_health))
        .route("/api/price/{event_id}", get(get_price))
}

/// `GET /health`
#[instrument(skip_all)]
pub async fn get_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `GET /api/price/{event_id}`: the paid price quote for one event.
#[instrument(skip_all, fields(event_id = %event_id))]
pub async fn get_price(
    State(state): State<Arc<OracleState>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let credentials = credentials(&headers);
    match state.gateway.handle(&event_id, &credentials).await {
        GatewayDecision::Granted { receipt: None } => {
            let mut quote = state.oracle.quote(&event_id);
            quote.status = Some(RECEIPT_ACCESS_STATUS.to_string());
            let body = GrantedResponse {
                payload: quote,
                receipt: None,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        GatewayDecision::Granted {
            receipt: Some(receipt),
        } => {
            let body = GrantedResponse {
                payload: state.oracle.quote(&event_id),
                receipt: Some(receipt.into_inner()),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        GatewayDecision::PaymentRequired(challenge) => (
            StatusCode::PAYMENT_REQUIRED,
            Json(ChallengeBody::from(challenge)),
        )
            .into_response(),
        GatewayDecision::Forbidden(denial) => (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new(format!(
                "Payment verification failed: {denial}"
            ))),
        )
            .into_response(),
    }
}

fn credentials(headers: &HeaderMap) -> Credentials {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    Credentials {
        receipt: header(RECEIPT_HEADER),
        proof_transaction: header(PAYMENT_PROOF_HEADER),
        proof_nonce: header(NONCE_HEADER),
    }
}
