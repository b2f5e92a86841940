//! x402 oracle HTTP entrypoint.
//!
//! Endpoints:
//! - `GET /health` - Liveness check
//! - `GET /api/price/{event_id}` - Paid price quote
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` points at the JSON config file
//! - `HOST`, `PORT` control binding address
//! - `RUST_LOG` sets the log filter
//! - `OTEL_*` variables enable OTLP export

mod run;

use std::process;

use crate::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1)
    }
}
