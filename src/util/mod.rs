//! Process-level helpers for the oracle server.
//!
//! - [`sig_down`] - Graceful shutdown signal handling
//! - [`telemetry`] - Log subscriber setup, with OpenTelemetry export behind the `telemetry` feature

pub mod sig_down;
pub mod telemetry;

pub use sig_down::*;
pub use telemetry::*;
