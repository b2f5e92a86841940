//! Helper types used by the oracle server and the buyer client.
//!
//! - [`b64url`] - Unpadded URL-safe base64, the alphabet of compact JWS segments
//! - [`money_amount`] - Human-readable currency amount parsing

pub mod b64url;
pub mod money_amount;

pub use money_amount::*;
