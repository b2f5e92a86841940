//! Unpadded URL-safe base64.
//!
//! Receipts are compact `header.claims.signature` strings, so every segment has to
//! survive being put in an HTTP header untouched.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as b64;

pub fn encode<T: AsRef<[u8]>>(input: T) -> String {
    b64.encode(input.as_ref())
}

/// # Errors
///
/// Returns an error if `input` contains characters outside the URL-safe alphabet or padding.
pub fn decode<T: AsRef<[u8]>>(input: T) -> Result<Vec<u8>, base64::DecodeError> {
    b64.decode(input.as_ref())
}
