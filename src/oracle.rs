//! The protected payload: event price quotes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use x402_oracle_types::timestamp::UnixTimestamp;

/// Marks a response served on the strength of a receipt.
pub const RECEIPT_ACCESS_STATUS: &str = "Access via Receipt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub event_id: String,
    pub price: String,
    pub currency: String,
    pub timestamp: UnixTimestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Static price table with a fallback quote for unlisted events.
#[derive(Debug, Clone)]
pub struct PriceOracle {
    quotes: HashMap<String, String>,
    default_quote: String,
    currency: String,
}

impl PriceOracle {
    pub fn new(quotes: HashMap<String, String>, default_quote: String, currency: String) -> Self {
        Self {
            quotes,
            default_quote,
            currency,
        }
    }

    pub fn quote(&self, event_id: &str) -> PriceQuote {
        let price = self
            .quotes
            .get(event_id)
            .unwrap_or(&self.default_quote)
            .clone();
        PriceQuote {
            event_id: event_id.to_string(),
            price,
            currency: self.currency.clone(),
            timestamp: UnixTimestamp::now(),
            status: None,
        }
    }
}
