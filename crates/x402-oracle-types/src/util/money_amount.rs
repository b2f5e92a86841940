//! Human-readable currency amount parsing.
//!
//! The resource price lives in config as a human string such as `"10"` or `"0.25"`.
//! [`MoneyAmount`] parses it, and [`MoneyAmount::to_token_units`] scales it by the
//! token's decimals into the single integer used on the wire and on-chain.
//!
//! # Supported Formats
//!
//! - Plain numbers: `"100"`, `"0.01"`
//! - With currency symbols: `"$10.50"`
//! - With thousand separators: `"1,000"`, `"1,000,000.50"`
//!
//! # Example
//!
//! ```rust
//! use x402_oracle_types::util::MoneyAmount;
//!
//! let amount = MoneyAmount::parse("$10.50").unwrap();
//! assert_eq!(amount.scale(), 2);
//! assert_eq!(amount.mantissa(), 1050);
//! ```

use alloy_primitives::U256;
use regex::Regex;
use rust_decimal::Decimal;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

/// A parsed, non-negative monetary amount that remembers its input precision.
///
/// `"10.50"` has scale 2 and mantissa 1050.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyAmount(pub Decimal);

impl MoneyAmount {
    /// Number of decimal places in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// The value as an unsigned integer without the decimal point.
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }

    /// Scales the amount into the smallest unit of a token with `decimals` places.
    ///
    /// # Errors
    ///
    /// [`MoneyAmountParseError::WrongPrecision`] when the amount carries more
    /// decimal places than the token can represent, [`MoneyAmountParseError::Overflow`] when
    /// the scaled value does not fit in a `U256`.
    pub fn to_token_units(&self, decimals: u8) -> Result<U256, MoneyAmountParseError> {
        let scale = self.scale();
        let token_scale = decimals as u32;
        if scale > token_scale {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: scale,
                token: token_scale,
            });
        }
        U256::from(10u64)
            .checked_pow(U256::from(token_scale - scale))
            .and_then(|multiplier| U256::from(self.mantissa()).checked_mul(multiplier))
            .ok_or(MoneyAmountParseError::Overflow(token_scale))
    }
}

/// Errors that can occur when parsing a monetary amount.
#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error(
        "Amount must be between {} and {}",
        constants::MIN_STR,
        constants::MAX_STR
    )]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
    /// The input has more decimal places than the token supports.
    #[error("Too big of a precision: {money} vs {token} on token")]
    WrongPrecision { money: u32, token: u32 },
    #[error("Amount overflows 256 bits at {0} decimals")]
    Overflow(u32),
}

mod constants {
    use super::*;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: LazyLock<Decimal> = LazyLock::new(|| Decimal::new(1, 9));
    pub static MAX: LazyLock<Decimal> = LazyLock::new(|| Decimal::new(999_999_999, 0));
}

static NOT_NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\d\.\-]+").expect("Invalid money amount regex"));

impl MoneyAmount {
    /// Parses a human-readable currency string into a [`MoneyAmount`].
    ///
    /// Currency symbols, thousand separators, and whitespace are stripped before parsing.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a number, is negative, or is out of range.
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let cleaned = NOT_NUMERIC.replace_all(input, "");

        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;

        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }

        if parsed < *constants::MIN || parsed > *constants::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }

        Ok(MoneyAmount(parsed))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_symbols_and_separators() {
        let amount = MoneyAmount::parse("$1,000.50").unwrap();
        assert_eq!(amount.mantissa(), 100050);
        assert_eq!(amount.scale(), 2);
        assert_eq!(amount.to_string(), "1000.5");
    }

    #[test]
    fn test_parse_rejects_negative_and_garbage() {
        assert!(matches!(
            MoneyAmount::parse("-1"),
            Err(MoneyAmountParseError::Negative)
        ));
        assert!(matches!(
            MoneyAmount::parse("abc"),
            Err(MoneyAmountParseError::InvalidFormat)
        ));
        assert!(matches!(
            MoneyAmount::parse("0"),
            Err(MoneyAmountParseError::OutOfRange)
        ));
    }

    #[test]
    fn test_ten_tokens_with_18_decimals() {
        let units = MoneyAmount::parse("10").unwrap().to_token_units(18).unwrap();
        assert_eq!(units, U256::from(10u64) * U256::from(10u64).pow(U256::from(18)));
    }

    #[test]
    fn test_fractional_amount_scaled_by_decimals() {
        let units = MoneyAmount::parse("10.50").unwrap().to_token_units(6).unwrap();
        assert_eq!(units, U256::from(10_500_000u64));
    }

    #[test]
    fn test_precision_beyond_token_decimals_is_rejected() {
        let result = MoneyAmount::parse("1.234").unwrap().to_token_units(2);
        assert!(matches!(
            result,
            Err(MoneyAmountParseError::WrongPrecision { money: 3, token: 2 })
        ));
    }

    #[test]
    fn test_scaling_past_256_bits_is_an_error() {
        let amount = MoneyAmount::parse("999999999").unwrap();
        assert!(matches!(
            amount.to_token_units(255),
            Err(MoneyAmountParseError::Overflow(255))
        ));
        assert!(matches!(
            amount.to_token_units(72),
            Err(MoneyAmountParseError::Overflow(72))
        ));
        assert!(amount.to_token_units(60).is_ok());
    }
}
