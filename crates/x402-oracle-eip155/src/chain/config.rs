use alloy_primitives::B256;
use std::fmt::{Debug, Formatter};
use std::str::FromStr;

/// A validated EVM private key (32 bytes).
///
/// Usually arrives through [`LiteralOrEnv`](x402_oracle_types::config::LiteralOrEnv) or a
/// CLI flag backed by `EVM_PRIVATE_KEY`. `Debug` output is redacted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EvmPrivateKey(B256);

impl EvmPrivateKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0.0
    }
}

impl Debug for EvmPrivateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("EvmPrivateKey(<redacted>)")
    }
}

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s.trim())
            .map(Self)
            .map_err(|e| format!("Invalid evm private key: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_redact() {
        let key: EvmPrivateKey =
            "0xcafe000000000000000000000000000000000000000000000000000000000001"
                .parse()
                .unwrap();
        assert_eq!(key.as_bytes()[0], 0xca);
        assert_eq!(format!("{key:?}"), "EvmPrivateKey(<redacted>)");
        assert!("0x1234".parse::<EvmPrivateKey>().is_err());
    }
}
