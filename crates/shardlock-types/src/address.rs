use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A 20-byte account address, the node key of the entity graph.
///
/// Parsing accepts `0x`-prefixed or bare hex in any letter case; the address
/// is always rendered lowercase with a `0x` prefix so that two shards that
/// saw the same account in different casings agree on the node key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex with `0x` prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Short representation (first 4 bytes) for log lines.
    pub fn short_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0[..4]))
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(digits).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 20 {
            return Err(TypeError::InvalidLength {
                expected: 20,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Address {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_normalizes_case() {
        let a: Address = "0xAbCdEf0000000000000000000000000000000001".parse().unwrap();
        let b: Address = "abcdef0000000000000000000000000000000001".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "0xabcdef0000000000000000000000000000000001");
    }

    #[test]
    fn wrong_length_rejected() {
        let err = Address::from_hex("0x1234").unwrap_err();
        assert_eq!(err, TypeError::InvalidLength { expected: 20, actual: 2 });
    }

    #[test]
    fn non_hex_rejected() {
        assert!(matches!(
            Address::from_hex("0xzz00000000000000000000000000000000000000"),
            Err(TypeError::InvalidHex(_))
        ));
    }

    proptest! {
        #[test]
        fn display_parses_back(bytes in proptest::array::uniform20(any::<u8>())) {
            let addr = Address::from_bytes(bytes);
            let parsed: Address = addr.to_string().parse().unwrap();
            prop_assert_eq!(parsed, addr);
        }
    }
}
