use std::fmt::Display;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// 32-byte transaction digest.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_array(arr: [u8; 32]) -> Self {
        Self(arr)
    }

    pub fn try_from_str(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut arr = [0u8; 32];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(Self(arr))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_array(&self) -> [u8; 32] {
        self.0
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::TxHash;

    #[test]
    fn hex_roundtrip() {
        let hash = TxHash::random();
        assert_eq!(TxHash::try_from_str(&hash.to_string()).unwrap(), hash);
    }

    #[test]
    fn accepts_unprefixed_hex() {
        let hash = TxHash::random();
        let s = hash.to_string();
        assert_eq!(TxHash::try_from_str(&s[2..]).unwrap(), hash);
    }
}
