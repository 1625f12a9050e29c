use std::fmt::Display;

use borsh::{BorshDeserialize, BorshSerialize};
use kestrel_crypto_utils::keccak256::keccak256;
use kestrel_crypto_utils::secp256k1::{public_key_bytes, PublicKey};
use serde::{Deserialize, Serialize};

/// 20-byte account identifier, derived from the low 20 bytes of the
/// keccak256 digest of the uncompressed secp256k1 public key.
#[derive(
    Clone,
    Copy,
    Debug,
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
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    /// Try converting 0x-prefixed hex string to `Address`
    pub fn try_from_str(s: &str) -> Result<Self, AddressConversionError> {
        if !s.starts_with("0x") {
            return Err(AddressConversionError::Missing0xPrefix);
        }

        let mut arr = [0u8; 20];
        hex::decode_to_slice(&s[2..], &mut arr)?;

        Ok(Self(arr))
    }

    pub fn try_from_slice(slice: &[u8]) -> Result<Self, AddressConversionError> {
        Ok(Self(
            slice
                .try_into()
                .map_err(|_| AddressConversionError::TryFromSliceError)?,
        ))
    }

    pub fn from_array(arr: [u8; 20]) -> Self {
        Self(arr)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_array(&self) -> [u8; 20] {
        self.0
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<PublicKey> for Address {
    fn from(public: PublicKey) -> Self {
        let digest = keccak256(&public_key_bytes(&public));
        Address::from_array(digest[12..].try_into().expect("Exactly 20 bytes array"))
    }
}

#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum AddressConversionError {
    #[error("missing 0x prefix")]
    Missing0xPrefix,
    #[error("{0}")]
    FromHexError(#[from] hex::FromHexError),
    #[error("could not convert slice to address")]
    TryFromSliceError,
}

#[cfg(test)]
mod tests {
    use kestrel_crypto_utils::secp256k1::random_keypair;

    use super::{Address, AddressConversionError};

    #[test]
    fn hex_address_roundtrip() {
        let address = Address::random();
        let s = address.to_string();
        assert!(s.starts_with("0x"));
        assert_eq!(Address::try_from_str(&s).unwrap(), address);
    }

    #[test]
    fn rejects_unprefixed_hex() {
        let err = Address::try_from_str("000102030405060708090a0b0c0d0e0f10111213");
        assert_eq!(err, Err(AddressConversionError::Missing0xPrefix));
    }

    #[test]
    fn slice_conversion() {
        let address = Address::random();
        assert_eq!(Address::try_from_slice(address.as_slice()).unwrap(), address);
        assert!(Address::try_from_slice(&[0u8; 19]).is_err());
    }

    #[test]
    fn from_public_key_is_deterministic() {
        let (_, public) = random_keypair();
        assert_eq!(Address::from(public), Address::from(public));
    }
}
