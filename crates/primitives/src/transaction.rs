use std::sync::OnceLock;

use borsh::{io, BorshDeserialize, BorshSerialize};
use kestrel_crypto_utils::keccak256::keccak256;
use kestrel_crypto_utils::secp256k1::recover_ecdsa;

use crate::{Address, TxHash};

/// Current transaction envelope version.
pub const TX_VERSION: u8 = 1;

/// Transaction format discriminator.
///
/// `Invoke` and `Deploy` are the chain-native, hash-addressed formats.
/// `Eip155` is the externally-signed sequential-nonce format; per-account
/// nonce ordering applies only to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum TxKind {
    Invoke,
    Deploy,
    Eip155,
}

/// 65-byte recoverable secp256k1 signature (compact form plus recovery id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Signature([u8; 65]);

impl Signature {
    pub const fn zero() -> Self {
        Self([0u8; 65])
    }

    pub fn from_array(arr: [u8; 65]) -> Self {
        Self(arr)
    }

    pub fn as_array(&self) -> &[u8; 65] {
        &self.0
    }
}

/// A signed transaction as it travels over the wire and through the pool.
///
/// The hash is the keccak256 digest of the borsh-serialized unsigned body
/// (everything except the signature) and is computed lazily on first access.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub version: u8,
    pub kind: TxKind,
    pub payer: Address,
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub payload: Vec<u8>,
    pub signature: Signature,
    #[borsh(skip)]
    hash: OnceLock<TxHash>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: TxKind,
        payer: Address,
        nonce: u64,
        gas_price: u64,
        gas_limit: u64,
        payload: Vec<u8>,
        signature: Signature,
    ) -> Self {
        Self {
            version: TX_VERSION,
            kind,
            payer,
            nonce,
            gas_price,
            gas_limit,
            payload,
            signature,
            hash: OnceLock::new(),
        }
    }

    /// Transaction identity, cached after the first computation.
    pub fn hash(&self) -> TxHash {
        *self
            .hash
            .get_or_init(|| TxHash::from_array(keccak256(&self.unsigned_bytes())))
    }

    /// The digest the payer signs over. Identical to the transaction hash.
    pub fn signing_digest(&self) -> [u8; 32] {
        self.hash().to_array()
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        borsh::to_vec(self)
            .expect("borsh serialization into a vec can not fail")
            .len()
    }

    /// `gas_limit * gas_price`, or `None` on overflow.
    pub fn gas_cost(&self) -> Option<u64> {
        self.gas_limit.checked_mul(self.gas_price)
    }

    pub fn is_eip155(&self) -> bool {
        self.kind == TxKind::Eip155
    }

    pub fn is_deploy(&self) -> bool {
        self.kind == TxKind::Deploy
    }

    /// Recovers the signer address from the signature. Does not compare it
    /// against the payer; see [`Transaction::verify_signature`].
    pub fn recover_signer(&self) -> Result<Address, TransactionError> {
        let digest = self.signing_digest();
        let public = recover_ecdsa(self.signature.as_array(), &digest)
            .map_err(|_| TransactionError::InvalidSignature)?;
        Ok(Address::from(public))
    }

    /// Full stateless signature check: recover the signer and require it to
    /// match the declared payer.
    pub fn verify_signature(&self) -> Result<(), TransactionError> {
        let recovered = self.recover_signer()?;
        if recovered != self.payer {
            return Err(TransactionError::SignerMismatch {
                payer: self.payer,
                recovered,
            });
        }
        Ok(())
    }

    /// Structural well-formedness checks computable from the bytes alone.
    pub fn check_structure(&self) -> Result<(), TransactionError> {
        if self.version != TX_VERSION {
            return Err(TransactionError::UnsupportedVersion(self.version));
        }
        if matches!(self.kind, TxKind::Invoke | TxKind::Deploy) && self.payload.is_empty() {
            return Err(TransactionError::EmptyPayload);
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("borsh serialization into a vec can not fail")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, io::Error> {
        Self::try_from_slice(bytes)
    }

    fn unsigned_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.payload.len());
        let write = |buf: &mut Vec<u8>| -> Result<(), io::Error> {
            self.version.serialize(buf)?;
            self.kind.serialize(buf)?;
            self.payer.serialize(buf)?;
            self.nonce.serialize(buf)?;
            self.gas_price.serialize(buf)?;
            self.gas_limit.serialize(buf)?;
            self.payload.serialize(buf)
        };
        write(&mut buf).expect("borsh serialization into a vec can not fail");
        buf
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Transaction {}

#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum TransactionError {
    #[error("unsupported transaction version {0}")]
    UnsupportedVersion(u8),
    #[error("native transaction with empty payload")]
    EmptyPayload,
    #[error("signature recovery failed")]
    InvalidSignature,
    #[error("recovered signer {recovered} does not match payer {payer}")]
    SignerMismatch { payer: Address, recovered: Address },
}
