use tiny_keccak::{Hasher, Keccak};

/// Computes the keccak256 digest of the given bytes.
pub fn keccak256(msg: &[u8]) -> [u8; 32] {
    let mut keccak = Keccak::v256();
    keccak.update(msg);
    let mut digest = [0u8; 32];
    keccak.finalize(&mut digest);
    digest
}
