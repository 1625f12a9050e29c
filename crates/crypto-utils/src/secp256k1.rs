use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
pub use secp256k1::PublicKey;
use secp256k1::{Message, SecretKey, SECP256K1};

/// Recovers the signer public key from a 65-byte recoverable signature
/// and the 32-byte message digest it was produced over.
pub fn recover_ecdsa(sig: &[u8; 65], digest: &[u8; 32]) -> Result<PublicKey, secp256k1::Error> {
    let sig =
        RecoverableSignature::from_compact(&sig[0..64], RecoveryId::try_from(sig[64] as i32)?)?;

    SECP256K1.recover_ecdsa(&Message::from_digest(*digest), &sig)
}

/// Signs the 32-byte digest with the given secret key and returns the
/// 65-byte recoverable signature (64 compact bytes plus recovery id).
pub fn sign_ecdsa(secret: &[u8; 32], digest: &[u8; 32]) -> [u8; 65] {
    let secret =
        SecretKey::from_byte_array(secret).expect("32 bytes array to secret key can not fail");
    let (rec_id, sig) = SECP256K1
        .sign_ecdsa_recoverable(&Message::from_digest(*digest), &secret)
        .serialize_compact();

    let mut full_sig = [0u8; 65];
    full_sig[0..64].copy_from_slice(&sig);
    full_sig[64] = rec_id as u8;

    full_sig
}

/// Returns the uncompressed SEC1 encoding of the public key without
/// the leading 0x04 tag byte.
pub fn public_key_bytes(public: &PublicKey) -> [u8; 64] {
    public.serialize_uncompressed()[1..]
        .try_into()
        .expect("uncompressed public key is exactly 65 bytes")
}

#[cfg(any(test, feature = "test-helpers"))]
pub fn random_keypair() -> (SecretKey, PublicKey) {
    secp256k1::generate_keypair(&mut rand::thread_rng())
}

#[cfg(test)]
mod tests {
    use super::{public_key_bytes, recover_ecdsa, sign_ecdsa};
    use crate::secp256k1::random_keypair;

    #[test]
    fn sign_then_recover() {
        let (secret, public) = random_keypair();

        let digest = b"10101010101010101010101010101010";
        let signature = sign_ecdsa(&secret.secret_bytes(), digest);

        let recovered = recover_ecdsa(&signature, digest).expect("no error in recover ecdsa");
        assert_eq!(recovered, public);
    }

    #[test]
    fn tampered_digest_recovers_different_key() {
        let (secret, public) = random_keypair();

        let signature = sign_ecdsa(&secret.secret_bytes(), b"22222222222222222222222222222222");
        if let Ok(recovered) = recover_ecdsa(&signature, b"33333333333333333333333333333333") {
            assert_ne!(recovered, public);
        }
    }

    #[test]
    fn public_key_bytes_length() {
        let (_, public) = random_keypair();
        assert_eq!(public_key_bytes(&public).len(), 64);
    }
}
