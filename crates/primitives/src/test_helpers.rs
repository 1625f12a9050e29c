//! Helpers for constructing validly-signed transactions in tests.

use kestrel_crypto_utils::secp256k1::{random_keypair, sign_ecdsa};

use crate::{Address, Signature, Transaction, TxKind};

/// A throwaway secp256k1 keypair with its derived payer address.
#[derive(Clone, Copy, Debug)]
pub struct TestSigner {
    secret: [u8; 32],
    address: Address,
}

impl TestSigner {
    pub fn random() -> Self {
        let (secret, public) = random_keypair();
        Self {
            secret: secret.secret_bytes(),
            address: Address::from(public),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Builds and signs a transaction from this signer's key.
    pub fn sign_transaction(
        &self,
        kind: TxKind,
        nonce: u64,
        gas_price: u64,
        gas_limit: u64,
        payload: Vec<u8>,
    ) -> Transaction {
        let mut tx = Transaction::new(
            kind,
            self.address,
            nonce,
            gas_price,
            gas_limit,
            payload,
            Signature::zero(),
        );
        tx.signature = Signature::from_array(sign_ecdsa(&self.secret, &tx.signing_digest()));
        tx
    }

    /// An EIP-155-style transaction with the given nonce and gas price.
    pub fn eip155_tx(&self, nonce: u64, gas_price: u64) -> Transaction {
        self.sign_transaction(TxKind::Eip155, nonce, gas_price, 21_000, vec![])
    }

    /// A native invoke transaction with the given gas price.
    pub fn invoke_tx(&self, gas_price: u64) -> Transaction {
        self.sign_transaction(TxKind::Invoke, 0, gas_price, 200_000, vec![0xca, 0xfe])
    }
}
