use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kestrel_ledger::LedgerProvider;
use kestrel_primitives::Address;

/// Per-account virtual nonce cache layered over the ledger's committed
/// nonce. Entries are lazily populated from the ledger on first read and
/// afterwards mutated only by the pool; the ledger is never re-read for an
/// address that is already cached.
#[derive(Debug)]
pub(crate) struct NonceTracker<L> {
    ledger: Arc<L>,
    nonces: Mutex<HashMap<Address, u64>>,
}

impl<L: LedgerProvider> NonceTracker<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self {
            ledger,
            nonces: Mutex::new(HashMap::new()),
        }
    }

    /// The next usable nonce for the address.
    pub fn get(&self, address: Address) -> u64 {
        let mut nonces = self.nonces.lock().unwrap();
        *nonces
            .entry(address)
            .or_insert_with(|| self.ledger.account_nonce(address).unwrap_or(0))
    }

    /// Unconditionally overwrites the cached nonce. Used when a transaction
    /// with this address is fully promoted into the pool.
    pub fn set(&self, address: Address, nonce: u64) {
        self.nonces.lock().unwrap().insert(address, nonce);
    }

    /// Overwrites the cached nonce only if the new value is lower than the
    /// cached one, or nothing is cached yet. Used on rejection so a failed
    /// transaction does not leave the tracker advanced past it.
    pub fn set_if_lower(&self, address: Address, nonce: u64) {
        let mut nonces = self.nonces.lock().unwrap();
        match nonces.get_mut(&address) {
            Some(current) if *current <= nonce => {}
            Some(current) => *current = nonce,
            None => {
                nonces.insert(address, nonce);
            }
        }
    }
}
