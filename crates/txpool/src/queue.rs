use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};

use kestrel_primitives::{Address, Transaction, TxHash};

/// Per-payer bookkeeping for EIP-155-style transactions: every admitted
/// transaction is recorded here, keyed by nonce, until it leaves the
/// pipeline. Transactions above the payer's next usable nonce sit here
/// until the gap below them closes.
///
/// Nonces removed out of heap order are deleted lazily: the map is the
/// source of truth and stale heap heads are dropped on the next access.
#[derive(Debug, Default)]
struct AccountQueue {
    txs: HashMap<u64, Arc<Transaction>>,
    nonces: BinaryHeap<Reverse<u64>>,
}

impl AccountQueue {
    /// Inserts or overwrites the entry at the transaction's nonce.
    fn put(&mut self, tx: Arc<Transaction>) {
        let nonce = tx.nonce;
        if self.txs.insert(nonce, tx).is_none() {
            self.nonces.push(Reverse(nonce));
        }
    }

    /// Pops and returns every entry with nonce strictly below `threshold`.
    fn forward(&mut self, threshold: u64) -> Vec<Arc<Transaction>> {
        let mut removed = Vec::new();
        loop {
            self.drop_stale_heads();
            match self.nonces.peek() {
                Some(&Reverse(nonce)) if nonce < threshold => {
                    self.nonces.pop();
                    if let Some(tx) = self.txs.remove(&nonce) {
                        removed.push(tx);
                    }
                }
                _ => break,
            }
        }
        removed
    }

    /// The maximal contiguous run of transactions starting at the minimum
    /// outstanding nonce.
    fn heading(&mut self) -> Vec<Arc<Transaction>> {
        self.drop_stale_heads();
        let Some(&Reverse(start)) = self.nonces.peek() else {
            return Vec::new();
        };

        let mut run = Vec::new();
        let mut nonce = start;
        while let Some(tx) = self.txs.get(&nonce) {
            run.push(tx.clone());
            nonce += 1;
        }
        run
    }

    fn remove(&mut self, nonce: u64) -> Option<Arc<Transaction>> {
        self.txs.remove(&nonce)
    }

    fn drop_stale_heads(&mut self) {
        while let Some(&Reverse(nonce)) = self.nonces.peek() {
            if self.txs.contains_key(&nonce) {
                break;
            }
            self.nonces.pop();
        }
    }

    fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}

/// Pool-wide future-nonce bookkeeping, one [`AccountQueue`] per payer.
/// Non-EIP-155 transactions are ignored by every operation.
#[derive(Debug, Default)]
pub(crate) struct FutureNonceQueue {
    accounts: Mutex<HashMap<Address, AccountQueue>>,
}

impl FutureNonceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, tx: &Arc<Transaction>) {
        if !tx.is_eip155() {
            return;
        }
        self.accounts
            .lock()
            .unwrap()
            .entry(tx.payer)
            .or_default()
            .put(tx.clone());
    }

    pub fn forward(&self, address: Address, threshold: u64) -> Vec<Arc<Transaction>> {
        let mut accounts = self.accounts.lock().unwrap();
        let Some(queue) = accounts.get_mut(&address) else {
            return Vec::new();
        };
        let removed = queue.forward(threshold);
        if queue.is_empty() {
            accounts.remove(&address);
        }
        removed
    }

    pub fn heading(&self, address: Address) -> Vec<Arc<Transaction>> {
        let mut accounts = self.accounts.lock().unwrap();
        accounts
            .get_mut(&address)
            .map(|queue| queue.heading())
            .unwrap_or_default()
    }

    pub fn remove(&self, address: Address, nonce: u64) -> Option<Arc<Transaction>> {
        let mut accounts = self.accounts.lock().unwrap();
        let queue = accounts.get_mut(&address)?;
        let removed = queue.remove(nonce);
        if queue.is_empty() {
            accounts.remove(&address);
        }
        removed
    }

    /// Removes the entry at `nonce` only if it holds exactly the given
    /// transaction; a replacement that arrived in the meantime is left
    /// untouched.
    pub fn remove_matching(&self, address: Address, nonce: u64, hash: TxHash) -> bool {
        let mut accounts = self.accounts.lock().unwrap();
        let Some(queue) = accounts.get_mut(&address) else {
            return false;
        };
        let matched = queue.txs.get(&nonce).is_some_and(|tx| tx.hash() == hash);
        if matched {
            queue.remove(nonce);
            if queue.is_empty() {
                accounts.remove(&address);
            }
        }
        matched
    }

    pub fn contains(&self, address: Address, nonce: u64) -> bool {
        self.accounts
            .lock()
            .unwrap()
            .get(&address)
            .is_some_and(|queue| queue.txs.contains_key(&nonce))
    }
}

#[cfg(test)]
mod tests {
    use kestrel_primitives::test_helpers::TestSigner;
    use kestrel_primitives::TxKind;

    use super::*;

    fn queue_with(signer: &TestSigner, nonces: &[u64]) -> FutureNonceQueue {
        let queue = FutureNonceQueue::new();
        for &nonce in nonces {
            queue.put(&Arc::new(signer.eip155_tx(nonce, 500)));
        }
        queue
    }

    #[test]
    fn ignores_native_transactions() {
        let signer = TestSigner::random();
        let queue = FutureNonceQueue::new();
        queue.put(&Arc::new(signer.sign_transaction(
            TxKind::Invoke,
            0,
            500,
            21_000,
            vec![1],
        )));
        assert!(!queue.contains(signer.address(), 0));
    }

    #[test]
    fn put_overwrites_same_nonce() {
        let signer = TestSigner::random();
        let queue = FutureNonceQueue::new();
        queue.put(&Arc::new(signer.eip155_tx(3, 500)));
        let replacement = Arc::new(signer.eip155_tx(3, 900));
        queue.put(&replacement);

        let run = queue.heading(signer.address());
        assert_eq!(run.len(), 1);
        assert_eq!(run[0].gas_price, 900);
    }

    #[test]
    fn forward_removes_exactly_below_threshold() {
        let signer = TestSigner::random();
        let queue = queue_with(&signer, &[0, 1, 2, 5, 8]);

        let removed = queue.forward(signer.address(), 3);
        let mut removed_nonces: Vec<u64> = removed.iter().map(|tx| tx.nonce).collect();
        removed_nonces.sort_unstable();
        assert_eq!(removed_nonces, vec![0, 1, 2]);

        for nonce in [0, 1, 2] {
            assert!(!queue.contains(signer.address(), nonce));
        }
        for nonce in [5, 8] {
            assert!(queue.contains(signer.address(), nonce));
        }

        // Heap invariant intact: the next heading starts at the new minimum.
        let run = queue.heading(signer.address());
        assert_eq!(run.len(), 1);
        assert_eq!(run[0].nonce, 5);
    }

    #[test]
    fn heading_returns_contiguous_prefix() {
        let signer = TestSigner::random();
        let queue = queue_with(&signer, &[4, 2, 3, 7]);

        let run = queue.heading(signer.address());
        let nonces: Vec<u64> = run.iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![2, 3, 4]);
    }

    #[test]
    fn remove_then_heading_skips_stale_heap_head() {
        let signer = TestSigner::random();
        let queue = queue_with(&signer, &[1, 2]);

        assert!(queue.remove(signer.address(), 1).is_some());
        let run = queue.heading(signer.address());
        let nonces: Vec<u64> = run.iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![2]);
    }

    #[test]
    fn empty_account_is_dropped() {
        let signer = TestSigner::random();
        let queue = queue_with(&signer, &[0]);
        queue.remove(signer.address(), 0);
        assert!(queue.accounts.lock().unwrap().is_empty());
    }
}
