use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kestrel_primitives::{Address, Transaction, TxHash};
use tracing::debug;

use crate::types::{TxEntry, TxVerifyOutcome, TxVerifyStatus};

/// Result of cross-checking a proposed block's transaction list against the
/// verified table.
#[derive(Debug, Default)]
pub(crate) struct BlockPartition {
    /// Already verified at or above the requested height.
    pub verified: Vec<TxVerifyOutcome>,
    /// Verified, but at a stale height; the stale entries have been removed
    /// from the table and only the stateful check needs to be redone.
    pub reverify: Vec<Arc<Transaction>>,
    /// Not known to the table at all; need full verification.
    pub unverified: Vec<Arc<Transaction>>,
}

/// The table of fully-verified transactions available for block proposal.
/// A read-write lock allows concurrent queries with exclusive admission
/// and removal.
#[derive(Debug, Default)]
pub(crate) struct TxPool {
    entries: RwLock<HashMap<TxHash, TxEntry>>,
}

impl TxPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a verified entry. Returns false if the hash is already present.
    pub fn append_entry(&self, entry: TxEntry) -> bool {
        let mut entries = self.entries.write().unwrap();
        let hash = entry.tx.hash();
        if entries.contains_key(&hash) {
            debug!(%hash, "transaction already exists in the pool");
            return false;
        }
        entries.insert(hash, entry);
        true
    }

    /// Removes the transactions included in a committed block. Returns the
    /// number of entries actually removed.
    pub fn remove_transactions(&self, txs: &[Transaction]) -> usize {
        let mut entries = self.entries.write().unwrap();
        let mut cleaned = 0;
        for tx in txs {
            if entries.remove(&tx.hash()).is_some() {
                cleaned += 1;
            }
        }
        debug!(
            requested = txs.len(),
            cleaned,
            remaining = entries.len(),
            "cleaned committed transactions"
        );
        cleaned
    }

    pub fn delete(&self, hash: TxHash) -> bool {
        self.entries.write().unwrap().remove(&hash).is_some()
    }

    pub fn contains(&self, hash: TxHash) -> bool {
        self.entries.read().unwrap().contains_key(&hash)
    }

    pub fn get_transaction(&self, hash: TxHash) -> Option<Arc<Transaction>> {
        self.entries
            .read()
            .unwrap()
            .get(&hash)
            .map(|entry| entry.tx.clone())
    }

    pub fn get_status(&self, hash: TxHash) -> Option<TxVerifyStatus> {
        self.entries.read().unwrap().get(&hash).map(|entry| TxVerifyStatus {
            hash,
            results: entry.results.clone(),
        })
    }

    pub fn count(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Returns entries whose most recent stateful verification height is at
    /// least `height`, ordered for block proposal, plus the stale entries'
    /// transactions separately. When `by_count` is set the fresh list is
    /// truncated to `max`.
    pub fn get_txs(
        &self,
        by_count: bool,
        max: usize,
        height: u64,
    ) -> (Vec<TxEntry>, Vec<Arc<Transaction>>) {
        let entries = self.entries.read().unwrap();

        let mut fresh = Vec::with_capacity(entries.len());
        let mut stale = Vec::new();
        for entry in entries.values() {
            if entry.stateful_height() < height {
                stale.push(entry.tx.clone());
            } else {
                fresh.push(entry.clone());
            }
        }
        drop(entries);

        sort_by_network_fee(&mut fresh);
        if by_count && fresh.len() > max {
            fresh.truncate(max);
        }

        (fresh, stale)
    }

    /// Partitions a proposed block's transactions by verification state,
    /// removing stale entries from the table as it goes.
    pub fn partition_block(&self, txs: &[Arc<Transaction>], height: u64) -> BlockPartition {
        let mut entries = self.entries.write().unwrap();
        let mut partition = BlockPartition::default();

        for tx in txs {
            let hash = tx.hash();
            match entries.get(&hash) {
                None => partition.unverified.push(tx.clone()),
                Some(entry) => {
                    let stateful_height = entry.stateful_height();
                    if stateful_height < height {
                        entries.remove(&hash);
                        partition.reverify.push(tx.clone());
                    } else {
                        partition.verified.push(TxVerifyOutcome {
                            tx: tx.clone(),
                            height: stateful_height,
                            result: Ok(()),
                        });
                    }
                }
            }
        }

        partition
    }
}

/// Orders a proposal batch by network fee: EIP-155-style entries sort before
/// native entries; an EIP-155 payer's entries stay in ascending nonce order
/// regardless of gas price, the whole sequence positioned by the gas price
/// of its lowest-nonce entry; everything else sorts by descending gas price.
pub(crate) fn sort_by_network_fee(entries: &mut [TxEntry]) {
    let mut head_price: HashMap<Address, (u64, u64)> = HashMap::new();
    for entry in entries.iter().filter(|e| e.tx.is_eip155()) {
        let tx = &entry.tx;
        head_price
            .entry(tx.payer)
            .and_modify(|(price, min_nonce)| {
                if tx.nonce < *min_nonce {
                    *price = tx.gas_price;
                    *min_nonce = tx.nonce;
                }
            })
            .or_insert((tx.gas_price, tx.nonce));
    }

    entries.sort_by_key(|entry| {
        let tx = &entry.tx;
        if tx.is_eip155() {
            let (price, _) = head_price[&tx.payer];
            (0u8, Reverse(price), tx.payer, tx.nonce)
        } else {
            (1u8, Reverse(tx.gas_price), tx.payer, tx.nonce)
        }
    });
}

#[cfg(test)]
mod tests {
    use kestrel_primitives::test_helpers::TestSigner;

    use crate::types::{VerifyKind, VerifyResult};

    use super::*;

    fn entry(tx: Transaction, stateful_height: u64) -> TxEntry {
        TxEntry {
            tx: Arc::new(tx),
            results: vec![
                VerifyResult {
                    kind: VerifyKind::Stateless,
                    height: 0,
                    result: Ok(()),
                },
                VerifyResult {
                    kind: VerifyKind::Stateful,
                    height: stateful_height,
                    result: Ok(()),
                },
            ],
        }
    }

    #[test]
    fn append_rejects_duplicates() {
        let pool = TxPool::new();
        let signer = TestSigner::random();
        let e = entry(signer.invoke_tx(500), 1);

        assert!(pool.append_entry(e.clone()));
        assert!(!pool.append_entry(e));
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn remove_transactions_cleans_only_known() {
        let pool = TxPool::new();
        let signer = TestSigner::random();
        let tx1 = signer.eip155_tx(0, 600);
        let tx2 = signer.eip155_tx(1, 600);
        pool.append_entry(entry(tx1.clone(), 1));

        let cleaned = pool.remove_transactions(&[tx1.clone(), tx2]);
        assert_eq!(cleaned, 1);
        assert!(!pool.contains(tx1.hash()));
    }

    #[test]
    fn get_txs_splits_stale_entries() {
        let pool = TxPool::new();
        let signer = TestSigner::random();
        let fresh_tx = signer.eip155_tx(0, 600);
        let stale_tx = signer.eip155_tx(1, 600);
        pool.append_entry(entry(fresh_tx.clone(), 10));
        pool.append_entry(entry(stale_tx.clone(), 4));

        let (fresh, stale) = pool.get_txs(true, 100, 5);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].tx.hash(), fresh_tx.hash());
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].hash(), stale_tx.hash());
    }

    #[test]
    fn get_txs_respects_count_limit() {
        let pool = TxPool::new();
        for _ in 0..4 {
            let signer = TestSigner::random();
            pool.append_entry(entry(signer.invoke_tx(500), 1));
        }

        let (fresh, _) = pool.get_txs(true, 2, 0);
        assert_eq!(fresh.len(), 2);
        let (all, _) = pool.get_txs(false, 2, 0);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn ordering_eip155_before_native() {
        let eip_signer = TestSigner::random();
        let native_signer = TestSigner::random();
        let mut batch = vec![
            entry(native_signer.invoke_tx(9_000), 1),
            entry(eip_signer.eip155_tx(0, 600), 1),
        ];

        sort_by_network_fee(&mut batch);
        assert!(batch[0].tx.is_eip155());
        assert!(!batch[1].tx.is_eip155());
    }

    #[test]
    fn ordering_same_payer_by_nonce_overrides_gas_price() {
        let signer = TestSigner::random();
        let mut batch = vec![
            entry(signer.eip155_tx(3, 9_000), 1),
            entry(signer.eip155_tx(1, 700), 1),
            entry(signer.eip155_tx(0, 500), 1),
            entry(signer.eip155_tx(2, 8_000), 1),
        ];

        sort_by_network_fee(&mut batch);
        let nonces: Vec<u64> = batch.iter().map(|e| e.tx.nonce).collect();
        assert_eq!(nonces, vec![0, 1, 2, 3]);
    }

    #[test]
    fn ordering_different_payers_by_gas_price() {
        let cheap = TestSigner::random();
        let pricey = TestSigner::random();
        let mut batch = vec![
            entry(cheap.invoke_tx(500), 1),
            entry(pricey.invoke_tx(2_000), 1),
        ];

        sort_by_network_fee(&mut batch);
        assert_eq!(batch[0].tx.gas_price, 2_000);
        assert_eq!(batch[1].tx.gas_price, 500);
    }

    #[test]
    fn partition_block_removes_stale() {
        let pool = TxPool::new();
        let signer = TestSigner::random();
        let verified = Arc::new(signer.eip155_tx(0, 600));
        let stale = Arc::new(signer.eip155_tx(1, 600));
        let unknown = Arc::new(signer.eip155_tx(2, 600));
        pool.append_entry(entry((*verified).clone(), 8));
        pool.append_entry(entry((*stale).clone(), 2));

        let partition =
            pool.partition_block(&[verified.clone(), stale.clone(), unknown.clone()], 5);

        assert_eq!(partition.verified.len(), 1);
        assert_eq!(partition.verified[0].tx.hash(), verified.hash());
        assert_eq!(partition.verified[0].height, 8);
        assert_eq!(partition.reverify.len(), 1);
        assert_eq!(partition.reverify[0].hash(), stale.hash());
        assert_eq!(partition.unverified.len(), 1);
        assert_eq!(partition.unverified[0].hash(), unknown.hash());
        // stale entry evicted from the table
        assert!(!pool.contains(stale.hash()));
    }
}
