use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use kestrel_ledger::LedgerProvider;
use kestrel_primitives::{Transaction, TxHash};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::nonce::NonceTracker;
use crate::pool::TxPool;
use crate::queue::FutureNonceQueue;
use crate::types::{
    PoolStats, PoolStatsSnapshot, SenderKind, TxEntry, TxResult, TxVerifyOutcome, TxVerifyStatus,
};
use crate::validators::ValidatorPool;
use crate::worker::{VerifyWorker, WorkerHandle, WorkerTask};
use crate::PoolError;

/// Hook invoked when a client-submitted transaction passes verification,
/// so the network layer can gossip it to peers.
pub trait TxBroadcaster: Send + Sync + 'static {
    fn broadcast_transaction(&self, tx: &Transaction);
}

/// A transaction the server is tracking for the lifetime of its in-flight
/// verification. Dropping the record releases the admission slot.
struct ServerPendingTx {
    tx: Arc<Transaction>,
    sender: SenderKind,
    reply: Option<oneshot::Sender<TxResult>>,
    _permit: Option<OwnedSemaphorePermit>,
}

/// State of one outstanding block-reconciliation request. Only one may be
/// live at a time.
struct PendingBlock {
    height: u64,
    processed: HashMap<TxHash, TxVerifyOutcome>,
    unprocessed: HashMap<TxHash, Arc<Transaction>>,
    done: oneshot::Sender<Vec<TxVerifyOutcome>>,
}

/// The transaction pool orchestrator: synchronous admission checks,
/// worker load balancing, query operations, and block reconciliation.
pub struct TxPoolServer<L: LedgerProvider> {
    inner: Arc<ServerInner<L>>,
}

impl<L: LedgerProvider> Clone for TxPoolServer<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub(crate) struct ServerInner<L: LedgerProvider> {
    pub(crate) config: PoolConfig,
    pub(crate) ledger: Arc<L>,
    pub(crate) pool: TxPool,
    pub(crate) stateless: ValidatorPool,
    pub(crate) stateful: ValidatorPool,
    pub(crate) nonces: NonceTracker<L>,
    pub(crate) future_queue: FutureNonceQueue,
    pub(crate) stats: PoolStats,
    pending: RwLock<HashMap<TxHash, ServerPendingTx>>,
    pending_block: Mutex<Option<PendingBlock>>,
    slots: Arc<Semaphore>,
    workers: OnceLock<Vec<WorkerHandle>>,
    broadcaster: Option<Arc<dyn TxBroadcaster>>,
}

impl<L: LedgerProvider> TxPoolServer<L> {
    /// Spawns the validator pools and verification workers and returns the
    /// server. Must be called from within a tokio runtime.
    pub fn spawn(config: PoolConfig, ledger: Arc<L>) -> Self {
        Self::spawn_with_broadcaster(config, ledger, None)
    }

    pub fn spawn_with_broadcaster(
        config: PoolConfig,
        ledger: Arc<L>,
        broadcaster: Option<Arc<dyn TxBroadcaster>>,
    ) -> Self {
        let stateless = ValidatorPool::spawn_stateless(config.stateless_validators, config.channel_size);
        let stateful = ValidatorPool::spawn_stateful(ledger.clone(), config.channel_size);

        let worker_count = config.worker_count.max(1);
        let channel_size = config.channel_size;
        let inner = Arc::new(ServerInner {
            nonces: NonceTracker::new(ledger.clone()),
            slots: Arc::new(Semaphore::new(config.slot_count.max(1))),
            ledger,
            pool: TxPool::new(),
            stateless,
            stateful,
            future_queue: FutureNonceQueue::new(),
            stats: PoolStats::default(),
            pending: RwLock::new(HashMap::new()),
            pending_block: Mutex::new(None),
            workers: OnceLock::new(),
            broadcaster,
            config,
        });

        let handles: Vec<WorkerHandle> = (0..worker_count)
            .map(|id| VerifyWorker::spawn(id as u8, inner.clone(), channel_size))
            .collect();
        if inner.workers.set(handles).is_err() {
            unreachable!("workers are set exactly once at construction");
        }

        info!(
            workers = worker_count,
            slots = inner.config.slot_count,
            "transaction pool server started"
        );
        Self { inner }
    }

    /// Runs the admission pipeline and, on success, hands the transaction
    /// to the least-loaded verification worker. Blocks on the bounded
    /// admission slots when the pipeline is saturated.
    ///
    /// The final verification outcome is delivered on `reply`; admission
    /// failures are delivered there too, as well as in the return value.
    pub async fn submit_transaction(
        &self,
        tx: Transaction,
        sender: SenderKind,
        reply: Option<oneshot::Sender<TxResult>>,
    ) -> Result<(), PoolError> {
        self.inner.submit_transaction(Arc::new(tx), sender, reply).await
    }

    /// Verified entries whose stateful height is at least `height`, ordered
    /// for block proposal, plus the stale transactions that were evicted
    /// and sent back for re-verification.
    pub fn get_tx_pool(
        &self,
        by_count: bool,
        height: u64,
    ) -> (Vec<TxEntry>, Vec<Arc<Transaction>>) {
        self.inner.get_tx_pool(by_count, height)
    }

    /// Reconciles a consensus-proposed block against the pool's
    /// verification state. Blocks until every transaction in the list has
    /// a fresh-enough verification result.
    pub async fn verify_block(
        &self,
        height: u64,
        txs: Vec<Transaction>,
    ) -> Result<Vec<TxVerifyOutcome>, PoolError> {
        self.inner.verify_block(height, txs).await
    }

    /// Removes committed transactions and advances nonce bookkeeping.
    pub fn clean_transaction_list(&self, txs: &[Transaction], height: u64) {
        self.inner.clean_transaction_list(txs, height)
    }

    /// Whether the hash is anywhere in the system, in flight or verified.
    pub fn check_transaction(&self, hash: TxHash) -> bool {
        self.inner.check_transaction(hash)
    }

    pub fn get_transaction(&self, hash: TxHash) -> Option<Arc<Transaction>> {
        self.inner.pool.get_transaction(hash)
    }

    /// Verification attributes for an in-flight or verified transaction.
    pub fn get_transaction_status(&self, hash: TxHash) -> Option<TxVerifyStatus> {
        self.inner.get_transaction_status(hash)
    }

    /// Snapshot of the transactions currently in flight.
    pub fn get_pending_txs(&self) -> Vec<Arc<Transaction>> {
        let pending = self.inner.pending.read().unwrap();
        pending.values().map(|pt| pt.tx.clone()).collect()
    }

    pub fn tx_count(&self) -> usize {
        self.inner.pool.count()
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.inner.stats.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &ServerInner<L> {
        &self.inner
    }
}

impl<L: LedgerProvider> ServerInner<L> {
    async fn submit_transaction(
        &self,
        tx: Arc<Transaction>,
        sender: SenderKind,
        mut reply: Option<oneshot::Sender<TxResult>>,
    ) -> Result<(), PoolError> {
        let hash = tx.hash();
        self.stats.inc_received();

        if let Err(err) = self.check_admission(&tx) {
            self.stats.record_admission_failure(&err);
            debug!(%hash, %err, "transaction rejected at admission");
            reply_result(&mut reply, hash, Err(err.clone()));
            return Err(err);
        }

        if tx.is_eip155() {
            let expected = self.nonces.get(tx.payer);
            // Every admitted EIP-155 transaction is recorded in the
            // future-nonce bookkeeping while it is in the pipeline.
            self.future_queue.put(&tx);
            if tx.nonce > expected {
                debug!(%hash, nonce = tx.nonce, expected, "buffered future-nonce transaction");
                reply_result(&mut reply, hash, Ok(()));
                return Ok(());
            }
        }

        // The backpressure gate: one bounded slot per in-flight
        // verification, acquired before any verification work starts.
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .expect("admission slots semaphore is never closed");

        {
            let mut pending = self.pending.write().unwrap();
            if pending.contains_key(&hash) || self.pool.contains(hash) {
                drop(pending);
                let err = PoolError::Duplicate(hash);
                self.stats.record_admission_failure(&err);
                reply_result(&mut reply, hash, Err(err.clone()));
                return Err(err);
            }
            pending.insert(
                hash,
                ServerPendingTx {
                    tx: tx.clone(),
                    sender,
                    reply: reply.take(),
                    _permit: Some(permit),
                },
            );
        }

        if !self.dispatch_to_worker(WorkerTask::Verify(tx.clone())) {
            let entry = self.pending.write().unwrap().remove(&hash);
            if tx.is_eip155() {
                self.future_queue.remove_matching(tx.payer, tx.nonce, hash);
            }
            let err = PoolError::WorkerUnavailable;
            self.stats.record_admission_failure(&err);
            warn!(%hash, "no verification worker accepted the transaction");
            if let Some(pt) = entry {
                if let Some(ch) = pt.reply {
                    let _ = ch.send(TxResult {
                        hash,
                        result: Err(err.clone()),
                    });
                }
            }
            return Err(err);
        }

        Ok(())
    }

    /// The synchronous admission pipeline, in check order: size, duplicate,
    /// capacity, gas arithmetic, gas floors, deploy floor, EIP-155 rules,
    /// optional pre-execution.
    fn check_admission(&self, tx: &Arc<Transaction>) -> Result<(), PoolError> {
        let size = tx.size();
        if size > self.config.max_tx_size {
            return Err(PoolError::TooLarge {
                size,
                max: self.config.max_tx_size,
            });
        }

        let hash = tx.hash();
        if self.pool.contains(hash) || self.pending.read().unwrap().contains_key(&hash) {
            return Err(PoolError::Duplicate(hash));
        }

        if self.pool.count() >= self.config.max_capacity {
            return Err(PoolError::PoolFull);
        }

        let Some(gas_cost) = tx.gas_cost() else {
            return Err(PoolError::GasOverflow {
                gas_limit: tx.gas_limit,
                gas_price: tx.gas_price,
            });
        };

        if tx.gas_limit < self.config.min_gas_limit {
            return Err(PoolError::GasLimitBelowFloor {
                gas_limit: tx.gas_limit,
                floor: self.config.min_gas_limit,
            });
        }
        let price_floor = self.config.min_gas_price.max(self.ledger.min_gas_price());
        if tx.gas_price < price_floor {
            return Err(PoolError::GasPriceBelowFloor {
                gas_price: tx.gas_price,
                floor: price_floor,
            });
        }

        if tx.is_deploy() && tx.gas_limit < self.config.deploy_gas_limit {
            return Err(PoolError::DeployGasTooLow {
                gas_limit: tx.gas_limit,
                floor: self.config.deploy_gas_limit,
            });
        }

        if tx.is_eip155() {
            if tx.gas_limit > self.config.max_eip_gas_limit {
                return Err(PoolError::EipGasLimitExceeded {
                    gas_limit: tx.gas_limit,
                    cap: self.config.max_eip_gas_limit,
                });
            }
            let expected = self.nonces.get(tx.payer);
            if tx.nonce < expected {
                return Err(PoolError::NonceTooLow {
                    nonce: tx.nonce,
                    expected,
                });
            }
            if self.ledger.account_balance(tx.payer) < gas_cost as u128 {
                return Err(PoolError::InsufficientBalance {
                    payer: tx.payer,
                    cost: gas_cost as u128,
                });
            }
        }

        if !self.config.disable_pre_exec {
            let pre = self
                .ledger
                .pre_execute(tx)
                .map_err(|err| PoolError::PreExecFailed(err.to_string()))?;
            if pre.gas > tx.gas_limit {
                return Err(PoolError::PreExecFailed(format!(
                    "estimated gas {} exceeds gas limit {}",
                    pre.gas, tx.gas_limit
                )));
            }
            let Some(gas_fee) = tx.gas_price.checked_mul(pre.gas) else {
                return Err(PoolError::GasOverflow {
                    gas_limit: pre.gas,
                    gas_price: tx.gas_price,
                });
            };
            if self.ledger.account_balance(tx.payer) < gas_fee as u128 {
                return Err(PoolError::InsufficientBalance {
                    payer: tx.payer,
                    cost: gas_fee as u128,
                });
            }
        }

        Ok(())
    }

    fn get_tx_pool(&self, by_count: bool, height: u64) -> (Vec<TxEntry>, Vec<Arc<Transaction>>) {
        let (fresh, stale) = self
            .pool
            .get_txs(by_count, self.config.max_tx_in_block, height);

        for tx in &stale {
            self.pool.delete(tx.hash());
            self.start_internal_verify(tx.clone(), true);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), height, "re-verifying stale pool entries");
        }

        (fresh, stale)
    }

    async fn verify_block(
        &self,
        height: u64,
        txs: Vec<Transaction>,
    ) -> Result<Vec<TxVerifyOutcome>, PoolError> {
        if txs.is_empty() {
            return Ok(Vec::new());
        }
        let txs: Vec<Arc<Transaction>> = txs.into_iter().map(Arc::new).collect();

        let (done_tx, done_rx) = oneshot::channel();
        let reverify;
        let unverified;
        {
            let mut guard = self.pending_block.lock().unwrap();
            if guard.is_some() {
                return Err(PoolError::BlockVerifyBusy);
            }

            let partition = self.pool.partition_block(&txs, height);
            reverify = partition.reverify;
            unverified = partition.unverified;

            let mut processed = HashMap::new();
            for outcome in partition.verified {
                processed.insert(outcome.tx.hash(), outcome);
            }

            if reverify.is_empty() && unverified.is_empty() {
                return Ok(processed.into_values().collect());
            }

            let mut unprocessed = HashMap::new();
            for tx in reverify.iter().chain(unverified.iter()) {
                unprocessed.insert(tx.hash(), tx.clone());
            }
            *guard = Some(PendingBlock {
                height,
                processed,
                unprocessed,
                done: done_tx,
            });
        }

        debug!(
            height,
            reverify = reverify.len(),
            unverified = unverified.len(),
            "verifying block transactions"
        );
        for tx in reverify {
            if !self.start_internal_verify(tx.clone(), true) {
                self.update_pending_block(tx.hash(), &Err(PoolError::WorkerUnavailable));
            }
        }
        for tx in unverified {
            if !self.start_internal_verify(tx.clone(), false) {
                self.update_pending_block(tx.hash(), &Err(PoolError::WorkerUnavailable));
            }
        }

        Ok(done_rx
            .await
            .expect("pending block completion channel is not dropped"))
    }

    fn clean_transaction_list(&self, txs: &[Transaction], height: u64) {
        let cleaned = self.pool.remove_transactions(txs);
        for tx in txs.iter().filter(|tx| tx.is_eip155()) {
            let next = tx.nonce.saturating_add(1);
            self.future_queue.forward(tx.payer, next);
            if self.nonces.get(tx.payer) < next {
                self.nonces.set(tx.payer, next);
            }
        }
        debug!(height, requested = txs.len(), cleaned, "block commit cleaned pool");
    }

    fn check_transaction(&self, hash: TxHash) -> bool {
        if self.pending.read().unwrap().contains_key(&hash) {
            return true;
        }
        self.pool.contains(hash)
    }

    fn get_transaction_status(&self, hash: TxHash) -> Option<TxVerifyStatus> {
        for worker in self.workers() {
            if let Some(status) = worker.get_status(hash) {
                return Some(status);
            }
        }
        self.pool.get_status(hash)
    }

    /// Registers an internal (slot-free, reply-free) verification and
    /// dispatches it; used for re-verification and block reconciliation.
    /// Returns true when the transaction is being verified, either freshly
    /// dispatched or already in flight.
    pub(crate) fn start_internal_verify(&self, tx: Arc<Transaction>, stateful_only: bool) -> bool {
        let hash = tx.hash();
        {
            let mut pending = self.pending.write().unwrap();
            if pending.contains_key(&hash) {
                return true;
            }
            pending.insert(
                hash,
                ServerPendingTx {
                    tx: tx.clone(),
                    sender: SenderKind::Nil,
                    reply: None,
                    _permit: None,
                },
            );
        }

        let task = if stateful_only {
            WorkerTask::VerifyStateful(tx)
        } else {
            WorkerTask::Verify(tx)
        };
        if !self.dispatch_to_worker(task) {
            self.pending.write().unwrap().remove(&hash);
            warn!(%hash, "no worker accepted internal verification");
            return false;
        }
        true
    }

    /// Least-loaded worker assignment with a non-blocking bounded send.
    fn dispatch_to_worker(&self, task: WorkerTask) -> bool {
        let worker = self
            .workers()
            .iter()
            .min_by_key(|worker| worker.pending_len())
            .expect("at least one worker is always spawned");
        worker.try_send(task)
    }

    /// Called by a worker when both checks passed: admit the entry into the
    /// verified table, advance the nonce bookkeeping, and release the next
    /// buffered same-payer transaction into verification.
    pub(crate) fn promote_tx(&self, entry: TxEntry) {
        let tx = entry.tx.clone();
        let hash = tx.hash();
        let height = entry.stateful_height();

        if !self.pool.append_entry(entry) {
            self.stats.inc_duplicates();
        }

        if tx.is_eip155() {
            let next = tx.nonce.saturating_add(1);
            self.nonces.set(tx.payer, next);
            self.future_queue.forward(tx.payer, next);

            if let Some(next_tx) = self.future_queue.heading(tx.payer).into_iter().next() {
                if next_tx.nonce == next {
                    debug!(
                        payer = %tx.payer,
                        nonce = next,
                        "releasing buffered transaction into verification"
                    );
                    self.start_internal_verify(next_tx, false);
                }
            }
        }

        self.stats.inc_verified();
        debug!(%hash, height, "transaction verified");
        self.finish_tx(hash, Ok(height));
    }

    /// Called by a worker when any check failed. For EIP-155-style
    /// transactions the nonce tracker is rolled back so the payer's
    /// effective next-nonce does not stay advanced past a rejected
    /// transaction.
    pub(crate) fn reject_tx(&self, tx: &Arc<Transaction>, err: PoolError) {
        let hash = tx.hash();
        if tx.is_eip155() {
            self.nonces.set_if_lower(tx.payer, tx.nonce);
            self.future_queue.remove(tx.payer, tx.nonce);
        }
        self.stats.record_verify_failure(&err);
        debug!(%hash, %err, "transaction rejected");
        self.finish_tx(hash, Err(err));
    }

    /// Called by a worker that found the transaction already verified: the
    /// nonce bookkeeping of the verified copy stays untouched.
    pub(crate) fn discard_duplicate(&self, tx: &Arc<Transaction>) {
        let hash = tx.hash();
        if tx.is_eip155() {
            self.future_queue.remove_matching(tx.payer, tx.nonce, hash);
        }
        self.stats.inc_duplicates();
        self.finish_tx(hash, Err(PoolError::Duplicate(hash)));
    }

    /// Terminal bookkeeping for one in-flight transaction: drop the server
    /// pending record (releasing its slot), notify the submitter, gossip
    /// verified HTTP submissions, and feed the pending block if one is
    /// outstanding.
    fn finish_tx(&self, hash: TxHash, outcome: Result<u64, PoolError>) {
        let record = self.pending.write().unwrap().remove(&hash);
        if let Some(record) = record {
            if outcome.is_ok() && record.sender == SenderKind::Http {
                if let Some(broadcaster) = &self.broadcaster {
                    broadcaster.broadcast_transaction(&record.tx);
                }
            }
            if let Some(reply) = record.reply {
                let _ = reply.send(TxResult {
                    hash,
                    result: outcome.clone().map(|_| ()),
                });
            }
        }

        self.update_pending_block(hash, &outcome);
    }

    fn update_pending_block(&self, hash: TxHash, outcome: &Result<u64, PoolError>) {
        let mut guard = self.pending_block.lock().unwrap();
        let Some(pending_block) = guard.as_mut() else {
            return;
        };
        let Some(tx) = pending_block.unprocessed.remove(&hash) else {
            return;
        };

        let height = match outcome {
            Ok(height) => *height,
            Err(_) => pending_block.height,
        };
        pending_block.processed.insert(
            hash,
            TxVerifyOutcome {
                tx,
                height,
                result: outcome.clone().map(|_| ()),
            },
        );

        if pending_block.unprocessed.is_empty() {
            let pending_block = guard.take().expect("checked above");
            let results: Vec<TxVerifyOutcome> = pending_block.processed.into_values().collect();
            debug!(
                height = pending_block.height,
                count = results.len(),
                "block verification complete"
            );
            let _ = pending_block.done.send(results);
        }
    }

    fn workers(&self) -> &[WorkerHandle] {
        self.workers
            .get()
            .expect("workers are set at construction")
    }
}

fn reply_result(
    reply: &mut Option<oneshot::Sender<TxResult>>,
    hash: TxHash,
    result: Result<(), PoolError>,
) {
    if let Some(ch) = reply.take() {
        let _ = ch.send(TxResult { hash, result });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use kestrel_ledger::{InMemoryLedger, LedgerError, PreExecResult};
    use kestrel_primitives::test_helpers::TestSigner;
    use kestrel_primitives::TxKind;

    use super::*;

    const FUND: u128 = 1_000_000_000_000;

    fn test_config() -> PoolConfig {
        PoolConfig {
            verify_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn spawn_server(config: PoolConfig) -> (TxPoolServer<InMemoryLedger>, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let server = TxPoolServer::spawn(config, ledger.clone());
        (server, ledger)
    }

    fn funded_signer(ledger: &InMemoryLedger) -> TestSigner {
        let signer = TestSigner::random();
        ledger.set_account(signer.address(), 0, FUND);
        signer
    }

    async fn submit_and_wait(
        server: &TxPoolServer<impl LedgerProvider>,
        tx: Transaction,
        sender: SenderKind,
    ) -> TxResult {
        let (reply, rx) = oneshot::channel();
        let _ = server.submit_transaction(tx, sender, Some(reply)).await;
        rx.await.expect("a result is always delivered")
    }

    async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn native_transaction_verifies_end_to_end() {
        let (server, ledger) = spawn_server(test_config());
        let signer = funded_signer(&ledger);
        let tx = signer.invoke_tx(600);
        let hash = tx.hash();

        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert_eq!(result.result, Ok(()));
        assert!(server.check_transaction(hash));
        assert!(server.get_transaction(hash).is_some());
        assert_eq!(server.tx_count(), 1);
        assert_eq!(server.stats().verified, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn nonce_ordered_batch_out_of_submission_order() {
        // Scenario: four same-payer EIP-155 transactions submitted out of
        // order all end up in the pool, proposed in nonce order.
        let (server, ledger) = spawn_server(test_config());
        let signer = funded_signer(&ledger);

        for nonce in [2u64, 0, 3, 1] {
            let tx = signer.eip155_tx(nonce, 600 + nonce);
            let result = submit_and_wait(&server, tx, SenderKind::Http).await;
            assert_eq!(result.result, Ok(()), "nonce {nonce} admission");
        }

        let server2 = server.clone();
        wait_until("all four transactions to verify", move || {
            server2.tx_count() == 4
        })
        .await;

        let (entries, stale) = server.get_tx_pool(true, 0);
        assert!(stale.is_empty());
        let nonces: Vec<u64> = entries.iter().map(|e| e.tx.nonce).collect();
        assert_eq!(nonces, vec![0, 1, 2, 3]);
        assert_eq!(server.inner().nonces.get(signer.address()), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_full_rejects_before_any_worker() {
        // Scenario: at capacity the server refuses admission synchronously
        // and no worker ever sees the transaction.
        let config = PoolConfig {
            max_capacity: 1,
            ..test_config()
        };
        let (server, ledger) = spawn_server(config);
        let signer = funded_signer(&ledger);

        let first = submit_and_wait(&server, signer.invoke_tx(600), SenderKind::Http).await;
        assert_eq!(first.result, Ok(()));

        let second_signer = funded_signer(&ledger);
        let tx = second_signer.invoke_tx(700);
        let hash = tx.hash();
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert_eq!(result.result, Err(PoolError::PoolFull));

        assert!(!server.check_transaction(hash));
        assert!(server.get_pending_txs().is_empty());
        assert_eq!(server.tx_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn verify_block_returns_immediately_when_all_fresh() {
        // Scenario: every proposed transaction is already verified at or
        // above the requested height.
        let (server, ledger) = spawn_server(test_config());
        ledger.set_height(5);
        let signer = funded_signer(&ledger);

        let tx0 = signer.eip155_tx(0, 600);
        let tx1 = signer.eip155_tx(1, 600);
        for tx in [tx0.clone(), tx1.clone()] {
            let result = submit_and_wait(&server, tx, SenderKind::Http).await;
            assert_eq!(result.result, Ok(()));
        }
        let server2 = server.clone();
        wait_until("both transactions to verify", move || server2.tx_count() == 2).await;

        let outcomes = server.verify_block(5, vec![tx0, tx1]).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok() && o.height >= 5));
        assert!(server.inner().pending_block.lock().unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn verify_block_verifies_unknown_transactions() {
        let (server, ledger) = spawn_server(test_config());
        let signer = funded_signer(&ledger);

        let tx0 = signer.eip155_tx(0, 600);
        let tx1 = signer.eip155_tx(1, 600);
        let outcomes = server.verify_block(0, vec![tx0.clone(), tx1.clone()]).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert!(server.check_transaction(tx0.hash()));
        assert!(server.check_transaction(tx1.hash()));
        assert!(server.inner().pending_block.lock().unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn second_concurrent_verify_block_is_refused() {
        let (server, ledger) = spawn_server(test_config());
        let signer = funded_signer(&ledger);

        let (done, _done_rx) = oneshot::channel();
        let blocker = Arc::new(signer.eip155_tx(0, 600));
        *server.inner().pending_block.lock().unwrap() = Some(PendingBlock {
            height: 1,
            processed: HashMap::new(),
            unprocessed: HashMap::from([(blocker.hash(), blocker.clone())]),
            done,
        });

        let err = server
            .verify_block(2, vec![signer.eip155_tx(1, 600)])
            .await
            .unwrap_err();
        assert_eq!(err, PoolError::BlockVerifyBusy);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn used_nonce_rejection_rolls_back_bookkeeping() {
        // Scenario: the stateful validator reports the nonce as already
        // used; afterwards the transaction is gone from every structure and
        // the tracker equals its nonce.
        let (server, ledger) = spawn_server(test_config());
        let signer = TestSigner::random();
        ledger.set_account(signer.address(), 1, FUND);
        // The tracker was seeded before the ledger advanced past nonce 0.
        server.inner().nonces.set(signer.address(), 0);

        let tx = signer.eip155_tx(0, 600);
        let hash = tx.hash();
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert_eq!(result.result, Err(PoolError::HigherNonceExists));

        assert!(!server.check_transaction(hash));
        assert!(!server.inner().future_queue.contains(signer.address(), 0));
        assert_eq!(server.inner().nonces.get(signer.address()), 0);
        assert_eq!(server.stats().state_errors, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_submission_admits_exactly_one() {
        let (server, ledger) = spawn_server(test_config());
        let signer = funded_signer(&ledger);
        let tx = signer.eip155_tx(0, 600);

        let (first, second) = tokio::join!(
            submit_and_wait(&server, tx.clone(), SenderKind::Http),
            submit_and_wait(&server, tx.clone(), SenderKind::Http),
        );

        let results = [first.result, second.result];
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok_count, 1, "exactly one admission succeeds: {results:?}");
        assert!(results.contains(&Err(PoolError::Duplicate(tx.hash()))));
        assert_eq!(server.tx_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn oversized_transaction_never_reaches_a_worker() {
        let config = PoolConfig {
            max_tx_size: 32,
            ..test_config()
        };
        let (server, ledger) = spawn_server(config);
        let signer = funded_signer(&ledger);

        let tx = signer.invoke_tx(600);
        let hash = tx.hash();
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert!(matches!(result.result, Err(PoolError::TooLarge { .. })));
        assert!(!server.check_transaction(hash));
        assert!(server.get_pending_txs().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn admission_gas_checks() {
        let (server, ledger) = spawn_server(test_config());
        let signer = funded_signer(&ledger);

        // arithmetic overflow
        let tx = signer.sign_transaction(TxKind::Eip155, 0, u64::MAX, 21_000, vec![]);
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert!(matches!(result.result, Err(PoolError::GasOverflow { .. })));

        // gas limit below the local floor
        let tx = signer.sign_transaction(TxKind::Eip155, 0, 600, 10_000, vec![]);
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert!(matches!(
            result.result,
            Err(PoolError::GasLimitBelowFloor { floor: 20_000, .. })
        ));

        // gas price below the merged floor, with the on-chain value higher
        // than the local configuration
        ledger.set_min_gas_price(1_000);
        let tx = signer.eip155_tx(0, 600);
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert!(matches!(
            result.result,
            Err(PoolError::GasPriceBelowFloor { floor: 1_000, .. })
        ));
        ledger.set_min_gas_price(0);

        // deploy transactions carry a higher gas-limit floor
        let tx = signer.sign_transaction(TxKind::Deploy, 0, 600, 30_000, vec![1]);
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert!(matches!(result.result, Err(PoolError::DeployGasTooLow { .. })));

        // eip-155 gas limit cap
        let tx = signer.sign_transaction(TxKind::Eip155, 0, 600, 9_000_000, vec![]);
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert!(matches!(
            result.result,
            Err(PoolError::EipGasLimitExceeded { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn nonce_and_balance_admission_checks() {
        let (server, ledger) = spawn_server(test_config());

        let signer = TestSigner::random();
        ledger.set_account(signer.address(), 5, FUND);
        let tx = signer.eip155_tx(3, 600);
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert_eq!(
            result.result,
            Err(PoolError::NonceTooLow {
                nonce: 3,
                expected: 5
            })
        );

        let poor = TestSigner::random();
        ledger.set_account(poor.address(), 0, 10);
        let tx = poor.eip155_tx(0, 600);
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert!(matches!(
            result.result,
            Err(PoolError::InsufficientBalance { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pre_execution_failure_rejects() {
        let (server, ledger) = spawn_server(test_config());
        let signer = funded_signer(&ledger);
        ledger.set_fail_pre_exec(true);

        let result = submit_and_wait(&server, signer.invoke_tx(600), SenderKind::Http).await;
        assert!(matches!(result.result, Err(PoolError::PreExecFailed(_))));

        // and the check is skippable via configuration
        let config = PoolConfig {
            disable_pre_exec: true,
            ..test_config()
        };
        let ledger2 = Arc::new(InMemoryLedger::new());
        ledger2.set_fail_pre_exec(true);
        let server2 = TxPoolServer::spawn(config, ledger2.clone());
        let signer2 = funded_signer(&ledger2);
        let result = submit_and_wait(&server2, signer2.invoke_tx(600), SenderKind::Http).await;
        assert_eq!(result.result, Ok(()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stale_entries_are_evicted_and_reverified() {
        let (server, ledger) = spawn_server(test_config());
        let signer = funded_signer(&ledger);

        let tx = signer.eip155_tx(0, 600);
        let hash = tx.hash();
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert_eq!(result.result, Ok(()));

        ledger.set_height(3);
        let (fresh, stale) = server.get_tx_pool(true, 3);
        assert!(fresh.is_empty());
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].hash(), hash);

        // the stale entry comes back once the stateful check reruns at the
        // new height
        let server2 = server.clone();
        wait_until("re-verification at the new height", move || {
            server2
                .get_transaction_status(hash)
                .is_some_and(|status| {
                    status
                        .results
                        .iter()
                        .any(|r| r.kind == crate::types::VerifyKind::Stateful && r.height >= 3)
                })
                && server2.tx_count() == 1
        })
        .await;

        let (fresh, stale) = server.get_tx_pool(true, 3);
        assert_eq!(fresh.len(), 1);
        assert!(stale.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn block_commit_cleans_pool_and_advances_nonces() {
        let (server, ledger) = spawn_server(test_config());
        let signer = funded_signer(&ledger);

        let tx0 = signer.eip155_tx(0, 600);
        let tx1 = signer.eip155_tx(1, 600);
        for tx in [tx0.clone(), tx1.clone()] {
            let result = submit_and_wait(&server, tx, SenderKind::Http).await;
            assert_eq!(result.result, Ok(()));
        }
        let server2 = server.clone();
        wait_until("both transactions to verify", move || server2.tx_count() == 2).await;

        server.clean_transaction_list(&[tx0.clone(), tx1.clone()], 1);
        assert_eq!(server.tx_count(), 0);
        assert!(!server.check_transaction(tx0.hash()));
        assert_eq!(server.inner().nonces.get(signer.address()), 2);
        assert!(!server.inner().future_queue.contains(signer.address(), 0));
        assert!(!server.inner().future_queue.contains(signer.address(), 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn verified_http_submissions_are_rebroadcast() {
        struct Recorder(std::sync::Mutex<Vec<TxHash>>);
        impl TxBroadcaster for Recorder {
            fn broadcast_transaction(&self, tx: &Transaction) {
                self.0.lock().unwrap().push(tx.hash());
            }
        }

        let recorder = Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
        let ledger = Arc::new(InMemoryLedger::new());
        let server = TxPoolServer::spawn_with_broadcaster(
            test_config(),
            ledger.clone(),
            Some(recorder.clone()),
        );
        let signer = funded_signer(&ledger);

        let tx = signer.invoke_tx(600);
        let hash = tx.hash();
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert_eq!(result.result, Ok(()));
        assert_eq!(*recorder.0.lock().unwrap(), vec![hash]);

        // network-gossip submissions are not echoed back out
        let other = funded_signer(&ledger);
        let result = submit_and_wait(&server, other.invoke_tx(600), SenderKind::Network).await;
        assert_eq!(result.result, Ok(()));
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    /// Ledger whose `is_committed` stalls while the flag is set, starving
    /// the stateful validator of responses.
    struct StallingLedger {
        inner: InMemoryLedger,
        stall: AtomicBool,
    }

    impl LedgerProvider for StallingLedger {
        fn pre_execute(&self, tx: &Transaction) -> Result<PreExecResult, LedgerError> {
            self.inner.pre_execute(tx)
        }
        fn account_nonce(&self, address: kestrel_primitives::Address) -> Option<u64> {
            self.inner.account_nonce(address)
        }
        fn account_balance(&self, address: kestrel_primitives::Address) -> u128 {
            self.inner.account_balance(address)
        }
        fn is_committed(&self, hash: TxHash) -> bool {
            while self.stall.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(10));
            }
            self.inner.is_committed(hash)
        }
        fn current_height(&self) -> u64 {
            self.inner.current_height()
        }
        fn min_gas_price(&self) -> u64 {
            self.inner.min_gas_price()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn unanswered_verification_exhausts_retries() {
        let config = PoolConfig {
            verify_timeout: Duration::from_millis(100),
            max_retries: 1,
            ..test_config()
        };
        let ledger = Arc::new(StallingLedger {
            inner: InMemoryLedger::new(),
            stall: AtomicBool::new(true),
        });
        let server = TxPoolServer::spawn(config, ledger.clone());

        let signer = TestSigner::random();
        ledger.inner.set_account(signer.address(), 0, FUND);

        let tx = signer.eip155_tx(0, 600);
        let hash = tx.hash();
        let result = submit_and_wait(&server, tx, SenderKind::Http).await;
        assert_eq!(result.result, Err(PoolError::RetryExhausted));
        assert!(!server.check_transaction(hash));
        assert_eq!(server.inner().nonces.get(signer.address()), 0);

        ledger.stall.store(false, Ordering::Relaxed);
    }
}
