use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use kestrel_ledger::LedgerProvider;
use kestrel_primitives::{Transaction, TxHash};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::server::ServerInner;
use crate::types::{CheckResponse, TxEntry, TxVerifyStatus, VerifyKind, VerifyResult};
use crate::validators::CheckRequest;
use crate::PoolError;

/// Work items dispatched to a verification worker.
#[derive(Debug)]
pub(crate) enum WorkerTask {
    /// Full verification: stateless and stateful checks run concurrently.
    Verify(Arc<Transaction>),
    /// Stateful-only re-verification; the stateless result is cached as
    /// passed.
    VerifyStateful(Arc<Transaction>),
}

/// A transaction in flight inside one worker.
#[derive(Debug)]
pub(crate) struct PendingTx {
    pub tx: Arc<Transaction>,
    pub val_time: Instant,
    pub passed_stateless: bool,
    pub passed_stateful: bool,
    pub stateful_height: u64,
    pub retries: u8,
}

impl PendingTx {
    fn new(tx: Arc<Transaction>, stateless_cached: bool) -> Self {
        Self {
            tx,
            val_time: Instant::now(),
            passed_stateless: stateless_cached,
            passed_stateful: false,
            stateful_height: 0,
            retries: 0,
        }
    }

    fn fully_passed(&self) -> bool {
        self.passed_stateless && self.passed_stateful
    }
}

/// Handle to a spawned worker, held by the pool server for dispatch, load
/// balancing, and status queries.
#[derive(Clone, Debug)]
pub(crate) struct WorkerHandle {
    sender: mpsc::Sender<WorkerTask>,
    pending: Arc<Mutex<HashMap<TxHash, PendingTx>>>,
}

impl WorkerHandle {
    /// Number of transactions this worker currently has in flight.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Non-blocking bounded dispatch; false when the worker queue is full
    /// or the worker has shut down.
    pub fn try_send(&self, task: WorkerTask) -> bool {
        self.sender.try_send(task).is_ok()
    }

    /// Partial verification attributes, if the transaction is in flight in
    /// this worker.
    pub fn get_status(&self, hash: TxHash) -> Option<TxVerifyStatus> {
        let pending = self.pending.lock().unwrap();
        let pt = pending.get(&hash)?;

        let mut results = Vec::with_capacity(2);
        if pt.passed_stateless {
            results.push(VerifyResult {
                kind: VerifyKind::Stateless,
                height: 0,
                result: Ok(()),
            });
        }
        if pt.passed_stateful {
            results.push(VerifyResult {
                kind: VerifyKind::Stateful,
                height: pt.stateful_height,
                result: Ok(()),
            });
        }
        Some(TxVerifyStatus { hash, results })
    }
}

/// One verification worker. Owns a partition of in-flight transactions and
/// an event loop that multiplexes new tasks, validator responses, and the
/// retry timer.
pub(crate) struct VerifyWorker<L: LedgerProvider> {
    id: u8,
    server: Arc<ServerInner<L>>,
    pending: Arc<Mutex<HashMap<TxHash, PendingTx>>>,
    task_rx: mpsc::Receiver<WorkerTask>,
    rsp_tx: mpsc::Sender<CheckResponse>,
    rsp_rx: mpsc::Receiver<CheckResponse>,
}

impl<L: LedgerProvider> VerifyWorker<L> {
    /// Spawns the worker's event loop and returns its handle.
    pub fn spawn(id: u8, server: Arc<ServerInner<L>>, channel_size: usize) -> WorkerHandle {
        let (task_tx, task_rx) = mpsc::channel(channel_size);
        let (rsp_tx, rsp_rx) = mpsc::channel(channel_size);
        let pending = Arc::new(Mutex::new(HashMap::new()));

        let worker = VerifyWorker {
            id,
            server,
            pending: pending.clone(),
            task_rx,
            rsp_tx,
            rsp_rx,
        };
        tokio::spawn(worker.run());

        WorkerHandle {
            sender: task_tx,
            pending,
        }
    }

    async fn run(mut self) {
        let mut expire = tokio::time::interval(self.server.config.verify_timeout);
        expire.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_task = self.task_rx.recv() => match maybe_task {
                    Some(WorkerTask::Verify(tx)) => self.verify_tx(tx),
                    Some(WorkerTask::VerifyStateful(tx)) => self.verify_stateful(tx),
                    // all handles dropped, the server is gone
                    None => break,
                },
                Some(rsp) = self.rsp_rx.recv() => self.handle_response(rsp),
                _ = expire.tick() => self.handle_expired(),
            }
        }
    }

    /// Registers a transaction and fans it out to both validator pools.
    fn verify_tx(&self, tx: Arc<Transaction>) {
        let hash = tx.hash();

        if self.server.pool.contains(hash) {
            debug!(worker = self.id, %hash, "transaction already in the pool");
            self.server.discard_duplicate(&tx);
            return;
        }

        {
            let mut pending = self.pending.lock().unwrap();
            if pending.contains_key(&hash) {
                debug!(worker = self.id, %hash, "transaction already in the verifying process");
                return;
            }
            pending.insert(hash, PendingTx::new(tx.clone(), false));
        }

        self.submit_checks(&tx, true, true);
    }

    /// Registers a transaction whose stateless check already passed and
    /// submits only the stateful check.
    fn verify_stateful(&self, tx: Arc<Transaction>) {
        let hash = tx.hash();

        {
            let mut pending = self.pending.lock().unwrap();
            if pending.contains_key(&hash) {
                debug!(worker = self.id, %hash, "transaction already in the verifying process");
                return;
            }
            pending.insert(hash, PendingTx::new(tx.clone(), true));
        }

        self.submit_checks(&tx, false, true);
    }

    fn handle_response(&self, rsp: CheckResponse) {
        if rsp.worker_id != self.id {
            return;
        }

        let mut pending = self.pending.lock().unwrap();
        let Some(pt) = pending.get_mut(&rsp.hash) else {
            return;
        };

        if let Err(err) = rsp.result {
            let tx = pt.tx.clone();
            pending.remove(&rsp.hash);
            drop(pending);
            debug!(worker = self.id, hash = %rsp.hash, %err, "verification failed");
            self.server.reject_tx(&tx, err);
            return;
        }

        if rsp.kind == VerifyKind::Stateful && rsp.height < self.server.ledger.current_height() {
            // The ledger advanced while the check was in flight; redo only
            // the stateful part.
            pt.val_time = Instant::now();
            let tx = pt.tx.clone();
            drop(pending);
            self.submit_checks(&tx, false, true);
            return;
        }

        match rsp.kind {
            VerifyKind::Stateless => pt.passed_stateless = true,
            VerifyKind::Stateful => {
                pt.passed_stateful = true;
                pt.stateful_height = pt.stateful_height.max(rsp.height);
            }
        }

        if pt.fully_passed() {
            let entry = TxEntry {
                tx: pt.tx.clone(),
                results: vec![
                    VerifyResult {
                        kind: VerifyKind::Stateless,
                        height: 0,
                        result: Ok(()),
                    },
                    VerifyResult {
                        kind: VerifyKind::Stateful,
                        height: pt.stateful_height,
                        result: Ok(()),
                    },
                ],
            };
            pending.remove(&rsp.hash);
            drop(pending);
            self.server.promote_tx(entry);
        }
    }

    /// Resubmits checks for transactions whose validator responses are
    /// overdue, failing them once the retry budget is spent.
    fn handle_expired(&self) {
        let timeout = self.server.config.verify_timeout;
        let max_retries = self.server.config.max_retries;
        let now = Instant::now();

        let mut resubmits = Vec::new();
        let mut exhausted = Vec::new();
        {
            let mut pending = self.pending.lock().unwrap();
            for pt in pending.values_mut() {
                if pt.fully_passed() || now.duration_since(pt.val_time) < timeout {
                    continue;
                }
                if pt.retries < max_retries {
                    pt.retries += 1;
                    pt.val_time = now;
                    resubmits.push((pt.tx.clone(), !pt.passed_stateless, !pt.passed_stateful));
                } else {
                    exhausted.push(pt.tx.clone());
                }
            }
            for tx in &exhausted {
                pending.remove(&tx.hash());
            }
        }

        for (tx, stateless, stateful) in resubmits {
            debug!(worker = self.id, hash = %tx.hash(), "resubmitting overdue verification");
            self.submit_checks(&tx, stateless, stateful);
        }
        for tx in exhausted {
            warn!(worker = self.id, hash = %tx.hash(), "verification retries exhausted");
            self.server.reject_tx(&tx, PoolError::RetryExhausted);
        }
    }

    fn submit_checks(&self, tx: &Arc<Transaction>, stateless: bool, stateful: bool) {
        if stateless {
            let accepted = self.server.stateless.submit_verify_task(CheckRequest {
                tx: tx.clone(),
                worker_id: self.id,
                rsp: self.rsp_tx.clone(),
            });
            if !accepted {
                warn!(worker = self.id, hash = %tx.hash(), "stateless validator pool rejected task");
            }
        }
        if stateful {
            let accepted = self.server.stateful.submit_verify_task(CheckRequest {
                tx: tx.clone(),
                worker_id: self.id,
                rsp: self.rsp_tx.clone(),
            });
            if !accepted {
                warn!(worker = self.id, hash = %tx.hash(), "stateful validator pool rejected task");
            }
        }
    }
}
