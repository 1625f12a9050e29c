use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kestrel_ledger::LedgerProvider;
use kestrel_primitives::Transaction;
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::{CheckResponse, VerifyKind};
use crate::PoolError;

/// A verification task handed to a validator pool. The response lands on
/// the submitting worker's channel; the submitter never blocks on it.
#[derive(Debug)]
pub(crate) struct CheckRequest {
    pub tx: Arc<Transaction>,
    pub worker_id: u8,
    pub rsp: mpsc::Sender<CheckResponse>,
}

/// A bounded pool of validator tasks of one kind. The stateless pool runs
/// with several tasks since its checks are pure functions of the
/// transaction bytes; the stateful pool runs a single task so ledger reads
/// are serialized across concurrent verifications.
#[derive(Debug)]
pub(crate) struct ValidatorPool {
    kind: VerifyKind,
    senders: Vec<mpsc::Sender<CheckRequest>>,
    next: AtomicUsize,
}

impl ValidatorPool {
    pub fn spawn_stateless(count: usize, channel_size: usize) -> Self {
        let senders = (0..count.max(1))
            .map(|id| {
                let (sender, receiver) = mpsc::channel(channel_size);
                tokio::spawn(stateless_validator(id, receiver));
                sender
            })
            .collect();

        Self {
            kind: VerifyKind::Stateless,
            senders,
            next: AtomicUsize::new(0),
        }
    }

    pub fn spawn_stateful<L: LedgerProvider>(ledger: Arc<L>, channel_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel(channel_size);
        tokio::spawn(stateful_validator(ledger, receiver));

        Self {
            kind: VerifyKind::Stateful,
            senders: vec![sender],
            next: AtomicUsize::new(0),
        }
    }

    /// Non-blocking bounded submission, round-robin across the pool's
    /// tasks. Returns false when every task queue is full or closed; the
    /// caller's retry policy covers the drop.
    pub fn submit_verify_task(&self, mut req: CheckRequest) -> bool {
        for _ in 0..self.senders.len() {
            let index = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
            match self.senders[index].try_send(req) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Full(returned))
                | Err(mpsc::error::TrySendError::Closed(returned)) => req = returned,
            }
        }
        trace!(kind = ?self.kind, "validator pool saturated, dropping check request");
        false
    }
}

async fn stateless_validator(id: usize, mut receiver: mpsc::Receiver<CheckRequest>) {
    while let Some(req) = receiver.recv().await {
        let result = check_stateless(&req.tx);
        let rsp = CheckResponse {
            worker_id: req.worker_id,
            hash: req.tx.hash(),
            kind: VerifyKind::Stateless,
            height: 0,
            result,
        };
        trace!(validator = id, hash = %rsp.hash, ok = rsp.result.is_ok(), "stateless check done");
        if req.rsp.send(rsp).await.is_err() {
            return;
        }
    }
}

async fn stateful_validator<L: LedgerProvider>(
    ledger: Arc<L>,
    mut receiver: mpsc::Receiver<CheckRequest>,
) {
    while let Some(req) = receiver.recv().await {
        let height = ledger.current_height();
        let result = check_stateful(ledger.as_ref(), &req.tx);
        let rsp = CheckResponse {
            worker_id: req.worker_id,
            hash: req.tx.hash(),
            kind: VerifyKind::Stateful,
            height,
            result,
        };
        trace!(hash = %rsp.hash, height, ok = rsp.result.is_ok(), "stateful check done");
        if req.rsp.send(rsp).await.is_err() {
            return;
        }
    }
}

/// Signature validity and structural well-formedness. Pure function of the
/// transaction bytes.
fn check_stateless(tx: &Transaction) -> Result<(), PoolError> {
    tx.check_structure()
        .map_err(|err| PoolError::InvalidTransaction(err.to_string()))?;
    tx.verify_signature()
        .map_err(|err| PoolError::InvalidTransaction(err.to_string()))?;
    Ok(())
}

/// Ledger-consistent checks: duplicate committed hash, and nonce
/// consistency for EIP-155-style transactions.
fn check_stateful<L: LedgerProvider>(ledger: &L, tx: &Transaction) -> Result<(), PoolError> {
    if ledger.is_committed(tx.hash()) {
        return Err(PoolError::AlreadyCommitted);
    }

    if tx.is_eip155() {
        match ledger.account_nonce(tx.payer) {
            None if tx.nonce != 0 => return Err(PoolError::UnknownAccount),
            Some(committed_next) if committed_next > tx.nonce => {
                return Err(PoolError::HigherNonceExists)
            }
            _ => {}
        }
    }

    Ok(())
}
