use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kestrel_primitives::{Transaction, TxHash};
use serde::{Deserialize, Serialize};

use crate::PoolError;

/// Which validator pool produced a verification result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyKind {
    Stateless,
    Stateful,
}

/// Outcome of a single verification check. Stateful results carry the
/// ledger height they were computed at, which is what staleness detection
/// keys on.
#[derive(Clone, Debug)]
pub struct VerifyResult {
    pub kind: VerifyKind,
    pub height: u64,
    pub result: Result<(), PoolError>,
}

/// A fully-verified transaction with its accumulated verification results,
/// as stored in the pool table.
#[derive(Clone, Debug)]
pub struct TxEntry {
    pub tx: Arc<Transaction>,
    pub results: Vec<VerifyResult>,
}

impl TxEntry {
    /// The height of the most recent stateful verification, zero if none
    /// was recorded.
    pub fn stateful_height(&self) -> u64 {
        self.results
            .iter()
            .filter(|r| r.kind == VerifyKind::Stateful)
            .map(|r| r.height)
            .max()
            .unwrap_or(0)
    }
}

/// Where a submission came from. Client-originated submissions (`Http`,
/// `Shard`) get a synchronous reply; `Network` gossip is fire-and-forget;
/// `Nil` marks internal resubmissions (re-verification, block
/// reconciliation).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenderKind {
    Nil,
    Network,
    Http,
    Shard,
}

impl SenderKind {
    pub fn is_client(&self) -> bool {
        matches!(self, SenderKind::Http | SenderKind::Shard)
    }
}

/// Final result reported to a submitter.
#[derive(Clone, Debug)]
pub struct TxResult {
    pub hash: TxHash,
    pub result: Result<(), PoolError>,
}

/// Verification attributes of a transaction that is in-flight or verified.
#[derive(Clone, Debug)]
pub struct TxVerifyStatus {
    pub hash: TxHash,
    pub results: Vec<VerifyResult>,
}

/// Per-transaction outcome of block reconciliation.
#[derive(Clone, Debug)]
pub struct TxVerifyOutcome {
    pub tx: Arc<Transaction>,
    pub height: u64,
    pub result: Result<(), PoolError>,
}

/// Response posted by a validator pool onto the submitting worker's
/// response channel.
#[derive(Clone, Debug)]
pub(crate) struct CheckResponse {
    pub worker_id: u8,
    pub hash: TxHash,
    pub kind: VerifyKind,
    pub height: u64,
    pub result: Result<(), PoolError>,
}

/// Running transaction statistics, updated lock-free.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    received: AtomicU64,
    rejected: AtomicU64,
    duplicates: AtomicU64,
    verified: AtomicU64,
    failed: AtomicU64,
    sig_errors: AtomicU64,
    state_errors: AtomicU64,
}

impl PoolStats {
    pub fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_verified(&self) {
        self.verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admission_failure(&self, err: &PoolError) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        if matches!(err, PoolError::Duplicate(_)) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_verify_failure(&self, err: &PoolError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if err.is_stateless_failure() {
            self.sig_errors.fetch_add(1, Ordering::Relaxed);
        } else if err.is_stateful_failure() {
            self.state_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            verified: self.verified.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            sig_errors: self.sig_errors.load(Ordering::Relaxed),
            state_errors: self.state_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatsSnapshot {
    pub received: u64,
    pub rejected: u64,
    pub duplicates: u64,
    pub verified: u64,
    pub failed: u64,
    pub sig_errors: u64,
    pub state_errors: u64,
}
