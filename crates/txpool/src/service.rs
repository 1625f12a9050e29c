use std::sync::Arc;

use kestrel_ledger::LedgerProvider;
use kestrel_primitives::{Transaction, TxHash};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::config::PoolConfig;
use crate::server::{TxBroadcaster, TxPoolServer};
use crate::types::{
    PoolStatsSnapshot, SenderKind, TxEntry, TxResult, TxVerifyOutcome, TxVerifyStatus,
};
use crate::PoolError;

const CHANNEL_SIZE: usize = 1024;

/// Typed requests delivered to the pool service's dispatch loop. The
/// concrete transport behind [`TxPoolHandle`] is an in-process channel;
/// RPC and gossip layers wrap it.
#[derive(Debug)]
pub enum PoolRequest {
    Submit {
        tx: Box<Transaction>,
        sender: SenderKind,
        reply: Option<oneshot::Sender<TxResult>>,
    },
    GetTxPool {
        by_count: bool,
        height: u64,
        reply: oneshot::Sender<Vec<TxEntry>>,
    },
    VerifyBlock {
        height: u64,
        txs: Vec<Transaction>,
        reply: oneshot::Sender<Result<Vec<TxVerifyOutcome>, PoolError>>,
    },
    BlockCommitted {
        height: u64,
        txs: Vec<Transaction>,
    },
    CheckTransaction {
        hash: TxHash,
        reply: oneshot::Sender<bool>,
    },
    GetTransaction {
        hash: TxHash,
        reply: oneshot::Sender<Option<Arc<Transaction>>>,
    },
    GetTransactionStatus {
        hash: TxHash,
        reply: oneshot::Sender<Option<TxVerifyStatus>>,
    },
    GetStats {
        reply: oneshot::Sender<PoolStatsSnapshot>,
    },
}

/// Cloneable client of the pool service.
#[derive(Clone, Debug)]
pub struct TxPoolHandle {
    request_sender: mpsc::Sender<PoolRequest>,
}

impl TxPoolHandle {
    /// Submits a client transaction and waits for its final verification
    /// result.
    pub async fn submit_transaction(
        &self,
        tx: Transaction,
        sender: SenderKind,
    ) -> anyhow::Result<TxResult> {
        let (reply, rx) = oneshot::channel();
        self.request_sender
            .send(PoolRequest::Submit {
                tx: Box::new(tx),
                sender,
                reply: Some(reply),
            })
            .await?;
        Ok(rx.await?)
    }

    /// Fire-and-forget submission for network-gossip transactions; failures
    /// only update counters.
    pub fn submit_transaction_gossip(&self, tx: Transaction) -> anyhow::Result<()> {
        self.request_sender.try_send(PoolRequest::Submit {
            tx: Box::new(tx),
            sender: SenderKind::Network,
            reply: None,
        })?;
        Ok(())
    }

    /// Verified entries for a block proposal at the given height.
    pub async fn get_tx_pool(&self, by_count: bool, height: u64) -> anyhow::Result<Vec<TxEntry>> {
        let (reply, rx) = oneshot::channel();
        self.request_sender
            .send(PoolRequest::GetTxPool {
                by_count,
                height,
                reply,
            })
            .await?;
        Ok(rx.await?)
    }

    /// Block reconciliation on behalf of consensus; resolves when every
    /// transaction in the list has a fresh verification result.
    pub async fn verify_block(
        &self,
        height: u64,
        txs: Vec<Transaction>,
    ) -> anyhow::Result<Vec<TxVerifyOutcome>> {
        let (reply, rx) = oneshot::channel();
        self.request_sender
            .send(PoolRequest::VerifyBlock { height, txs, reply })
            .await?;
        Ok(rx.await??)
    }

    /// Notifies the pool that a block was durably committed.
    pub async fn block_committed(&self, height: u64, txs: Vec<Transaction>) -> anyhow::Result<()> {
        self.request_sender
            .send(PoolRequest::BlockCommitted { height, txs })
            .await?;
        Ok(())
    }

    pub async fn check_transaction(&self, hash: TxHash) -> anyhow::Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.request_sender
            .send(PoolRequest::CheckTransaction { hash, reply })
            .await?;
        Ok(rx.await?)
    }

    pub async fn get_transaction(&self, hash: TxHash) -> anyhow::Result<Option<Arc<Transaction>>> {
        let (reply, rx) = oneshot::channel();
        self.request_sender
            .send(PoolRequest::GetTransaction { hash, reply })
            .await?;
        Ok(rx.await?)
    }

    pub async fn get_transaction_status(
        &self,
        hash: TxHash,
    ) -> anyhow::Result<Option<TxVerifyStatus>> {
        let (reply, rx) = oneshot::channel();
        self.request_sender
            .send(PoolRequest::GetTransactionStatus { hash, reply })
            .await?;
        Ok(rx.await?)
    }

    pub async fn get_stats(&self) -> anyhow::Result<PoolStatsSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.request_sender
            .send(PoolRequest::GetStats { reply })
            .await?;
        Ok(rx.await?)
    }
}

/// The dispatch loop that turns transport requests into server calls.
/// Submission and block verification block on pool internals, so each runs
/// in its own task; queries are answered inline.
pub struct TxPoolService<L: LedgerProvider> {
    server: TxPoolServer<L>,
    request_rx: mpsc::Receiver<PoolRequest>,
}

impl<L: LedgerProvider> TxPoolService<L> {
    /// Builds the pool server and the service wrapped around it. Must be
    /// called from within a tokio runtime.
    pub fn new(config: PoolConfig, ledger: Arc<L>) -> (Self, TxPoolHandle) {
        Self::with_broadcaster(config, ledger, None)
    }

    pub fn with_broadcaster(
        config: PoolConfig,
        ledger: Arc<L>,
        broadcaster: Option<Arc<dyn TxBroadcaster>>,
    ) -> (Self, TxPoolHandle) {
        let server = TxPoolServer::spawn_with_broadcaster(config, ledger, broadcaster);
        let (request_sender, request_rx) = mpsc::channel(CHANNEL_SIZE);
        (
            Self { server, request_rx },
            TxPoolHandle { request_sender },
        )
    }

    pub fn server(&self) -> &TxPoolServer<L> {
        &self.server
    }

    /// Runs until every handle is dropped. Consumes self and should be
    /// used in `tokio::spawn`.
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            match request {
                PoolRequest::Submit { tx, sender, reply } => {
                    let server = self.server.clone();
                    tokio::spawn(async move {
                        let _ = server.submit_transaction(*tx, sender, reply).await;
                    });
                }
                PoolRequest::GetTxPool {
                    by_count,
                    height,
                    reply,
                } => {
                    let (entries, _stale) = self.server.get_tx_pool(by_count, height);
                    let _ = reply.send(entries);
                }
                PoolRequest::VerifyBlock { height, txs, reply } => {
                    let server = self.server.clone();
                    tokio::spawn(async move {
                        let _ = reply.send(server.verify_block(height, txs).await);
                    });
                }
                PoolRequest::BlockCommitted { height, txs } => {
                    self.server.clean_transaction_list(&txs, height);
                }
                PoolRequest::CheckTransaction { hash, reply } => {
                    let _ = reply.send(self.server.check_transaction(hash));
                }
                PoolRequest::GetTransaction { hash, reply } => {
                    let _ = reply.send(self.server.get_transaction(hash));
                }
                PoolRequest::GetTransactionStatus { hash, reply } => {
                    let _ = reply.send(self.server.get_transaction_status(hash));
                }
                PoolRequest::GetStats { reply } => {
                    let _ = reply.send(self.server.stats());
                }
            }
        }
        info!("transaction pool service stopped");
    }
}
