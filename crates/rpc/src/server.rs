use jsonrpsee::core::RpcResult;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::error::{ErrorObjectOwned, INTERNAL_ERROR_CODE, INVALID_PARAMS_CODE};
use kestrel_primitives::{Transaction, TxHash};
use kestrel_txpool::{SenderKind, TxPoolHandle};
use tracing::info;

use crate::types::{
    SendTransactionRequest, SendTransactionResponse, TransactionView, TxStatusView,
};
use crate::RpcServer;

pub struct RpcServerImpl {
    pool: TxPoolHandle,
}

impl RpcServerImpl {
    pub fn new(pool: TxPoolHandle) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RpcServer for RpcServerImpl {
    async fn send_transaction(
        &self,
        req: SendTransactionRequest,
    ) -> RpcResult<SendTransactionResponse> {
        let raw = req.tx.trim_start_matches("0x");
        let bytes = hex::decode(raw).map_err(invalid_params)?;
        let tx = Transaction::from_bytes(&bytes).map_err(invalid_params)?;

        let result = self
            .pool
            .submit_transaction(tx, SenderKind::Http)
            .await
            .map_err(internal_error)?;

        Ok(SendTransactionResponse {
            hash: result.hash.to_string(),
            accepted: result.result.is_ok(),
            error: result.result.err().map(|err| err.to_string()),
        })
    }

    async fn get_transaction(&self, hash: String) -> RpcResult<Option<TransactionView>> {
        let hash = parse_hash(&hash)?;
        let tx = self
            .pool
            .get_transaction(hash)
            .await
            .map_err(internal_error)?;
        Ok(tx.map(|tx| TransactionView::from(tx.as_ref())))
    }

    async fn get_transaction_status(&self, hash: String) -> RpcResult<Option<TxStatusView>> {
        let hash = parse_hash(&hash)?;
        let status = self
            .pool
            .get_transaction_status(hash)
            .await
            .map_err(internal_error)?;
        Ok(status.map(TxStatusView::from))
    }

    async fn get_pool_stats(&self) -> RpcResult<kestrel_txpool::PoolStatsSnapshot> {
        self.pool.get_stats().await.map_err(internal_error)
    }
}

/// Binds the HTTP server and starts serving pool requests.
pub async fn start_rpc_server(addr: &str, pool: TxPoolHandle) -> anyhow::Result<ServerHandle> {
    let server = Server::builder().build(addr).await?;
    let local_addr = server.local_addr()?;
    let handle = server.start(RpcServerImpl::new(pool).into_rpc());
    info!(%local_addr, "rpc server listening");
    Ok(handle)
}

fn parse_hash(hash: &str) -> Result<TxHash, ErrorObjectOwned> {
    TxHash::try_from_str(hash).map_err(invalid_params)
}

fn invalid_params(err: impl ToString) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(INVALID_PARAMS_CODE, err.to_string(), None::<()>)
}

fn internal_error(err: impl ToString) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(INTERNAL_ERROR_CODE, err.to_string(), None::<()>)
}
