pub mod client;
pub mod server;
pub mod types;

use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use kestrel_txpool::PoolStatsSnapshot;
pub use server::start_rpc_server;
pub use types::*;

#[rpc(client, server)]
pub trait Rpc {
    /// Submits a hex-encoded transaction and waits for its final
    /// verification result.
    #[method(name = "kestrel_sendTransaction")]
    async fn send_transaction(&self, req: SendTransactionRequest)
        -> RpcResult<SendTransactionResponse>;

    #[method(name = "kestrel_getTransaction")]
    async fn get_transaction(&self, hash: String) -> RpcResult<Option<TransactionView>>;

    #[method(name = "kestrel_getTransactionStatus")]
    async fn get_transaction_status(&self, hash: String) -> RpcResult<Option<TxStatusView>>;

    #[method(name = "kestrel_getPoolStats")]
    async fn get_pool_stats(&self) -> RpcResult<PoolStatsSnapshot>;
}
