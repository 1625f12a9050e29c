use std::sync::Arc;

use kestrel_ledger::InMemoryLedger;
use kestrel_tracing::initialize_tracing;
use kestrel_txpool::{PoolConfig, TxPoolService};
use tracing::{info, Level};

const RPC_LISTEN_ADDR: &str = "127.0.0.1:8545";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    initialize_tracing(Level::INFO);

    let ledger = Arc::new(InMemoryLedger::new());
    let (service, pool) = TxPoolService::new(PoolConfig::default(), ledger);
    tokio::spawn(service.run());

    let _rpc_handle = kestrel_rpc::start_rpc_server(RPC_LISTEN_ADDR, pool).await?;

    info!("kestrel dev node running");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
