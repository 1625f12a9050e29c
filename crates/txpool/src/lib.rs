mod config;
mod error;
mod nonce;
mod pool;
mod queue;
mod server;
mod service;
mod types;
mod validators;
mod worker;

pub use config::PoolConfig;
pub use error::PoolError;
pub use server::{TxBroadcaster, TxPoolServer};
pub use service::{PoolRequest, TxPoolHandle, TxPoolService};
pub use types::{
    PoolStatsSnapshot, SenderKind, TxEntry, TxResult, TxVerifyOutcome, TxVerifyStatus, VerifyKind,
    VerifyResult,
};
