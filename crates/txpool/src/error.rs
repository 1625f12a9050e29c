use kestrel_primitives::{Address, TxHash};

/// Errors produced by the admission pipeline, the validators, and the
/// block-reconciliation protocol.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum PoolError {
    // Admission, detected synchronously before any verification work
    #[error("transaction size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
    #[error("transaction {0} already known to the pool")]
    Duplicate(TxHash),
    #[error("transaction pool is full")]
    PoolFull,
    #[error("gas limit {gas_limit} * gas price {gas_price} overflows")]
    GasOverflow { gas_limit: u64, gas_price: u64 },
    #[error("gas limit {gas_limit} is below the floor {floor}")]
    GasLimitBelowFloor { gas_limit: u64, floor: u64 },
    #[error("gas price {gas_price} is below the floor {floor}")]
    GasPriceBelowFloor { gas_price: u64, floor: u64 },
    #[error("deploy gas limit {gas_limit} is below the deploy floor {floor}")]
    DeployGasTooLow { gas_limit: u64, floor: u64 },
    #[error("eip-155 gas limit {gas_limit} exceeds the cap {cap}")]
    EipGasLimitExceeded { gas_limit: u64, cap: u64 },
    #[error("nonce {nonce} is lower than the next usable nonce {expected}")]
    NonceTooLow { nonce: u64, expected: u64 },
    #[error("payer {payer} balance can not cover cost {cost}")]
    InsufficientBalance { payer: Address, cost: u128 },
    #[error("pre-execution rejected the transaction: {0}")]
    PreExecFailed(String),
    #[error("no verification worker accepted the transaction")]
    WorkerUnavailable,

    // Validation, detected asynchronously by a validator pool
    #[error("invalid signature or structure: {0}")]
    InvalidTransaction(String),
    #[error("transaction is already committed on the ledger")]
    AlreadyCommitted,
    #[error("a transaction with an equal or higher nonce is already committed")]
    HigherNonceExists,
    #[error("account does not exist and nonce is non-zero")]
    UnknownAccount,

    // Lifecycle
    #[error("verification retries exhausted")]
    RetryExhausted,
    #[error("a block verification request is already outstanding")]
    BlockVerifyBusy,
}

impl PoolError {
    /// Whether this error came out of the stateless validator.
    pub fn is_stateless_failure(&self) -> bool {
        matches!(self, PoolError::InvalidTransaction(_))
    }

    /// Whether this error came out of the stateful validator.
    pub fn is_stateful_failure(&self) -> bool {
        matches!(
            self,
            PoolError::AlreadyCommitted | PoolError::HigherNonceExists | PoolError::UnknownAccount
        )
    }
}
