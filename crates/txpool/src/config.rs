use std::time::Duration;

/// Transaction pool configuration. Gas floors are local minimums; the
/// effective gas price floor is the larger of `min_gas_price` and the
/// on-chain-configured value reported by the ledger.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of verification workers the server load-balances across.
    pub worker_count: usize,
    /// Parallelism of the stateless validator pool.
    pub stateless_validators: usize,
    /// Bounded admission slots; acquiring one is the backpressure gate.
    pub slot_count: usize,
    /// Maximum number of verified transactions held in the pool.
    pub max_capacity: usize,
    /// Maximum number of entries returned for one block proposal.
    pub max_tx_in_block: usize,
    /// Maximum serialized transaction size in bytes.
    pub max_tx_size: usize,
    pub min_gas_limit: u64,
    pub min_gas_price: u64,
    /// Higher gas-limit floor for contract-deploy transactions.
    pub deploy_gas_limit: u64,
    /// Gas-limit cap for EIP-155-style transactions.
    pub max_eip_gas_limit: u64,
    /// Skip the pre-execution balance check at admission.
    pub disable_pre_exec: bool,
    /// How long a pending verification may remain unanswered before it is
    /// resubmitted to the validators.
    pub verify_timeout: Duration,
    /// How many resubmissions are attempted before the transaction is
    /// failed with `RetryExhausted`.
    pub max_retries: u8,
    /// Capacity of the worker and validator channels.
    pub channel_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            stateless_validators: 4,
            slot_count: 10_000,
            max_capacity: 100_000,
            max_tx_in_block: 5_000,
            max_tx_size: 1024 * 1024,
            min_gas_limit: 20_000,
            min_gas_price: 500,
            deploy_gas_limit: 10_000_000,
            max_eip_gas_limit: 8_000_000,
            disable_pre_exec: false,
            verify_timeout: Duration::from_secs(2),
            max_retries: 3,
            channel_size: 4096,
        }
    }
}
