use kestrel_primitives::{Address, Transaction, TxHash};

/// Result of simulating a transaction against current ledger state.
#[derive(Clone, Debug, PartialEq)]
pub struct PreExecResult {
    /// Estimated gas consumption of the transaction.
    pub gas: u64,
    /// Raw simulation output.
    pub output: Vec<u8>,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum LedgerError {
    #[error("pre-execution failed: {0}")]
    PreExecutionFailed(String),
}

/// Read access to committed ledger state, consumed by the transaction pool.
///
/// Implementations must be cheap to call concurrently; the stateful
/// validator serializes its own reads, but admission checks run from many
/// tasks at once.
pub trait LedgerProvider: Send + Sync + 'static {
    /// Simulates the transaction and returns its estimated gas cost.
    fn pre_execute(&self, tx: &Transaction) -> Result<PreExecResult, LedgerError>;

    /// Next usable nonce for the account, or `None` if the account does not
    /// exist on the ledger yet.
    fn account_nonce(&self, address: Address) -> Option<u64>;

    /// Spendable balance of the account. Zero for unknown accounts.
    fn account_balance(&self, address: Address) -> u128;

    /// Whether a transaction with this hash has already been committed.
    fn is_committed(&self, hash: TxHash) -> bool;

    /// Height of the latest committed block.
    fn current_height(&self) -> u64;

    /// The on-chain-configured minimum gas price. The pool merges this with
    /// its local configuration floor by taking the larger of the two.
    fn min_gas_price(&self) -> u64;
}
