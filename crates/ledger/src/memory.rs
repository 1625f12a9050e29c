use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use kestrel_primitives::{Address, Transaction, TxHash};

use crate::provider::{LedgerError, LedgerProvider, PreExecResult};

#[derive(Clone, Copy, Debug, Default)]
struct Account {
    nonce: u64,
    balance: u128,
}

/// In-memory ledger used by the dev node and by tests. State is mutated
/// through the setters; the pool only ever reads through [`LedgerProvider`].
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: RwLock<HashMap<Address, Account>>,
    committed: RwLock<HashSet<TxHash>>,
    height: AtomicU64,
    min_gas_price: AtomicU64,
    pre_exec_gas: AtomicU64,
    fail_pre_exec: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or overwrites an account.
    pub fn set_account(&self, address: Address, nonce: u64, balance: u128) {
        self.accounts
            .write()
            .unwrap()
            .insert(address, Account { nonce, balance });
    }

    /// Marks a transaction as committed and advances the payer's nonce for
    /// EIP-155-style transactions.
    pub fn commit_transaction(&self, tx: &Transaction) {
        self.committed.write().unwrap().insert(tx.hash());
        if tx.is_eip155() {
            let mut accounts = self.accounts.write().unwrap();
            let account = accounts.entry(tx.payer).or_default();
            if account.nonce <= tx.nonce {
                account.nonce = tx.nonce + 1;
            }
        }
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::Relaxed);
    }

    pub fn advance_height(&self) -> u64 {
        self.height.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn set_min_gas_price(&self, price: u64) {
        self.min_gas_price.store(price, Ordering::Relaxed);
    }

    /// Gas estimate returned by `pre_execute`. Zero means "echo the
    /// transaction's own gas limit", which always passes the pre-exec check.
    pub fn set_pre_exec_gas(&self, gas: u64) {
        self.pre_exec_gas.store(gas, Ordering::Relaxed);
    }

    pub fn set_fail_pre_exec(&self, fail: bool) {
        self.fail_pre_exec.store(fail, Ordering::Relaxed);
    }
}

impl LedgerProvider for InMemoryLedger {
    fn pre_execute(&self, tx: &Transaction) -> Result<PreExecResult, LedgerError> {
        if self.fail_pre_exec.load(Ordering::Relaxed) {
            return Err(LedgerError::PreExecutionFailed(
                "simulation aborted".to_string(),
            ));
        }
        let gas = match self.pre_exec_gas.load(Ordering::Relaxed) {
            0 => tx.gas_limit,
            gas => gas,
        };
        Ok(PreExecResult {
            gas,
            output: Vec::new(),
        })
    }

    fn account_nonce(&self, address: Address) -> Option<u64> {
        self.accounts
            .read()
            .unwrap()
            .get(&address)
            .map(|account| account.nonce)
    }

    fn account_balance(&self, address: Address) -> u128 {
        self.accounts
            .read()
            .unwrap()
            .get(&address)
            .map(|account| account.balance)
            .unwrap_or(0)
    }

    fn is_committed(&self, hash: TxHash) -> bool {
        self.committed.read().unwrap().contains(&hash)
    }

    fn current_height(&self) -> u64 {
        self.height.load(Ordering::Relaxed)
    }

    fn min_gas_price(&self) -> u64 {
        self.min_gas_price.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use kestrel_primitives::test_helpers::TestSigner;

    use super::*;

    #[test]
    fn unknown_account_reads() {
        let ledger = InMemoryLedger::new();
        let address = Address::random();

        assert_eq!(ledger.account_nonce(address), None);
        assert_eq!(ledger.account_balance(address), 0);
    }

    #[test]
    fn commit_advances_eip155_nonce() {
        let ledger = InMemoryLedger::new();
        let signer = TestSigner::random();
        ledger.set_account(signer.address(), 0, 1_000_000_000);

        let tx = signer.eip155_tx(0, 500);
        ledger.commit_transaction(&tx);

        assert!(ledger.is_committed(tx.hash()));
        assert_eq!(ledger.account_nonce(signer.address()), Some(1));
    }

    #[test]
    fn commit_does_not_regress_nonce() {
        let ledger = InMemoryLedger::new();
        let signer = TestSigner::random();
        ledger.set_account(signer.address(), 5, 0);

        let tx = signer.eip155_tx(2, 500);
        ledger.commit_transaction(&tx);
        assert_eq!(ledger.account_nonce(signer.address()), Some(5));
    }

    #[test]
    fn pre_exec_gas_defaults_to_limit() {
        let ledger = InMemoryLedger::new();
        let signer = TestSigner::random();
        let tx = signer.invoke_tx(500);

        assert_eq!(ledger.pre_execute(&tx).unwrap().gas, tx.gas_limit);

        ledger.set_pre_exec_gas(42);
        assert_eq!(ledger.pre_execute(&tx).unwrap().gas, 42);

        ledger.set_fail_pre_exec(true);
        assert!(ledger.pre_execute(&tx).is_err());
    }
}
