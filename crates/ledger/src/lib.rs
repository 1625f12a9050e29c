mod memory;
mod provider;

pub use memory::InMemoryLedger;
pub use provider::{LedgerError, LedgerProvider, PreExecResult};
