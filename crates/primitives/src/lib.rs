mod address;
mod hash;
mod transaction;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use address::{Address, AddressConversionError};
pub use hash::TxHash;
pub use transaction::{Signature, Transaction, TransactionError, TxKind, TX_VERSION};
