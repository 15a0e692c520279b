pub mod mvcc;
pub mod scan;
mod transaction;

pub use mvcc::{MVCCDef, MVCC};
pub use scan::Scan;
pub use transaction::{Transaction, TransactionState};

/// An MVCC version represents a logical timestamp. The latest version is incremented
/// when beginning each read-write transaction.
pub(crate) type Version = u64;
