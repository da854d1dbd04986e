mod transaction;

pub use transaction::{CommitMode, Transaction};
pub(crate) use transaction::TransactionInner;
