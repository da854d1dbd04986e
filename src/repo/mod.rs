//! Typed repositories: per-set read and read-write surfaces bound to a
//! transaction, plus the composable query surface built on them.

mod base;
mod query_repo;

pub use base::{ReadRepository, Repository};
pub use query_repo::{OrderedQueryRepository, QueryRepository};
