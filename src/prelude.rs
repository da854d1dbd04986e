//! Convenience re-exports for the common surface of the crate.
//!
//! ```
//! use repokit::prelude::*;
//! ```

pub use crate::core::{RepoError, Result, Value, ValueType};
pub use crate::engine::{MemoryStore, SessionProvider, StoreSession};
pub use crate::facade::Store;
pub use crate::key;
pub use crate::model::{Entity, KeyDescriptor, KeyField, KeyObject, NavKind, Navigation};
pub use crate::repo::{QueryRepository, ReadRepository, Repository};
pub use crate::txn::{CommitMode, Transaction};
