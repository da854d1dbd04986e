// ============================================================================
// repokit
// ============================================================================
//
// An async repository and unit-of-work layer over pluggable persistence
// engines. Entities declare their set name, key shape, and relations; a
// Store hands out transactions, transactions hand out typed repositories,
// and repositories compose deferred queries that only execute when
// materialized.
//
// ============================================================================

pub mod core;
pub mod engine;
pub mod facade;
pub mod model;
pub mod prelude;
pub mod query;
pub mod repo;
mod reconcile;
pub mod txn;

// Re-export main types for convenience
pub use crate::core::{RepoError, Result, Value, ValueType};
pub use engine::{
    AffectedEntity, ChangeOp, CommitResult, Document, EntityState, FetchOptions, LoadMode,
    MemorySession, MemorySessionFactory, MemoryStore, SessionProvider, SessionRef, StagedChange,
    StoreSession,
};
pub use facade::Store;
pub use model::{
    Entity, IncludePath, KeyDescriptor, KeyField, KeyObject, KeyPredicate, KeySource, NavKind,
    Navigation,
};
pub use query::{Query, Stage, StageRef};
pub use repo::{OrderedQueryRepository, QueryRepository, ReadRepository, Repository};
pub use txn::{CommitMode, Transaction};
