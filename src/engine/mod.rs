// ============================================================================
// Persistence Engine Boundary
// ============================================================================
//
// The capability traits this layer consumes from a backing persistence
// engine. Everything crossing the boundary is a JSON document, which keeps
// the traits object-safe while the repository layer stays strongly typed.
//
// ============================================================================

mod memory;

pub use memory::{MemorySession, MemorySessionFactory, MemoryStore};

use crate::core::Result;
use crate::model::{IncludePath, KeyDescriptor, KeyPredicate};
use async_trait::async_trait;
use std::sync::Arc;

/// The wire form of an entity at the engine boundary.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// A shared handle to a live store session.
pub type SessionRef = Arc<dyn StoreSession>;

/// Loading-mode hint for eager-loaded relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Load the root set and its included relations in one query.
    #[default]
    SingleQuery,
    /// Load each included relation with its own query.
    SplitQuery,
}

/// Per-fetch configuration: which relations to eager-load, and how.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub include: IncludePath,
    pub load_mode: LoadMode,
}

/// The kind of a staged mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One mutation staged against a session, applied at save time.
#[derive(Debug, Clone)]
pub struct StagedChange {
    pub set: String,
    pub op: ChangeOp,
    /// The new document (insert, update). Absent for deletes.
    pub document: Option<Document>,
    /// The target row (update, delete). Absent for inserts.
    pub predicate: Option<KeyPredicate>,
}

impl StagedChange {
    pub fn insert(set: impl Into<String>, document: Document) -> Self {
        Self {
            set: set.into(),
            op: ChangeOp::Insert,
            document: Some(document),
            predicate: None,
        }
    }

    pub fn update(set: impl Into<String>, predicate: KeyPredicate, document: Document) -> Self {
        Self {
            set: set.into(),
            op: ChangeOp::Update,
            document: Some(document),
            predicate: Some(predicate),
        }
    }

    pub fn delete(set: impl Into<String>, predicate: KeyPredicate) -> Self {
        Self {
            set: set.into(),
            op: ChangeOp::Delete,
            document: None,
            predicate: Some(predicate),
        }
    }
}

/// Tracked state of an entity at save time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Added,
    Modified,
    Deleted,
}

/// One entity whose tracked state changed during a save.
#[derive(Debug, Clone)]
pub struct AffectedEntity {
    pub set: String,
    pub state: EntityState,
    pub document: Document,
}

/// Outcome of a save: the set of entities whose state changed.
///
/// Empty when nothing changed, or when the backing save reported zero
/// affected rows. A zero-affected save is a legitimate soft outcome, never
/// an error.
#[derive(Debug, Clone, Default)]
pub struct CommitResult {
    pub entities: Vec<AffectedEntity>,
}

impl CommitResult {
    pub fn affected(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Whether the affected set contains the row identified by `predicate`.
    pub fn contains(&self, set: &str, predicate: &KeyPredicate) -> bool {
        self.entities
            .iter()
            .any(|entity| entity.set == set && predicate.matches(&entity.document))
    }
}

/// Session-factory capability: produces a persistence session on demand.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn create_session(&self) -> Result<SessionRef>;
}

/// A store-side unit-of-work: runs queries and tracks/saves mutations.
///
/// One session is exclusively owned by sequential use within a transaction
/// scope; concurrent materialization against one session is the caller's
/// responsibility to serialize.
#[async_trait]
pub trait StoreSession: Send + Sync {
    /// Queryable capability: fetch the documents of an entity set,
    /// eager-loading the relations named by `options.include`.
    async fn fetch(&self, set: &str, options: &FetchOptions) -> Result<Vec<Document>>;

    /// Attach a mutation to the session for later synchronization.
    async fn stage(&self, change: StagedChange) -> Result<()>;

    /// Change-tracking/save capability: detect pending changes, persist
    /// them, and report the entities affected.
    async fn save_changes(&self) -> Result<CommitResult>;

    /// Key-metadata capability: the declared key shape of an entity set.
    fn key_descriptor(&self, set: &str) -> Result<KeyDescriptor>;
}

impl std::fmt::Debug for dyn StoreSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StoreSession")
    }
}
