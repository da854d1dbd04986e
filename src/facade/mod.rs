//! The top-level entry point: a [`Store`] bound to a session provider,
//! handing out transactions and per-set repositories.

use crate::engine::{MemorySessionFactory, MemoryStore, SessionProvider};
use crate::model::Entity;
use crate::repo::{ReadRepository, Repository};
use crate::txn::{CommitMode, Transaction};
use std::sync::Arc;
use tracing::debug;

/// A configured data-access entry point over one session provider.
///
/// The store itself is stateless and cheap to clone; every unit of work
/// runs inside a [`Transaction`] it hands out. `repository` and
/// `read_repository` are shorthands that open a fresh auto-commit
/// transaction per repository.
///
/// # Examples
///
/// ```
/// use repokit::{key, Entity, KeyDescriptor, KeyField, MemoryStore, Store, ValueType};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// impl Entity for User {
///     fn set() -> &'static str {
///         "users"
///     }
///
///     fn key_descriptor() -> KeyDescriptor {
///         KeyDescriptor::new(vec![KeyField::new("id", ValueType::Integer)])
///     }
/// }
///
/// # fn main() -> repokit::Result<()> {
/// # tokio::runtime::Runtime::new().map_err(anyhow::Error::from)?.block_on(async {
/// let engine = MemoryStore::new();
/// engine.register::<User>()?;
/// let store = Store::in_memory(engine);
///
/// let repo = store.repository::<User>();
/// repo.insert(User { id: 1, name: "Alice".into() }).await?;
///
/// let found = repo.get(&key! { id: 1 }).await?;
/// assert_eq!(found.map(|u| u.name), Some("Alice".to_string()));
/// # Ok(())
/// # })
/// # }
/// ```
#[derive(Clone)]
pub struct Store {
    provider: Arc<dyn SessionProvider>,
}

impl Store {
    /// Build a store over any session provider.
    pub fn with_provider(provider: Arc<dyn SessionProvider>) -> Self {
        Self { provider }
    }

    /// Build a store over an in-memory engine. Entity sets must already be
    /// registered on the engine.
    pub fn in_memory(engine: Arc<MemoryStore>) -> Self {
        Self::with_provider(Arc::new(MemorySessionFactory::new(engine)))
    }

    /// Open an explicit transaction: verbs stage changes, and nothing is
    /// persisted until [`Transaction::commit`].
    pub fn transaction(&self) -> Transaction {
        debug!(mode = "explicit", "opening transaction");
        Transaction::new(Arc::clone(&self.provider), CommitMode::Explicit)
    }

    /// Open an auto-commit transaction: every verb commits immediately.
    pub fn auto(&self) -> Transaction {
        debug!(mode = "auto", "opening transaction");
        Transaction::new(Arc::clone(&self.provider), CommitMode::Auto)
    }

    /// A standalone read-write repository in its own auto-commit
    /// transaction.
    pub fn repository<E: Entity>(&self) -> Repository<E> {
        self.auto().repository::<E>()
    }

    /// A standalone read-only repository in its own auto-commit
    /// transaction.
    pub fn read_repository<E: Entity>(&self) -> ReadRepository<E> {
        self.auto().read_repository::<E>()
    }
}
