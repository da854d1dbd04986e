// ============================================================================
// Transaction / Unit of Work
// ============================================================================
//
// Owns at most one lazily-created session per logical unit of work.
//
// State transitions:
// ```text
// Unopened ──first session request──> Open
// Open     ──session request───────> Open (cached session)
// Unopened/Open ──dispose──────────> Disposed
// ```
//
// Session creation is guarded by a real mutex, not a flag check: concurrent
// callers block until the first creation completes and then all observe the
// same session. The session handle is the only shared mutable state in the
// layer.
//
// ============================================================================

use crate::core::{RepoError, Result};
use crate::engine::{CommitResult, SessionProvider, SessionRef};
use crate::model::Entity;
use crate::repo::{ReadRepository, Repository};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Commit mode, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Every mutating verb commits immediately after staging.
    Auto,
    /// Mutating verbs stage only; the caller drives `commit`.
    Explicit,
}

impl CommitMode {
    pub fn is_auto(&self) -> bool {
        matches!(self, CommitMode::Auto)
    }
}

enum TxnState {
    Unopened,
    Open(SessionRef),
    Disposed,
}

pub(crate) struct TransactionInner {
    provider: Arc<dyn SessionProvider>,
    mode: CommitMode,
    state: Mutex<TxnState>,
}

impl TransactionInner {
    pub(crate) fn new(provider: Arc<dyn SessionProvider>, mode: CommitMode) -> Self {
        Self {
            provider,
            mode,
            state: Mutex::new(TxnState::Unopened),
        }
    }

    pub(crate) fn mode(&self) -> CommitMode {
        self.mode
    }

    /// The transaction's session, created on first request and never twice.
    ///
    /// # Errors
    /// [`RepoError::TransactionDisposed`] after `dispose`; otherwise only
    /// whatever the session factory reports.
    pub(crate) async fn session(&self) -> Result<SessionRef> {
        let mut state = self.state.lock().await;
        match &*state {
            TxnState::Open(session) => Ok(Arc::clone(session)),
            TxnState::Disposed => Err(RepoError::TransactionDisposed),
            TxnState::Unopened => {
                let session = self.provider.create_session().await?;
                tracing::debug!("transaction session created");
                *state = TxnState::Open(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    /// Run change detection and persist staged changes.
    ///
    /// Returns the entities changed since the last successful commit; a
    /// second commit with no intervening mutation returns an empty result.
    /// Committing an unopened transaction is an empty no-op. Serialized
    /// against session creation and other commits by the state mutex.
    pub(crate) async fn commit(&self) -> Result<CommitResult> {
        let state = self.state.lock().await;
        let session = match &*state {
            TxnState::Open(session) => Arc::clone(session),
            TxnState::Unopened => return Ok(CommitResult::default()),
            TxnState::Disposed => return Err(RepoError::TransactionDisposed),
        };
        let result = session.save_changes().await?;
        tracing::debug!(affected = result.affected(), "transaction commit");
        Ok(result)
    }

    /// Release the session; all later operations fail loudly.
    pub(crate) async fn dispose(&self) {
        let mut state = self.state.lock().await;
        *state = TxnState::Disposed;
    }
}

/// A logical unit of work over the backing store.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(provider: Arc<dyn SessionProvider>, mode: CommitMode) -> Self {
        Self {
            inner: Arc::new(TransactionInner::new(provider, mode)),
        }
    }

    pub fn mode(&self) -> CommitMode {
        self.inner.mode()
    }

    /// Persist staged changes and report the affected entities.
    pub async fn commit(&self) -> Result<CommitResult> {
        self.inner.commit().await
    }

    /// Dispose the transaction, releasing its session.
    pub async fn dispose(&self) {
        self.inner.dispose().await;
    }

    /// A read-write repository for `E`, bound to this transaction.
    pub fn repository<E: Entity>(&self) -> Repository<E> {
        Repository::new(Arc::clone(&self.inner))
    }

    /// A read-only repository for `E`, bound to this transaction.
    pub fn read_repository<E: Entity>(&self) -> ReadRepository<E> {
        ReadRepository::new(Arc::clone(&self.inner))
    }
}
