use crate::core::{RepoError, Result};
use crate::engine::{FetchOptions, LoadMode, SessionRef, StagedChange};
use crate::model::{
    find_navigation, from_document, resolve, to_document, Entity, KeyPredicate, KeySource,
};
use crate::query::{Query, Stage, StageRef};
use crate::repo::query_repo::{OrderedQueryRepository, QueryRepository};
use crate::txn::TransactionInner;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

// ===========================================================================
// Root query stage
// ===========================================================================

/// The root of every composed query: fetches an entity set from the
/// session and decodes each document into the typed entity.
struct SetStage<E: Entity> {
    options: FetchOptions,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> Stage<E> for SetStage<E> {
    fn produce(&self, session: &SessionRef) -> Query<E> {
        let session = Arc::clone(session);
        let options = self.options.clone();
        Query::new(async move {
            let docs = session.fetch(E::set(), &options).await?;
            docs.into_iter().map(from_document::<E>).collect()
        })
    }
}

// ===========================================================================
// Read repository
// ===========================================================================

/// Read-only access to one entity set within a transaction.
///
/// Configuration methods (`include`, `split_query`) return derived
/// repositories; nothing touches the session until a materializer runs.
pub struct ReadRepository<E: Entity> {
    txn: Arc<TransactionInner>,
    options: FetchOptions,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> std::fmt::Debug for ReadRepository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadRepository")
            .field("set", &E::set())
            .finish_non_exhaustive()
    }
}

impl<E: Entity> Clone for ReadRepository<E> {
    fn clone(&self) -> Self {
        Self {
            txn: Arc::clone(&self.txn),
            options: self.options.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E: Entity> ReadRepository<E> {
    pub(crate) fn new(txn: Arc<TransactionInner>) -> Self {
        Self {
            txn,
            options: FetchOptions::default(),
            _marker: PhantomData,
        }
    }

    fn with_options(&self, options: FetchOptions) -> Self {
        Self {
            txn: Arc::clone(&self.txn),
            options,
            _marker: PhantomData,
        }
    }

    /// Eager-load a relation declared on this entity.
    ///
    /// # Errors
    /// [`RepoError::UnknownNavigation`] when no relation of that name is
    /// declared on the entity.
    pub fn include(&self, navigation: &str) -> Result<Self> {
        let nav = find_navigation(&E::navigations(), navigation, E::set())?;
        let mut options = self.options.clone();
        options.include.push_chain(nav);
        Ok(self.with_options(options))
    }

    /// Extend the most recent `include` one hop deeper, into a relation
    /// declared on its target entity.
    ///
    /// # Errors
    /// - [`RepoError::InvalidIncludePath`] when no `include` precedes it
    /// - [`RepoError::UnknownNavigation`] when the target entity declares
    ///   no relation of that name
    pub fn then_include(&self, navigation: &str) -> Result<Self> {
        let tail = self
            .options
            .include
            .chains()
            .last()
            .and_then(|chain| chain.last())
            .copied()
            .ok_or_else(|| {
                RepoError::InvalidIncludePath(
                    "then_include requires a preceding include".to_string(),
                )
            })?;
        let nav = find_navigation(&(tail.target_navigations)(), navigation, tail.target_set)?;
        let mut options = self.options.clone();
        options.include.extend_last(nav)?;
        Ok(self.with_options(options))
    }

    /// Hint the engine to load each included relation with its own query.
    pub fn split_query(&self) -> Self {
        let mut options = self.options.clone();
        options.load_mode = LoadMode::SplitQuery;
        self.with_options(options)
    }

    /// Hint the engine to load the set and its relations in one query.
    pub fn single_query(&self) -> Self {
        let mut options = self.options.clone();
        options.load_mode = LoadMode::SingleQuery;
        self.with_options(options)
    }

    /// Begin a composed query over this set.
    pub fn query(&self) -> QueryRepository<E> {
        let stage: StageRef<E> = Arc::new(SetStage::<E> {
            options: self.options.clone(),
            _marker: PhantomData,
        });
        QueryRepository::new(Arc::clone(&self.txn), stage)
    }

    pub fn filter(
        &self,
        predicate: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> QueryRepository<E> {
        self.query().filter(predicate)
    }

    pub fn order_by<K: Ord>(
        &self,
        key: impl Fn(&E) -> K + Send + Sync + 'static,
    ) -> OrderedQueryRepository<E> {
        self.query().order_by(key)
    }

    pub fn order_by_with(
        &self,
        comparer: impl Fn(&E, &E) -> Ordering + Send + Sync + 'static,
    ) -> OrderedQueryRepository<E> {
        self.query().order_by_with(comparer)
    }

    /// All rows of the set, honoring the configured includes.
    pub async fn all(&self) -> Result<Vec<E>> {
        self.query().to_vec().await
    }

    pub async fn count(&self) -> Result<usize> {
        self.query().count().await
    }

    /// Look up one entity by key. Absence is `Ok(None)`.
    ///
    /// # Errors
    /// - key resolution errors from [`resolve`]
    /// - [`RepoError::MultipleResults`] when the key matches more than one
    ///   row, which means the backing set violated key uniqueness
    pub async fn get(&self, key: &dyn KeySource) -> Result<Option<E>> {
        let session = self.txn.session().await?;
        let descriptor = session.key_descriptor(E::set())?;
        let predicate = resolve(&descriptor, E::set(), key)?;
        let mut matched = self.matching(&session, &predicate).await?;
        match matched.len() {
            0 => Ok(None),
            1 => Ok(Some(from_document(matched.remove(0))?)),
            count => Err(RepoError::MultipleResults(format!(
                "key {} of set '{}' matched {} rows",
                predicate,
                E::set(),
                count
            ))),
        }
    }

    async fn matching(
        &self,
        session: &SessionRef,
        predicate: &KeyPredicate,
    ) -> Result<Vec<crate::engine::Document>> {
        let docs = session.fetch(E::set(), &self.options).await?;
        Ok(docs.into_iter().filter(|doc| predicate.matches(doc)).collect())
    }
}

// ===========================================================================
// Read-write repository
// ===========================================================================

/// Read-write access to one entity set within a transaction.
///
/// In [`CommitMode::Auto`](crate::txn::CommitMode) every verb commits
/// immediately; in explicit mode verbs only stage their change and the
/// transaction's `commit` synchronizes them all at once.
pub struct Repository<E: Entity> {
    read: ReadRepository<E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            read: self.read.clone(),
        }
    }
}

impl<E: Entity> Repository<E> {
    pub(crate) fn new(txn: Arc<TransactionInner>) -> Self {
        Self {
            read: ReadRepository::new(txn),
        }
    }

    fn with_read(read: ReadRepository<E>) -> Self {
        Self { read }
    }

    pub fn include(&self, navigation: &str) -> Result<Self> {
        Ok(Self::with_read(self.read.include(navigation)?))
    }

    pub fn then_include(&self, navigation: &str) -> Result<Self> {
        Ok(Self::with_read(self.read.then_include(navigation)?))
    }

    pub fn split_query(&self) -> Self {
        Self::with_read(self.read.split_query())
    }

    pub fn single_query(&self) -> Self {
        Self::with_read(self.read.single_query())
    }

    /// Stage a new entity.
    ///
    /// Returns the entity back when the row was persisted (always, in
    /// explicit mode, where persistence is deferred to `commit`), `None`
    /// when an auto-commit reported the row unaffected.
    pub async fn insert(&self, entity: E) -> Result<Option<E>> {
        let session = self.read.txn.session().await?;
        let doc = to_document(&entity)?;
        let descriptor = session.key_descriptor(E::set())?;
        let predicate = resolve(&descriptor, E::set(), &doc)?;
        debug!(set = E::set(), key = %predicate, "staging insert");
        session.stage(StagedChange::insert(E::set(), doc)).await?;

        if self.read.txn.mode().is_auto() {
            let outcome = self.read.txn.commit().await?;
            if outcome.contains(E::set(), &predicate) {
                Ok(Some(entity))
            } else {
                Ok(None)
            }
        } else {
            Ok(Some(entity))
        }
    }

    /// Reconcile an entity against its stored row and stage the merge.
    ///
    /// Scalar fields are overwritten; relations are only touched along the
    /// repository's configured include paths, where collection members are
    /// added, removed, and updated by key. Relations outside the include
    /// paths keep their stored state.
    ///
    /// Returns `None` when no stored row matches the entity's key, or when
    /// an auto-commit detected no effective change.
    ///
    /// # Errors
    /// - key resolution errors from [`resolve`]
    /// - [`RepoError::MultipleResults`] when the key matches several rows
    /// - [`RepoError::DuplicateKey`] when a reconciled collection holds
    ///   two members with the same key
    pub async fn update(&self, entity: E) -> Result<Option<E>> {
        let session = self.read.txn.session().await?;
        let incoming = to_document(&entity)?;
        let descriptor = session.key_descriptor(E::set())?;
        let predicate = resolve(&descriptor, E::set(), &incoming)?;

        let mut matched = self.read.matching(&session, &predicate).await?;
        let mut current = match matched.len() {
            0 => return Ok(None),
            1 => matched.remove(0),
            count => {
                return Err(RepoError::MultipleResults(format!(
                    "key {} of set '{}' matched {} rows",
                    predicate,
                    E::set(),
                    count
                )))
            }
        };

        crate::reconcile::reconcile(
            &mut current,
            &incoming,
            &E::navigations(),
            self.read.options.include.chains(),
        )
        .await?;

        debug!(set = E::set(), key = %predicate, "staging update");
        session
            .stage(StagedChange::update(E::set(), predicate.clone(), current))
            .await?;

        if self.read.txn.mode().is_auto() {
            let outcome = self.read.txn.commit().await?;
            if outcome.contains(E::set(), &predicate) {
                Ok(Some(entity))
            } else {
                Ok(None)
            }
        } else {
            Ok(Some(entity))
        }
    }

    /// Delete the stored row matching the entity's key. Returns whether a
    /// row was found to delete; absence is a soft `false`, never an error.
    pub async fn delete(&self, entity: &E) -> Result<bool> {
        let doc = to_document(entity)?;
        self.delete_by_key(&doc).await
    }

    /// Delete by key without a full entity in hand.
    pub async fn delete_by_key(&self, key: &dyn KeySource) -> Result<bool> {
        let session = self.read.txn.session().await?;
        let descriptor = session.key_descriptor(E::set())?;
        let predicate = resolve(&descriptor, E::set(), key)?;

        let matched = self.read.matching(&session, &predicate).await?;
        match matched.len() {
            0 => return Ok(false),
            1 => {}
            count => {
                return Err(RepoError::MultipleResults(format!(
                    "key {} of set '{}' matched {} rows",
                    predicate,
                    E::set(),
                    count
                )))
            }
        }

        debug!(set = E::set(), key = %predicate, "staging delete");
        session
            .stage(StagedChange::delete(E::set(), predicate.clone()))
            .await?;

        if self.read.txn.mode().is_auto() {
            let outcome = self.read.txn.commit().await?;
            Ok(outcome.contains(E::set(), &predicate))
        } else {
            Ok(true)
        }
    }
}

impl<E: Entity> std::ops::Deref for Repository<E> {
    type Target = ReadRepository<E>;

    fn deref(&self) -> &ReadRepository<E> {
        &self.read
    }
}
