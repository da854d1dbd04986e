// ============================================================================
// In-Memory Engine
// ============================================================================
//
// Reference implementation of the engine capability traits: a document store
// keyed by entity-set name, with per-session staged changes applied on save.
// Used by the test suite and by applications wanting an embedded store.
//
// ============================================================================

use super::{
    AffectedEntity, ChangeOp, CommitResult, Document, FetchOptions, SessionProvider, SessionRef,
    StagedChange, StoreSession,
};
use crate::core::{RepoError, Result};
use crate::model::{Entity, KeyDescriptor, NavKind, Navigation};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::{Mutex, RwLock};

#[derive(Clone)]
struct RegisteredModel {
    key: KeyDescriptor,
    navigations: Vec<Navigation>,
}

/// Committed documents plus the registered entity models.
///
/// Shared across sessions: changes saved by one session are visible to
/// sessions created afterwards, which is what the auto-commit visibility
/// tests rely on.
pub struct MemoryStore {
    models: StdRwLock<HashMap<String, RegisteredModel>>,
    sets: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            models: StdRwLock::new(HashMap::new()),
            sets: RwLock::new(HashMap::new()),
        })
    }

    /// Register an entity model. Must happen before the set is used.
    ///
    /// # Errors
    /// [`RepoError::EmptyKey`] when the entity declares no key fields.
    pub fn register<E: Entity>(&self) -> Result<()> {
        let descriptor = E::key_descriptor();
        if descriptor.is_empty() {
            return Err(RepoError::EmptyKey(E::set().to_string()));
        }
        let mut models = self.models.write()?;
        models.insert(
            E::set().to_string(),
            RegisteredModel {
                key: descriptor,
                navigations: E::navigations(),
            },
        );
        Ok(())
    }

    fn model(&self, set: &str) -> Result<RegisteredModel> {
        self.models
            .read()?
            .get(set)
            .cloned()
            .ok_or_else(|| RepoError::UnknownSet(set.to_string()))
    }
}

/// Session factory over a shared [`MemoryStore`].
pub struct MemorySessionFactory {
    store: Arc<MemoryStore>,
}

impl MemorySessionFactory {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SessionProvider for MemorySessionFactory {
    async fn create_session(&self) -> Result<SessionRef> {
        Ok(Arc::new(MemorySession {
            store: Arc::clone(&self.store),
            staged: Mutex::new(Vec::new()),
        }))
    }
}

/// One unit of work against a [`MemoryStore`].
pub struct MemorySession {
    store: Arc<MemoryStore>,
    staged: Mutex<Vec<StagedChange>>,
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn fetch(&self, set: &str, options: &FetchOptions) -> Result<Vec<Document>> {
        let model = self.store.model(set)?;
        let docs = {
            let sets = self.store.sets.read().await;
            sets.get(set).cloned().unwrap_or_default()
        };
        tracing::trace!(set, rows = docs.len(), "memory fetch");
        Ok(docs
            .into_iter()
            .map(|doc| strip_navigations(doc, &model.navigations, options.include.chains()))
            .collect())
    }

    async fn stage(&self, change: StagedChange) -> Result<()> {
        // Fail early on unregistered sets rather than at save time.
        self.store.model(&change.set)?;
        self.staged.lock().await.push(change);
        Ok(())
    }

    async fn save_changes(&self) -> Result<CommitResult> {
        let changes: Vec<StagedChange> = {
            let mut staged = self.staged.lock().await;
            staged.drain(..).collect()
        };
        if changes.is_empty() {
            return Ok(CommitResult::default());
        }

        let mut sets = self.store.sets.write().await;
        let mut result = CommitResult::default();
        for change in changes {
            let rows = sets.entry(change.set.clone()).or_default();
            match change.op {
                ChangeOp::Insert => {
                    let doc = change.document.ok_or_else(|| {
                        RepoError::InvalidDocument(format!(
                            "insert into '{}' staged without a document",
                            change.set
                        ))
                    })?;
                    rows.push(doc.clone());
                    result.entities.push(AffectedEntity {
                        set: change.set,
                        state: super::EntityState::Added,
                        document: doc,
                    });
                }
                ChangeOp::Update => {
                    let predicate = change.predicate.ok_or_else(|| {
                        RepoError::InvalidDocument(format!(
                            "update of '{}' staged without a key predicate",
                            change.set
                        ))
                    })?;
                    let incoming = change.document.ok_or_else(|| {
                        RepoError::InvalidDocument(format!(
                            "update of '{}' staged without a document",
                            change.set
                        ))
                    })?;
                    let matched: Vec<usize> = rows
                        .iter()
                        .enumerate()
                        .filter(|(_, doc)| predicate.matches(doc))
                        .map(|(index, _)| index)
                        .collect();
                    match matched.as_slice() {
                        // No row matched: a soft zero-affected outcome.
                        [] => {}
                        [index] => {
                            let mut merged = rows[*index].clone();
                            for (field, value) in incoming {
                                merged.insert(field, value);
                            }
                            // Change detection: a no-op update affects nothing.
                            if merged != rows[*index] {
                                rows[*index] = merged.clone();
                                result.entities.push(AffectedEntity {
                                    set: change.set,
                                    state: super::EntityState::Modified,
                                    document: merged,
                                });
                            }
                        }
                        many => {
                            return Err(RepoError::MultipleResults(format!(
                                "update key ({}) matched {} rows in set '{}'",
                                predicate,
                                many.len(),
                                change.set
                            )));
                        }
                    }
                }
                ChangeOp::Delete => {
                    let predicate = change.predicate.ok_or_else(|| {
                        RepoError::InvalidDocument(format!(
                            "delete from '{}' staged without a key predicate",
                            change.set
                        ))
                    })?;
                    let matched: Vec<usize> = rows
                        .iter()
                        .enumerate()
                        .filter(|(_, doc)| predicate.matches(doc))
                        .map(|(index, _)| index)
                        .collect();
                    match matched.as_slice() {
                        [] => {}
                        [index] => {
                            let doc = rows.remove(*index);
                            result.entities.push(AffectedEntity {
                                set: change.set,
                                state: super::EntityState::Deleted,
                                document: doc,
                            });
                        }
                        many => {
                            return Err(RepoError::MultipleResults(format!(
                                "delete key ({}) matched {} rows in set '{}'",
                                predicate,
                                many.len(),
                                change.set
                            )));
                        }
                    }
                }
            }
        }
        tracing::debug!(affected = result.affected(), "memory save");
        Ok(result)
    }

    fn key_descriptor(&self, set: &str) -> Result<KeyDescriptor> {
        Ok(self.store.model(set)?.key)
    }
}

/// Remove navigation fields not named by the include chains, recursively.
///
/// Mirrors eager loading: a relation is only materialized when the include
/// path asks for it. Update staging merges fields, so stripped navigations
/// survive a later update of the same row.
fn strip_navigations(
    mut doc: Document,
    navigations: &[Navigation],
    chains: &[Vec<Navigation>],
) -> Document {
    for nav in navigations {
        let relevant: Vec<&Vec<Navigation>> = chains
            .iter()
            .filter(|chain| chain.first().map(|head| head.name == nav.name).unwrap_or(false))
            .collect();
        if relevant.is_empty() {
            doc.remove(nav.name);
            continue;
        }
        let child_chains: Vec<Vec<Navigation>> = relevant
            .iter()
            .filter(|chain| chain.len() > 1)
            .map(|chain| chain[1..].to_vec())
            .collect();
        let target_navigations = (nav.target_navigations)();
        if let Some(value) = doc.get_mut(nav.name) {
            match (nav.kind, value) {
                (NavKind::One, JsonValue::Object(child)) => {
                    let taken = std::mem::take(child);
                    *child = strip_navigations(taken, &target_navigations, &child_chains);
                }
                (NavKind::Many, JsonValue::Array(items)) => {
                    for item in items.iter_mut() {
                        if let JsonValue::Object(child) = item {
                            let taken = std::mem::take(child);
                            *child = strip_navigations(taken, &target_navigations, &child_chains);
                        }
                    }
                }
                _ => {}
            }
        }
    }
    doc
}
