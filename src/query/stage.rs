use crate::core::Result;
use crate::engine::SessionRef;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A query not yet run against a concrete session.
///
/// Wraps a deferred fetch-and-transform pipeline; nothing executes until
/// [`Query::run`] is awaited.
pub struct Query<T> {
    fut: Pin<Box<dyn Future<Output = Result<Vec<T>>> + Send + 'static>>,
}

impl<T> Query<T> {
    pub fn new(fut: impl Future<Output = Result<Vec<T>>> + Send + 'static) -> Self {
        Self { fut: Box::pin(fut) }
    }

    /// Execute the query and materialize its rows.
    pub async fn run(self) -> Result<Vec<T>> {
        self.fut.await
    }
}

/// One stage of a composed query.
///
/// Producing a query is pure configuration: it is idempotent, side-effect
/// free, and never suspends. Each operator stage owns exactly one upstream
/// stage (two or three for the join family) and applies exactly one
/// transformation on top of what its upstream produces. Binary and ternary
/// stages resolve every operand against the one session passed in, so joined
/// rows reflect a single in-flight snapshot.
pub trait Stage<T>: Send + Sync {
    fn produce(&self, session: &SessionRef) -> Query<T>;
}

pub type StageRef<T> = Arc<dyn Stage<T>>;
