use crate::core::{RepoError, Result};
use crate::query::{self, Comparer, StageRef};
use crate::txn::TransactionInner;
use std::cmp::Ordering;
use std::hash::Hash;
use std::sync::Arc;

/// A composed, unexecuted query bound to a transaction.
///
/// Every operator returns a new repository wrapping its source; repositories
/// are immutable configuration and composition never touches the session.
/// The materializers at the bottom are the only suspension points: they
/// acquire the transaction's session and run the produced query.
pub struct QueryRepository<T> {
    txn: Arc<TransactionInner>,
    stage: StageRef<T>,
}

impl<T> Clone for QueryRepository<T> {
    fn clone(&self) -> Self {
        Self {
            txn: Arc::clone(&self.txn),
            stage: Arc::clone(&self.stage),
        }
    }
}

impl<T: Send + Sync + 'static> QueryRepository<T> {
    pub(crate) fn new(txn: Arc<TransactionInner>, stage: StageRef<T>) -> Self {
        Self { txn, stage }
    }

    pub(crate) fn stage(&self) -> StageRef<T> {
        Arc::clone(&self.stage)
    }

    fn derive<U: Send + Sync + 'static>(&self, stage: StageRef<U>) -> QueryRepository<U> {
        QueryRepository {
            txn: Arc::clone(&self.txn),
            stage,
        }
    }

    // -----------------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------------

    pub fn filter(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.derive(query::filter(self.stage(), Arc::new(predicate)))
    }

    pub fn select<U>(&self, selector: impl Fn(T) -> U + Send + Sync + 'static) -> QueryRepository<U>
    where
        U: Send + Sync + 'static,
    {
        self.derive(query::map(self.stage(), Arc::new(selector)))
    }

    pub fn select_many<U>(
        &self,
        selector: impl Fn(T) -> Vec<U> + Send + Sync + 'static,
    ) -> QueryRepository<U>
    where
        U: Send + Sync + 'static,
    {
        self.derive(query::flat_map(self.stage(), Arc::new(selector)))
    }

    /// Start an ordering. A fresh `order_by` on an already-ordered
    /// repository restarts ordering; chain `then_by` to refine it.
    pub fn order_by<K: Ord>(
        &self,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> OrderedQueryRepository<T> {
        self.order_by_with(move |a, b| key(a).cmp(&key(b)))
    }

    pub fn order_by_desc<K: Ord>(
        &self,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> OrderedQueryRepository<T> {
        self.order_by_with(move |a, b| key(b).cmp(&key(a)))
    }

    pub fn order_by_with(
        &self,
        comparer: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> OrderedQueryRepository<T> {
        OrderedQueryRepository::new(Arc::clone(&self.txn), self.stage(), vec![Arc::new(comparer)])
    }

    pub fn group_by<K>(
        &self,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> QueryRepository<(K, Vec<T>)>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        self.derive(query::group_by(
            self.stage(),
            Arc::new(key),
            Arc::new(|row: T| row),
        ))
    }

    pub fn group_by_select<K, V>(
        &self,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
        element: impl Fn(T) -> V + Send + Sync + 'static,
    ) -> QueryRepository<(K, Vec<V>)>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        self.derive(query::group_by(self.stage(), Arc::new(key), Arc::new(element)))
    }

    /// Inner equi-join. Both operands resolve against this transaction's
    /// session when the query runs.
    pub fn join<R, K, O>(
        &self,
        right: &QueryRepository<R>,
        left_key: impl Fn(&T) -> K + Send + Sync + 'static,
        right_key: impl Fn(&R) -> K + Send + Sync + 'static,
        result: impl Fn(&T, &R) -> O + Send + Sync + 'static,
    ) -> QueryRepository<O>
    where
        R: Clone + Send + Sync + 'static,
        K: Eq + Hash + Send + 'static,
        O: Send + Sync + 'static,
    {
        self.derive(query::join(
            self.stage(),
            right.stage(),
            Arc::new(left_key),
            Arc::new(right_key),
            Arc::new(result),
        ))
    }

    pub fn zip<B, O>(
        &self,
        other: &QueryRepository<B>,
        zipper: impl Fn(T, B) -> O + Send + Sync + 'static,
    ) -> QueryRepository<O>
    where
        B: Send + Sync + 'static,
        O: Send + Sync + 'static,
    {
        self.derive(query::zip2(self.stage(), other.stage(), Arc::new(zipper)))
    }

    pub fn zip3<B, C, O>(
        &self,
        second: &QueryRepository<B>,
        third: &QueryRepository<C>,
        zipper: impl Fn(T, B, C) -> O + Send + Sync + 'static,
    ) -> QueryRepository<O>
    where
        B: Send + Sync + 'static,
        C: Send + Sync + 'static,
        O: Send + Sync + 'static,
    {
        self.derive(query::zip3(
            self.stage(),
            second.stage(),
            third.stage(),
            Arc::new(zipper),
        ))
    }

    pub fn distinct(&self) -> Self
    where
        T: Eq + Hash + Clone,
    {
        self.distinct_by(|row: &T| row.clone())
    }

    pub fn distinct_by<K>(&self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self
    where
        K: Eq + Hash + Send + 'static,
    {
        self.derive(query::distinct_by(self.stage(), Arc::new(key)))
    }

    pub fn union(&self, other: &QueryRepository<T>) -> Self
    where
        T: Eq + Hash + Clone,
    {
        self.union_by(other, |row: &T| row.clone())
    }

    pub fn union_by<K>(
        &self,
        other: &QueryRepository<T>,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Self
    where
        K: Eq + Hash + Send + 'static,
    {
        self.derive(query::union_by(self.stage(), other.stage(), Arc::new(key)))
    }

    pub fn intersect(&self, other: &QueryRepository<T>) -> Self
    where
        T: Eq + Hash + Clone,
    {
        self.intersect_by(other, |row: &T| row.clone())
    }

    pub fn intersect_by<K>(
        &self,
        other: &QueryRepository<T>,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Self
    where
        K: Eq + Hash + Send + 'static,
    {
        self.derive(query::intersect_by(self.stage(), other.stage(), Arc::new(key)))
    }

    pub fn except(&self, other: &QueryRepository<T>) -> Self
    where
        T: Eq + Hash + Clone,
    {
        self.except_by(other, |row: &T| row.clone())
    }

    pub fn except_by<K>(
        &self,
        other: &QueryRepository<T>,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Self
    where
        K: Eq + Hash + Send + 'static,
    {
        self.derive(query::except_by(self.stage(), other.stage(), Arc::new(key)))
    }

    pub fn skip(&self, count: usize) -> Self {
        self.derive(query::skip(self.stage(), count))
    }

    pub fn skip_last(&self, count: usize) -> Self {
        self.derive(query::skip_last(self.stage(), count))
    }

    pub fn skip_while(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.derive(query::skip_while(
            self.stage(),
            Arc::new(move |row: &T, _| predicate(row)),
        ))
    }

    pub fn skip_while_indexed(
        &self,
        predicate: impl Fn(&T, usize) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.derive(query::skip_while(self.stage(), Arc::new(predicate)))
    }

    pub fn take(&self, count: usize) -> Self {
        self.derive(query::take(self.stage(), count))
    }

    pub fn take_last(&self, count: usize) -> Self {
        self.derive(query::take_last(self.stage(), count))
    }

    pub fn take_while(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.derive(query::take_while(
            self.stage(),
            Arc::new(move |row: &T, _| predicate(row)),
        ))
    }

    pub fn take_while_indexed(
        &self,
        predicate: impl Fn(&T, usize) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.derive(query::take_while(self.stage(), Arc::new(predicate)))
    }

    // -----------------------------------------------------------------------
    // Materializers
    // -----------------------------------------------------------------------

    async fn rows(&self) -> Result<Vec<T>> {
        let session = self.txn.session().await?;
        self.stage.produce(&session).run().await
    }

    /// Materialize all rows, in whatever order the composed chain
    /// established. No order is stable unless an `order_by` was applied.
    pub async fn to_vec(&self) -> Result<Vec<T>> {
        self.rows().await
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.rows().await?.len())
    }

    pub async fn count_where(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Result<usize> {
        self.filter(predicate).count().await
    }

    pub async fn any(&self) -> Result<bool> {
        Ok(!self.rows().await?.is_empty())
    }

    pub async fn any_where(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Result<bool> {
        self.filter(predicate).any().await
    }

    pub async fn all_where(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Result<bool> {
        Ok(self.rows().await?.iter().all(predicate))
    }

    pub async fn first(&self) -> Result<Option<T>> {
        Ok(self.rows().await?.into_iter().next())
    }

    pub async fn first_where(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Result<Option<T>> {
        self.filter(predicate).first().await
    }

    pub async fn last(&self) -> Result<Option<T>> {
        Ok(self.rows().await?.pop())
    }

    /// The sole row of the query.
    ///
    /// # Errors
    /// [`RepoError::MultipleResults`] when more than one row matches.
    pub async fn single(&self) -> Result<Option<T>> {
        let mut rows = self.rows().await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            matched => Err(RepoError::MultipleResults(format!(
                "single() matched {} rows",
                matched
            ))),
        }
    }

    pub async fn single_where(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Result<Option<T>> {
        self.filter(predicate).single().await
    }

    pub async fn min_by<K: PartialOrd>(
        &self,
        selector: impl Fn(&T) -> K + Send + Sync,
    ) -> Result<Option<K>> {
        let rows = self.rows().await?;
        let mut best: Option<K> = None;
        for row in &rows {
            let candidate = selector(row);
            match &best {
                Some(current) if candidate >= *current => {}
                _ => best = Some(candidate),
            }
        }
        Ok(best)
    }

    pub async fn max_by<K: PartialOrd>(
        &self,
        selector: impl Fn(&T) -> K + Send + Sync,
    ) -> Result<Option<K>> {
        let rows = self.rows().await?;
        let mut best: Option<K> = None;
        for row in &rows {
            let candidate = selector(row);
            match &best {
                Some(current) if candidate <= *current => {}
                _ => best = Some(candidate),
            }
        }
        Ok(best)
    }

    pub async fn sum_by<N: std::iter::Sum<N>>(
        &self,
        selector: impl Fn(&T) -> N + Send + Sync,
    ) -> Result<N> {
        Ok(self.rows().await?.iter().map(selector).sum())
    }

    pub async fn avg_by(
        &self,
        selector: impl Fn(&T) -> f64 + Send + Sync,
    ) -> Result<Option<f64>> {
        let rows = self.rows().await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let total: f64 = rows.iter().map(&selector).sum();
        Ok(Some(total / rows.len() as f64))
    }
}

/// A query repository with an established ordering.
///
/// `then_by` refines the current ordering with a stable secondary key;
/// calling `order_by` again (through the inherited operators) restarts it.
pub struct OrderedQueryRepository<T> {
    txn: Arc<TransactionInner>,
    upstream: StageRef<T>,
    comparers: Vec<Comparer<T>>,
    inner: QueryRepository<T>,
}

impl<T> Clone for OrderedQueryRepository<T> {
    fn clone(&self) -> Self {
        Self {
            txn: Arc::clone(&self.txn),
            upstream: Arc::clone(&self.upstream),
            comparers: self.comparers.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> OrderedQueryRepository<T> {
    pub(crate) fn new(
        txn: Arc<TransactionInner>,
        upstream: StageRef<T>,
        comparers: Vec<Comparer<T>>,
    ) -> Self {
        let stage = query::sort(Arc::clone(&upstream), comparers.clone());
        let inner = QueryRepository::new(Arc::clone(&txn), stage);
        Self {
            txn,
            upstream,
            comparers,
            inner,
        }
    }

    pub fn then_by<K: Ord>(
        &self,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Self {
        self.then_by_with(move |a, b| key(a).cmp(&key(b)))
    }

    pub fn then_by_desc<K: Ord>(
        &self,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Self {
        self.then_by_with(move |a, b| key(b).cmp(&key(a)))
    }

    pub fn then_by_with(
        &self,
        comparer: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        let mut comparers = self.comparers.clone();
        comparers.push(Arc::new(comparer));
        Self::new(Arc::clone(&self.txn), Arc::clone(&self.upstream), comparers)
    }
}

impl<T> std::ops::Deref for OrderedQueryRepository<T> {
    type Target = QueryRepository<T>;

    fn deref(&self) -> &QueryRepository<T> {
        &self.inner
    }
}
