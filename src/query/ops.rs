// ============================================================================
// Operator Stages
// ============================================================================
//
// Every operator reduces to one of three stage shapes: a transformation of
// one upstream row set (Pipe), a combination of two (Binary), or of three
// (Ternary). The named constructors below supply the row transformation for
// each operator of the repository algebra.
//
// ============================================================================

use super::stage::{Query, Stage, StageRef};
use crate::core::Result;
use crate::engine::SessionRef;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

pub(crate) type RowsFn<T, U> = Arc<dyn Fn(Vec<T>) -> Result<Vec<U>> + Send + Sync>;
pub(crate) type Comparer<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// A stage applying one transformation to one upstream stage.
pub(crate) struct PipeStage<T, U> {
    source: StageRef<T>,
    transform: RowsFn<T, U>,
}

impl<T, U> PipeStage<T, U> {
    pub(crate) fn new(source: StageRef<T>, transform: RowsFn<T, U>) -> Self {
        Self { source, transform }
    }
}

impl<T, U> Stage<U> for PipeStage<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn produce(&self, session: &SessionRef) -> Query<U> {
        let upstream = self.source.produce(session);
        let transform = Arc::clone(&self.transform);
        Query::new(async move { transform(upstream.run().await?) })
    }
}

/// A stage combining two upstream stages into one output stream.
pub(crate) struct BinaryStage<L, R, U> {
    left: StageRef<L>,
    right: StageRef<R>,
    combine: Arc<dyn Fn(Vec<L>, Vec<R>) -> Result<Vec<U>> + Send + Sync>,
}

impl<L, R, U> BinaryStage<L, R, U> {
    pub(crate) fn new(
        left: StageRef<L>,
        right: StageRef<R>,
        combine: Arc<dyn Fn(Vec<L>, Vec<R>) -> Result<Vec<U>> + Send + Sync>,
    ) -> Self {
        Self {
            left,
            right,
            combine,
        }
    }
}

impl<L, R, U> Stage<U> for BinaryStage<L, R, U>
where
    L: Send + 'static,
    R: Send + 'static,
    U: Send + 'static,
{
    fn produce(&self, session: &SessionRef) -> Query<U> {
        // Both operands resolve against the same session; one session is
        // owned by sequential use, so the operands run one after the other.
        let left = self.left.produce(session);
        let right = self.right.produce(session);
        let combine = Arc::clone(&self.combine);
        Query::new(async move {
            let left_rows = left.run().await?;
            let right_rows = right.run().await?;
            combine(left_rows, right_rows)
        })
    }
}

/// A stage combining three upstream stages (3-way zip).
pub(crate) struct TernaryStage<A, B, C, U> {
    first: StageRef<A>,
    second: StageRef<B>,
    third: StageRef<C>,
    combine: Arc<dyn Fn(Vec<A>, Vec<B>, Vec<C>) -> Result<Vec<U>> + Send + Sync>,
}

impl<A, B, C, U> TernaryStage<A, B, C, U> {
    pub(crate) fn new(
        first: StageRef<A>,
        second: StageRef<B>,
        third: StageRef<C>,
        combine: Arc<dyn Fn(Vec<A>, Vec<B>, Vec<C>) -> Result<Vec<U>> + Send + Sync>,
    ) -> Self {
        Self {
            first,
            second,
            third,
            combine,
        }
    }
}

impl<A, B, C, U> Stage<U> for TernaryStage<A, B, C, U>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    U: Send + 'static,
{
    fn produce(&self, session: &SessionRef) -> Query<U> {
        let first = self.first.produce(session);
        let second = self.second.produce(session);
        let third = self.third.produce(session);
        let combine = Arc::clone(&self.combine);
        Query::new(async move {
            let a = first.run().await?;
            let b = second.run().await?;
            let c = third.run().await?;
            combine(a, b, c)
        })
    }
}

// ---------------------------------------------------------------------------
// Operator constructors
// ---------------------------------------------------------------------------

pub(crate) fn filter<T>(
    source: StageRef<T>,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
) -> StageRef<T>
where
    T: Send + 'static,
{
    Arc::new(PipeStage::new(
        source,
        Arc::new(move |rows: Vec<T>| Ok(rows.into_iter().filter(|row| predicate(row)).collect())),
    ))
}

pub(crate) fn map<T, U>(
    source: StageRef<T>,
    selector: Arc<dyn Fn(T) -> U + Send + Sync>,
) -> StageRef<U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    Arc::new(PipeStage::new(
        source,
        Arc::new(move |rows: Vec<T>| Ok(rows.into_iter().map(|row| selector(row)).collect())),
    ))
}

pub(crate) fn flat_map<T, U>(
    source: StageRef<T>,
    selector: Arc<dyn Fn(T) -> Vec<U> + Send + Sync>,
) -> StageRef<U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    Arc::new(PipeStage::new(
        source,
        Arc::new(move |rows: Vec<T>| Ok(rows.into_iter().flat_map(|row| selector(row)).collect())),
    ))
}

/// Stable sort by a chain of comparers: the first non-equal comparison wins.
pub(crate) fn sort<T>(source: StageRef<T>, comparers: Vec<Comparer<T>>) -> StageRef<T>
where
    T: Send + 'static,
{
    Arc::new(PipeStage::new(
        source,
        Arc::new(move |mut rows: Vec<T>| {
            rows.sort_by(|a, b| {
                for comparer in &comparers {
                    match comparer(a, b) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                Ordering::Equal
            });
            Ok(rows)
        }),
    ))
}

/// Group rows by key, preserving first-appearance key order.
pub(crate) fn group_by<T, K, V>(
    source: StageRef<T>,
    key: Arc<dyn Fn(&T) -> K + Send + Sync>,
    element: Arc<dyn Fn(T) -> V + Send + Sync>,
) -> StageRef<(K, Vec<V>)>
where
    T: Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    Arc::new(PipeStage::new(
        source,
        Arc::new(move |rows: Vec<T>| {
            let mut order: Vec<K> = Vec::new();
            let mut groups: HashMap<K, Vec<V>> = HashMap::new();
            for row in rows {
                let k = key(&row);
                if !groups.contains_key(&k) {
                    order.push(k.clone());
                }
                groups.entry(k).or_default().push(element(row));
            }
            Ok(order
                .into_iter()
                .map(|k| {
                    let members = groups.remove(&k).unwrap_or_default();
                    (k, members)
                })
                .collect())
        }),
    ))
}

/// Inner equi-join, preserving left order then right order within a key.
pub(crate) fn join<L, R, K, O>(
    left: StageRef<L>,
    right: StageRef<R>,
    left_key: Arc<dyn Fn(&L) -> K + Send + Sync>,
    right_key: Arc<dyn Fn(&R) -> K + Send + Sync>,
    result: Arc<dyn Fn(&L, &R) -> O + Send + Sync>,
) -> StageRef<O>
where
    L: Send + 'static,
    R: Clone + Send + 'static,
    K: Eq + Hash + Send + 'static,
    O: Send + 'static,
{
    Arc::new(BinaryStage::new(
        left,
        right,
        Arc::new(move |left_rows: Vec<L>, right_rows: Vec<R>| {
            let mut by_key: HashMap<K, Vec<R>> = HashMap::new();
            for row in right_rows {
                by_key.entry(right_key(&row)).or_default().push(row);
            }
            let mut out = Vec::new();
            for l in &left_rows {
                if let Some(matches) = by_key.get(&left_key(l)) {
                    for r in matches {
                        out.push(result(l, r));
                    }
                }
            }
            Ok(out)
        }),
    ))
}

pub(crate) fn zip2<A, B, O>(
    left: StageRef<A>,
    right: StageRef<B>,
    zipper: Arc<dyn Fn(A, B) -> O + Send + Sync>,
) -> StageRef<O>
where
    A: Send + 'static,
    B: Send + 'static,
    O: Send + 'static,
{
    Arc::new(BinaryStage::new(
        left,
        right,
        Arc::new(move |a: Vec<A>, b: Vec<B>| {
            Ok(a.into_iter()
                .zip(b)
                .map(|(x, y)| zipper(x, y))
                .collect())
        }),
    ))
}

pub(crate) fn zip3<A, B, C, O>(
    first: StageRef<A>,
    second: StageRef<B>,
    third: StageRef<C>,
    zipper: Arc<dyn Fn(A, B, C) -> O + Send + Sync>,
) -> StageRef<O>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    O: Send + 'static,
{
    Arc::new(TernaryStage::new(
        first,
        second,
        third,
        Arc::new(move |a: Vec<A>, b: Vec<B>, c: Vec<C>| {
            Ok(a.into_iter()
                .zip(b.into_iter().zip(c))
                .map(|(x, (y, z))| zipper(x, y, z))
                .collect())
        }),
    ))
}

pub(crate) fn distinct_by<T, K>(
    source: StageRef<T>,
    key: Arc<dyn Fn(&T) -> K + Send + Sync>,
) -> StageRef<T>
where
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
{
    Arc::new(PipeStage::new(
        source,
        Arc::new(move |rows: Vec<T>| {
            let mut seen = HashSet::new();
            Ok(rows
                .into_iter()
                .filter(|row| seen.insert(key(row)))
                .collect())
        }),
    ))
}

pub(crate) fn union_by<T, K>(
    left: StageRef<T>,
    right: StageRef<T>,
    key: Arc<dyn Fn(&T) -> K + Send + Sync>,
) -> StageRef<T>
where
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
{
    Arc::new(BinaryStage::new(
        left,
        right,
        Arc::new(move |left_rows: Vec<T>, right_rows: Vec<T>| {
            let mut seen = HashSet::new();
            Ok(left_rows
                .into_iter()
                .chain(right_rows)
                .filter(|row| seen.insert(key(row)))
                .collect())
        }),
    ))
}

pub(crate) fn intersect_by<T, K>(
    left: StageRef<T>,
    right: StageRef<T>,
    key: Arc<dyn Fn(&T) -> K + Send + Sync>,
) -> StageRef<T>
where
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
{
    Arc::new(BinaryStage::new(
        left,
        right,
        Arc::new(move |left_rows: Vec<T>, right_rows: Vec<T>| {
            let present: HashSet<K> = right_rows.iter().map(|row| key(row)).collect();
            let mut seen = HashSet::new();
            Ok(left_rows
                .into_iter()
                .filter(|row| {
                    let k = key(row);
                    present.contains(&k) && seen.insert(k)
                })
                .collect())
        }),
    ))
}

pub(crate) fn except_by<T, K>(
    left: StageRef<T>,
    right: StageRef<T>,
    key: Arc<dyn Fn(&T) -> K + Send + Sync>,
) -> StageRef<T>
where
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
{
    Arc::new(BinaryStage::new(
        left,
        right,
        Arc::new(move |left_rows: Vec<T>, right_rows: Vec<T>| {
            let excluded: HashSet<K> = right_rows.iter().map(|row| key(row)).collect();
            let mut seen = HashSet::new();
            Ok(left_rows
                .into_iter()
                .filter(|row| {
                    let k = key(row);
                    !excluded.contains(&k) && seen.insert(k)
                })
                .collect())
        }),
    ))
}

pub(crate) fn skip<T>(source: StageRef<T>, count: usize) -> StageRef<T>
where
    T: Send + 'static,
{
    Arc::new(PipeStage::new(
        source,
        Arc::new(move |rows: Vec<T>| Ok(rows.into_iter().skip(count).collect())),
    ))
}

pub(crate) fn skip_last<T>(source: StageRef<T>, count: usize) -> StageRef<T>
where
    T: Send + 'static,
{
    Arc::new(PipeStage::new(
        source,
        Arc::new(move |mut rows: Vec<T>| {
            let keep = rows.len().saturating_sub(count);
            rows.truncate(keep);
            Ok(rows)
        }),
    ))
}

/// Skip while the indexed predicate holds; plain skip-while passes a
/// predicate ignoring the index.
pub(crate) fn skip_while<T>(
    source: StageRef<T>,
    predicate: Arc<dyn Fn(&T, usize) -> bool + Send + Sync>,
) -> StageRef<T>
where
    T: Send + 'static,
{
    Arc::new(PipeStage::new(
        source,
        Arc::new(move |rows: Vec<T>| {
            let mut skipping = true;
            Ok(rows
                .into_iter()
                .enumerate()
                .filter_map(|(index, row)| {
                    if skipping && predicate(&row, index) {
                        None
                    } else {
                        skipping = false;
                        Some(row)
                    }
                })
                .collect())
        }),
    ))
}

pub(crate) fn take<T>(source: StageRef<T>, count: usize) -> StageRef<T>
where
    T: Send + 'static,
{
    Arc::new(PipeStage::new(
        source,
        Arc::new(move |mut rows: Vec<T>| {
            rows.truncate(count);
            Ok(rows)
        }),
    ))
}

pub(crate) fn take_last<T>(source: StageRef<T>, count: usize) -> StageRef<T>
where
    T: Send + 'static,
{
    Arc::new(PipeStage::new(
        source,
        Arc::new(move |mut rows: Vec<T>| {
            let skip = rows.len().saturating_sub(count);
            Ok(rows.split_off(skip))
        }),
    ))
}

pub(crate) fn take_while<T>(
    source: StageRef<T>,
    predicate: Arc<dyn Fn(&T, usize) -> bool + Send + Sync>,
) -> StageRef<T>
where
    T: Send + 'static,
{
    Arc::new(PipeStage::new(
        source,
        Arc::new(move |rows: Vec<T>| {
            let mut out = Vec::new();
            for (index, row) in rows.into_iter().enumerate() {
                if !predicate(&row, index) {
                    break;
                }
                out.push(row);
            }
            Ok(out)
        }),
    ))
}
