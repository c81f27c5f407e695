//! In-process data-parallel execution layer.
//!
//! The engine expresses all parallelism through a small collection
//! abstraction: immutable partitioned datasets with map / zip / shuffle
//! primitives, broadcast of read-only values, and checkpointing of large
//! intermediates. Partitions execute on a rayon pool; within a partition,
//! iteration is strictly sequential so per-partition results are stable
//! across runs.
//!
//! Shuffled aggregations sort keys inside each output partition before the
//! final fold, which pins the floating-point reduction order and makes
//! training bitwise reproducible for a fixed seed and partitioning.

mod checkpoint;
mod partitioner;

pub use checkpoint::Checkpointer;
pub use partitioner::{
    select_partitioner, DepthPartitioner, HashPartitioner, HistKey, IdRangePartitioner,
    KeyPartitioner, SkipNodePartitioner,
};

use std::any::Any;
use std::sync::Arc;

use rayon::prelude::*;

use crate::logger::TrainingLogger;

// ============================================================================
// PartitionedDataset
// ============================================================================

/// Immutable collection of items grouped into partitions.
///
/// Partitions are shared via `Arc`, so deriving one dataset from another never
/// copies untouched partitions. Items are usually blocks ([`crate::data`]),
/// keeping per-item overhead negligible.
#[derive(Debug)]
pub struct PartitionedDataset<T> {
    parts: Vec<Arc<Vec<T>>>,
}

impl<T> Clone for PartitionedDataset<T> {
    fn clone(&self) -> Self {
        Self {
            parts: self.parts.clone(),
        }
    }
}

impl<T: Send + Sync> PartitionedDataset<T> {
    /// Wrap pre-built partitions.
    pub fn from_partitions(parts: Vec<Vec<T>>) -> Self {
        Self {
            parts: parts.into_iter().map(Arc::new).collect(),
        }
    }

    /// Distribute items over `num_partitions` contiguous chunks.
    pub fn partition_items(items: Vec<T>, num_partitions: usize) -> Self {
        assert!(num_partitions > 0, "num_partitions must be positive");
        let total = items.len();
        let per_part = total.div_ceil(num_partitions.min(total.max(1)));
        let mut parts: Vec<Vec<T>> = Vec::with_capacity(num_partitions);
        let mut iter = items.into_iter();
        loop {
            let chunk: Vec<T> = iter.by_ref().take(per_part.max(1)).collect();
            if chunk.is_empty() {
                break;
            }
            parts.push(chunk);
        }
        if parts.is_empty() {
            parts.push(Vec::new());
        }
        Self::from_partitions(parts)
    }

    /// Number of partitions.
    #[inline]
    pub fn num_partitions(&self) -> usize {
        self.parts.len()
    }

    /// Borrow partition `i`.
    #[inline]
    pub fn partition(&self, i: usize) -> &[T] {
        &self.parts[i]
    }

    /// Total number of items.
    pub fn count(&self) -> usize {
        self.parts.iter().map(|p| p.len()).sum()
    }

    /// Sequentially iterate over all items in partition order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.parts.iter().flat_map(|p| p.iter())
    }

    /// Apply `f` to every item, preserving partitioning.
    pub fn map<U: Send + Sync>(&self, f: impl Fn(&T) -> U + Sync) -> PartitionedDataset<U> {
        self.map_partitions(|_, items| items.iter().map(&f).collect())
    }

    /// Apply `f` to each whole partition, preserving partition count.
    pub fn map_partitions<U: Send + Sync>(
        &self,
        f: impl Fn(usize, &[T]) -> Vec<U> + Sync,
    ) -> PartitionedDataset<U> {
        let parts = self
            .parts
            .par_iter()
            .enumerate()
            .map(|(idx, part)| Arc::new(f(idx, part)))
            .collect();
        PartitionedDataset { parts }
    }

    /// Zip two positionally aligned datasets item by item.
    ///
    /// # Panics
    ///
    /// Panics if partition counts or partition lengths differ.
    pub fn zip_map<U: Send + Sync, V: Send + Sync>(
        &self,
        other: &PartitionedDataset<U>,
        f: impl Fn(&T, &U) -> V + Sync,
    ) -> PartitionedDataset<V> {
        assert_eq!(
            self.num_partitions(),
            other.num_partitions(),
            "zip requires identical partitioning"
        );
        let parts = self
            .parts
            .par_iter()
            .zip(other.parts.par_iter())
            .map(|(a, b)| {
                assert_eq!(a.len(), b.len(), "zip requires identical partition sizes");
                Arc::new(a.iter().zip(b.iter()).map(|(x, y)| f(x, y)).collect())
            })
            .collect();
        PartitionedDataset { parts }
    }

    /// Zip three positionally aligned datasets item by item.
    pub fn zip_map3<U: Send + Sync, W: Send + Sync, V: Send + Sync>(
        &self,
        second: &PartitionedDataset<U>,
        third: &PartitionedDataset<W>,
        f: impl Fn(&T, &U, &W) -> V + Sync,
    ) -> PartitionedDataset<V> {
        assert_eq!(self.num_partitions(), second.num_partitions());
        assert_eq!(self.num_partitions(), third.num_partitions());
        let parts = self
            .parts
            .par_iter()
            .zip(second.parts.par_iter())
            .zip(third.parts.par_iter())
            .map(|((a, b), c)| {
                assert_eq!(a.len(), b.len());
                assert_eq!(a.len(), c.len());
                Arc::new(
                    a.iter()
                        .zip(b.iter())
                        .zip(c.iter())
                        .map(|((x, y), z)| f(x, y, z))
                        .collect(),
                )
            })
            .collect();
        PartitionedDataset { parts }
    }

    /// Fold every partition sequentially, then combine partition results in
    /// partition order.
    ///
    /// `fold` must be associative and commutative for the result to be
    /// partitioning-independent; combining in partition order keeps it
    /// deterministic either way.
    pub fn aggregate<A: Send + Sync>(
        &self,
        init: impl Fn() -> A + Sync,
        fold: impl Fn(A, &T) -> A + Sync,
        combine: impl Fn(A, A) -> A,
    ) -> A {
        let partials: Vec<A> = self
            .parts
            .par_iter()
            .map(|part| part.iter().fold(init(), &fold))
            .collect();
        partials
            .into_iter()
            .fold(init(), |acc, partial| combine(acc, partial))
    }

    /// Collect all items into one vector in partition order.
    pub fn collect(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().cloned().collect()
    }
}

// ============================================================================
// Shuffle
// ============================================================================

/// Shuffle keyed items under `partitioner` and merge values per key.
///
/// Each output partition gathers its items from every input partition in
/// input order, sorts them by key (stable), and folds adjacent runs with
/// `merge`. The stable sort plus fixed gather order pins the fold order, so
/// float accumulation is reproducible.
pub fn aggregate_by_key<V: Send + Sync>(
    ds: &PartitionedDataset<(HistKey, V)>,
    partitioner: &dyn KeyPartitioner,
    merge: impl Fn(&mut V, V) + Sync,
) -> PartitionedDataset<(HistKey, V)>
where
    V: Clone,
{
    let num_out = partitioner.num_partitions();

    // Phase 1: bucket each input partition by target partition.
    let bucketed: Vec<Vec<Vec<(HistKey, V)>>> = (0..ds.num_partitions())
        .into_par_iter()
        .map(|p| {
            let mut buckets: Vec<Vec<(HistKey, V)>> = (0..num_out).map(|_| Vec::new()).collect();
            for (key, value) in ds.partition(p) {
                buckets[partitioner.partition(key)].push((*key, value.clone()));
            }
            buckets
        })
        .collect();

    // Phase 2: per output partition, gather, sort, fold runs.
    let parts: Vec<Arc<Vec<(HistKey, V)>>> = (0..num_out)
        .into_par_iter()
        .map(|out| {
            let mut items: Vec<(HistKey, V)> = Vec::new();
            for buckets in &bucketed {
                items.extend(buckets[out].iter().cloned());
            }
            items.sort_by_key(|(key, _)| *key);

            let mut merged: Vec<(HistKey, V)> = Vec::new();
            for (key, value) in items {
                match merged.last_mut() {
                    Some((last_key, last_value)) if *last_key == key => {
                        merge(last_value, value);
                    }
                    _ => merged.push((key, value)),
                }
            }
            Arc::new(merged)
        })
        .collect();

    PartitionedDataset { parts }
}

// ============================================================================
// Broadcast + ResourceCleaner
// ============================================================================

/// Shared read-only value handed to every partition task.
#[derive(Debug)]
pub struct Broadcast<T> {
    value: Arc<T>,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Broadcast<T> {
    /// Wrap a value for sharing.
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    /// Borrow the broadcast value.
    #[inline]
    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T> std::ops::Deref for Broadcast<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Tracks per-iteration resources and releases them on every exit path.
///
/// Broadcast handles keep their payload alive until the cleaner clears;
/// registered actions (checkpoint file removal and similar) run at clear time.
/// In non-blocking mode a failing action is logged and swallowed; in blocking
/// mode the first failure is returned.
#[derive(Default)]
pub struct ResourceCleaner {
    handles: Vec<Arc<dyn Any + Send + Sync>>,
    actions: Vec<(String, Box<dyn FnOnce() -> std::io::Result<()> + Send>)>,
}

impl ResourceCleaner {
    /// Create an empty cleaner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep a broadcast handle alive until the next clear.
    pub fn register_broadcast<T: Send + Sync + 'static>(&mut self, broadcast: &Broadcast<T>) {
        self.handles.push(broadcast.value.clone());
    }

    /// Register a cleanup action to run at clear time.
    pub fn register_action(
        &mut self,
        name: impl Into<String>,
        action: impl FnOnce() -> std::io::Result<()> + Send + 'static,
    ) {
        self.actions.push((name.into(), Box::new(action)));
    }

    /// Number of pending handles and actions.
    pub fn pending(&self) -> usize {
        self.handles.len() + self.actions.len()
    }

    /// Release everything registered since the last clear.
    pub fn clear(&mut self, blocking: bool, logger: &TrainingLogger) -> std::io::Result<()> {
        self.handles.clear();
        let mut first_err = None;
        for (name, action) in self.actions.drain(..) {
            if let Err(err) = action() {
                if blocking {
                    first_err.get_or_insert(err);
                } else {
                    logger.warn(&format!("cleanup of {name} failed: {err}"));
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ResourceCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCleaner")
            .field("handles", &self.handles.len())
            .field("actions", &self.actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Verbosity;

    #[test]
    fn partition_items_spreads_evenly() {
        let ds = PartitionedDataset::partition_items((0..10).collect(), 3);
        assert_eq!(ds.count(), 10);
        assert!(ds.num_partitions() <= 3);
        let collected = ds.collect();
        assert_eq!(collected, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn partition_items_handles_empty() {
        let ds = PartitionedDataset::partition_items(Vec::<i32>::new(), 4);
        assert_eq!(ds.count(), 0);
        assert_eq!(ds.num_partitions(), 1);
    }

    #[test]
    fn map_preserves_partitioning() {
        let ds = PartitionedDataset::from_partitions(vec![vec![1, 2], vec![3]]);
        let doubled = ds.map(|x| x * 2);
        assert_eq!(doubled.partition(0), &[2, 4]);
        assert_eq!(doubled.partition(1), &[6]);
    }

    #[test]
    fn zip_map_aligns_items() {
        let a = PartitionedDataset::from_partitions(vec![vec![1, 2], vec![3]]);
        let b = PartitionedDataset::from_partitions(vec![vec![10, 20], vec![30]]);
        let sums = a.zip_map(&b, |x, y| x + y);
        assert_eq!(sums.collect(), vec![11, 22, 33]);
    }

    #[test]
    #[should_panic(expected = "identical partitioning")]
    fn zip_map_rejects_mismatched_partitions() {
        let a = PartitionedDataset::from_partitions(vec![vec![1]]);
        let b = PartitionedDataset::from_partitions(vec![vec![1], vec![2]]);
        let _ = a.zip_map(&b, |x, y| x + y);
    }

    #[test]
    fn aggregate_sums() {
        let ds = PartitionedDataset::partition_items((1..=100).collect(), 7);
        let sum = ds.aggregate(|| 0u64, |acc, &x| acc + x as u64, |a, b| a + b);
        assert_eq!(sum, 5050);
    }

    #[test]
    fn aggregate_by_key_merges_across_partitions() {
        let key = |col: u32| HistKey {
            tree: 0,
            node: 1,
            col,
        };
        let ds = PartitionedDataset::from_partitions(vec![
            vec![(key(0), 1.0f64), (key(1), 2.0)],
            vec![(key(0), 10.0), (key(2), 5.0)],
        ]);
        let partitioner = HashPartitioner::new(2);
        let merged = aggregate_by_key(&ds, &partitioner, |a, b| *a += b);

        let mut items = merged.collect();
        items.sort_by_key(|(k, _)| *k);
        assert_eq!(
            items,
            vec![(key(0), 11.0), (key(1), 2.0), (key(2), 5.0)]
        );
    }

    #[test]
    fn aggregate_by_key_is_deterministic() {
        let key = |node: u32, col: u32| HistKey { tree: 0, node, col };
        let items: Vec<(HistKey, f64)> = (0..200)
            .map(|i| (key(i % 7, i % 13), (i as f64) * 0.1))
            .collect();
        let ds = PartitionedDataset::partition_items(items, 5);
        let partitioner = HashPartitioner::new(3);

        let a = aggregate_by_key(&ds, &partitioner, |x, y| *x += y);
        let b = aggregate_by_key(&ds, &partitioner, |x, y| *x += y);
        // Bitwise equality: the fold order is pinned.
        assert_eq!(a.collect(), b.collect());
    }

    #[test]
    fn cleaner_runs_actions_once() {
        let logger = TrainingLogger::new(Verbosity::Silent);
        let mut cleaner = ResourceCleaner::new();
        let broadcast = Broadcast::new(vec![1, 2, 3]);
        cleaner.register_broadcast(&broadcast);
        cleaner.register_action("noop", || Ok(()));
        assert_eq!(cleaner.pending(), 2);

        cleaner.clear(true, &logger).unwrap();
        assert_eq!(cleaner.pending(), 0);
    }

    #[test]
    fn cleaner_swallows_errors_when_not_blocking() {
        let logger = TrainingLogger::new(Verbosity::Silent);
        let mut cleaner = ResourceCleaner::new();
        cleaner.register_action("boom", || {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
        });
        assert!(cleaner.clear(false, &logger).is_ok());

        cleaner.register_action("boom", || {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
        });
        assert!(cleaner.clear(true, &logger).is_err());
    }
}
