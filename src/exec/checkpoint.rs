//! Periodic materialization of large intermediate datasets.

use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{GbmError, Result};
use crate::exec::PartitionedDataset;
use crate::logger::TrainingLogger;

/// Keeps the last `keep` materialized snapshots of one dataset role.
///
/// On `update`, when the iteration hits the configured interval, the new
/// dataset is written to stable storage and the oldest retained snapshot is
/// removed. A write failure is fatal; removal failures during a non-blocking
/// `clear` are logged and swallowed.
pub struct Checkpointer {
    dir: PathBuf,
    role: &'static str,
    interval: i32,
    keep: usize,
    saved: VecDeque<PathBuf>,
    counter: usize,
}

impl Checkpointer {
    /// Create a checkpointer writing under `dir` for the named role.
    ///
    /// `interval <= 0` disables checkpointing entirely.
    pub fn new(dir: impl Into<PathBuf>, role: &'static str, interval: i32, keep: usize) -> Self {
        Self {
            dir: dir.into(),
            role,
            interval,
            keep: keep.max(1),
            saved: VecDeque::new(),
            counter: 0,
        }
    }

    /// Whether checkpointing is active.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.interval > 0
    }

    /// Paths of currently retained snapshots, oldest first.
    pub fn retained(&self) -> impl Iterator<Item = &Path> {
        self.saved.iter().map(|p| p.as_path())
    }

    /// Offer a new dataset; persists it when the iteration hits the interval.
    pub fn update<T: Serialize + Send + Sync>(
        &mut self,
        ds: &PartitionedDataset<T>,
        iteration: usize,
    ) -> Result<()> {
        if !self.is_enabled() || (iteration + 1) % self.interval as usize != 0 {
            return Ok(());
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}-{:05}.ckpt", self.role, self.counter));
        self.counter += 1;

        let partitions: Vec<&[T]> = (0..ds.num_partitions()).map(|p| ds.partition(p)).collect();
        let bytes = postcard::to_allocvec(&partitions)?;
        let mut file = fs::File::create(&path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        self.saved.push_back(path);
        while self.saved.len() > self.keep {
            if let Some(old) = self.saved.pop_front() {
                // Best effort: the new snapshot is already durable.
                let _ = fs::remove_file(old);
            }
        }
        Ok(())
    }

    /// Read a snapshot back into a partitioned dataset.
    pub fn load<T: DeserializeOwned + Send + Sync>(path: &Path) -> Result<PartitionedDataset<T>> {
        let bytes = fs::read(path)?;
        let partitions: Vec<Vec<T>> = postcard::from_bytes(&bytes)?;
        if partitions.is_empty() {
            return Err(GbmError::Format(format!(
                "checkpoint {} holds no partitions",
                path.display()
            )));
        }
        Ok(PartitionedDataset::from_partitions(partitions))
    }

    /// Drop all retained snapshots.
    pub fn clear(&mut self, blocking: bool, logger: &TrainingLogger) -> Result<()> {
        let mut first_err: Option<std::io::Error> = None;
        for path in self.saved.drain(..) {
            if let Err(err) = fs::remove_file(&path) {
                if blocking {
                    first_err.get_or_insert(err);
                } else {
                    logger.warn(&format!(
                        "failed to remove checkpoint {}: {err}",
                        path.display()
                    ));
                }
            }
        }
        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Verbosity;

    fn silent() -> TrainingLogger {
        TrainingLogger::new(Verbosity::Silent)
    }

    #[test]
    fn disabled_checkpointer_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(dir.path(), "raw", -1, 2);
        let ds = PartitionedDataset::partition_items(vec![1u32, 2, 3], 2);
        ckpt.update(&ds, 9).unwrap();
        assert_eq!(ckpt.retained().count(), 0);
    }

    #[test]
    fn writes_on_interval_and_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(dir.path(), "raw", 2, 2);
        let ds = PartitionedDataset::partition_items((0..8u32).collect(), 3);

        for iteration in 0..8 {
            ckpt.update(&ds, iteration).unwrap();
        }
        // Iterations 1, 3, 5, 7 hit the interval; only the last 2 survive.
        assert_eq!(ckpt.retained().count(), 2);
        for path in ckpt.retained() {
            assert!(path.exists());
        }
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(dir.path(), "raw", 1, 1);
        let ds = PartitionedDataset::from_partitions(vec![vec![1u32, 2], vec![3, 4, 5]]);
        ckpt.update(&ds, 0).unwrap();

        let path = ckpt.retained().next().unwrap().to_path_buf();
        let loaded: PartitionedDataset<u32> = Checkpointer::load(&path).unwrap();
        assert_eq!(loaded.num_partitions(), 2);
        assert_eq!(loaded.collect(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn clear_removes_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(dir.path(), "raw", 1, 3);
        let ds = PartitionedDataset::partition_items(vec![1u32], 1);
        ckpt.update(&ds, 0).unwrap();
        ckpt.update(&ds, 1).unwrap();

        let paths: Vec<PathBuf> = ckpt.retained().map(|p| p.to_path_buf()).collect();
        ckpt.clear(true, &silent()).unwrap();
        for path in paths {
            assert!(!path.exists());
        }
        assert_eq!(ckpt.retained().count(), 0);
    }
}
