#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Worker pools for the alert pipeline stages.
//!
//! Every stage call builds its own [`WorkerPool`] with exactly the requested
//! number of threads, so one worker really means serial execution and
//! results never depend on the global `rayon` pool. Tasks only receive shared
//! references; outputs are collected in input order and the first error
//! aborts the whole call.

pub mod progress;

use std::ops::Range;

use rayon::prelude::*;

/// Errors that can occur while setting up a worker pool.
#[derive(Debug, thiserror::Error)]
pub enum ParallelError {
    /// A pool needs at least one worker.
    #[error("worker_count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),

    /// The operating system refused to start the worker threads.
    #[error("Failed to start worker pool: {0}")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),
}

/// Rejects a zero worker count.
///
/// # Errors
///
/// Returns [`ParallelError::InvalidWorkerCount`] when `worker_count == 0`.
pub const fn check_worker_count(worker_count: usize) -> Result<(), ParallelError> {
    if worker_count == 0 {
        Err(ParallelError::InvalidWorkerCount(worker_count))
    } else {
        Ok(())
    }
}

/// Splits `0..len` into `min(parts, len)` contiguous ranges whose lengths
/// differ by at most one, longer ranges first.
#[must_use]
pub fn balanced_chunks(len: usize, parts: usize) -> Vec<Range<usize>> {
    let count = parts.min(len);
    if count == 0 {
        return Vec::new();
    }

    let base = len / count;
    let extra = len % count;
    let mut start = 0;
    (0..count)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// A dedicated thread pool sized for one stage call.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    worker_count: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Starts `worker_count` worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`ParallelError`] for a zero count or if the threads cannot
    /// be spawned.
    pub fn new(worker_count: usize) -> Result<Self, ParallelError> {
        check_worker_count(worker_count)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|i| format!("forest-alert-worker-{i}"))
            .build()?;

        log::debug!("Started worker pool with {worker_count} threads");

        Ok(Self { pool, worker_count })
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Runs `task` once per item. Results come back in input order; the
    /// first error short-circuits the call.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `task`.
    pub fn map<T, R, E, F>(&self, items: &[T], task: F) -> Result<Vec<R>, E>
    where
        T: Sync,
        R: Send,
        E: Send,
        F: Fn(&T) -> Result<R, E> + Sync + Send,
    {
        self.pool.install(|| items.par_iter().map(task).collect())
    }

    /// Splits `items` into [`balanced_chunks`] (one per worker at most) and
    /// runs `task` once per chunk. Results come back in chunk order.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `task`.
    pub fn map_chunks<T, R, E, F>(&self, items: &[T], task: F) -> Result<Vec<R>, E>
    where
        T: Sync,
        R: Send,
        E: Send,
        F: Fn(&[T]) -> Result<R, E> + Sync + Send,
    {
        let chunks = balanced_chunks(items.len(), self.worker_count);
        log::debug!(
            "Dispatching {} items in {} chunks",
            items.len(),
            chunks.len()
        );

        self.pool.install(|| {
            chunks
                .into_par_iter()
                .map(|range| task(&items[range]))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn zero_workers_are_rejected() {
        assert!(matches!(
            WorkerPool::new(0),
            Err(ParallelError::InvalidWorkerCount(0))
        ));
        assert!(check_worker_count(1).is_ok());
    }

    #[test]
    fn single_worker_pool_has_one_thread() {
        let pool = WorkerPool::new(1).unwrap();
        let threads = pool.map(&[()], |_| Ok::<_, ()>(rayon::current_num_threads()));
        assert_eq!(threads, Ok(vec![1]));
    }

    #[test]
    fn map_preserves_input_order() {
        let pool = WorkerPool::new(4).unwrap();
        let items: Vec<u32> = (0..100).collect();
        let doubled = pool.map(&items, |x| Ok::<_, ()>(x * 2)).unwrap();
        assert_eq!(doubled, items.iter().map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn map_fails_when_any_task_fails() {
        let pool = WorkerPool::new(3).unwrap();
        let items: Vec<u32> = (0..50).collect();
        let result = pool.map(&items, |x| if *x == 17 { Err(*x) } else { Ok(*x) });
        assert_eq!(result, Err(17));
    }

    #[test]
    fn map_chunks_covers_every_item_once() {
        let pool = WorkerPool::new(3).unwrap();
        let items: Vec<u32> = (1..=10).collect();
        let sums = pool
            .map_chunks(&items, |chunk| Ok::<_, ()>(chunk.to_vec()))
            .unwrap();
        assert_eq!(sums, vec![vec![1, 2, 3, 4], vec![5, 6, 7], vec![8, 9, 10]]);
    }

    #[test]
    fn chunks_of_empty_input() {
        assert!(balanced_chunks(0, 4).is_empty());
        assert_eq!(balanced_chunks(2, 4), vec![0..1, 1..2]);
    }

    proptest! {
        #[test]
        fn chunks_are_balanced_and_contiguous(len in 0usize..500, parts in 1usize..32) {
            let chunks = balanced_chunks(len, parts);
            prop_assert_eq!(chunks.len(), parts.min(len));

            let mut expected_start = 0;
            for chunk in &chunks {
                prop_assert_eq!(chunk.start, expected_start);
                prop_assert!(!chunk.is_empty());
                expected_start = chunk.end;
            }
            prop_assert_eq!(expected_start, len);

            if let (Some(max), Some(min)) = (
                chunks.iter().map(ExactSizeIterator::len).max(),
                chunks.iter().map(ExactSizeIterator::len).min(),
            ) {
                prop_assert!(max - min <= 1);
            }
        }
    }
}
