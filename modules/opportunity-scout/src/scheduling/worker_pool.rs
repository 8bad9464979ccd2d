use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::Instant;

/// Point in time after which no new work starts. In-flight work is
/// never interrupted.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A budget too large to represent is treated as no deadline.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
        }
    }

    pub fn never() -> Self {
        Self { at: None }
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, or `None` for an unbounded deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::never()
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0:#}")]
    Failed(anyhow::Error),

    #[error("not started: run deadline elapsed")]
    DeadlineElapsed,
}

/// Bounded-concurrency fan-out.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    deadline: Deadline,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            deadline: Deadline::never(),
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `worker` over every item with at most `concurrency` in flight.
    ///
    /// Returns one slot per input, index-aligned with `items`. A failing
    /// worker fills its own slot with an error and leaves siblings alone.
    /// Items not yet started when the deadline passes are marked
    /// [`WorkerError::DeadlineElapsed`].
    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, worker: F) -> Vec<Result<T, WorkerError>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let total = items.len();
        let deadline = self.deadline;
        let worker = &worker;

        let mut finished: Vec<(usize, Result<T, WorkerError>)> = stream::iter(items.into_iter().enumerate())
            .map(|(idx, item)| async move {
                if deadline.is_expired() {
                    return (idx, Err(WorkerError::DeadlineElapsed));
                }
                (idx, worker(item).await.map_err(WorkerError::Failed))
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        finished.sort_by_key(|(idx, _)| *idx);
        debug_assert_eq!(finished.len(), total);
        finished.into_iter().map(|(_, slot)| slot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn results_are_index_aligned_despite_completion_order() {
        let pool = WorkerPool::new(4);
        let items: Vec<u64> = vec![40, 10, 30, 20, 0];
        let results = pool
            .run(items.clone(), |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ms * 2)
            })
            .await;
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![80, 20, 60, 40, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(3);

        let results = pool
            .run((0..20).collect::<Vec<_>>(), |i| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(i)
                }
            })
            .await;

        assert_eq!(results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_slot() {
        let pool = WorkerPool::new(8);
        let results = pool
            .run((0..10).collect::<Vec<u32>>(), |i| async move {
                if i % 3 == 0 {
                    anyhow::bail!("item {i} failed");
                }
                Ok(i)
            })
            .await;

        assert_eq!(results.len(), 10);
        for (i, slot) in results.iter().enumerate() {
            if i % 3 == 0 {
                assert!(matches!(slot, Err(WorkerError::Failed(_))));
            } else {
                assert_eq!(*slot.as_ref().unwrap(), i as u32);
            }
        }
    }

    #[tokio::test]
    async fn empty_input_yields_no_slots() {
        let results = WorkerPool::new(2)
            .run(Vec::<u8>::new(), |i| async move { Ok(i) })
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_new_workers_after_deadline() {
        let started = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(1).with_deadline(Deadline::after(Duration::from_millis(25)));

        let results = pool
            .run((0..10).collect::<Vec<u32>>(), |i| {
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, anyhow::Error>(i)
                }
            })
            .await;

        assert_eq!(results.len(), 10);
        // Workers start at t=0, 10, 20; the one started at 20 runs to completion.
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert!(results[2].is_ok());
        assert!(results[3..]
            .iter()
            .all(|r| matches!(r, Err(WorkerError::DeadlineElapsed))));
    }

    #[test]
    fn unrepresentable_budget_means_no_deadline() {
        let deadline = Deadline::after(Duration::from_secs(u64::MAX));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining().is_none());
    }

    #[tokio::test]
    async fn zero_budget_expires_immediately() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        assert_eq!(WorkerPool::new(0).concurrency(), 1);
    }
}
