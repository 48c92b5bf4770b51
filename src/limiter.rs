//! Admission control for item pipelines.
//!
//! [`ConcurrencyLimiter`] runs a list of futures with at most
//! `max_concurrency` of them in flight. Tasks are admitted in submission order;
//! each admitted task holds a semaphore permit until it finishes, whether it
//! succeeds, fails, or panics.
//!
//! On cancellation no further tasks are admitted. Tasks already running get a
//! drain window to finish, after which they are aborted.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Smallest accepted concurrency.
pub const MIN_CONCURRENCY: usize = 1;

/// Concurrency above which construction logs a warning.
pub const HIGH_CONCURRENCY: usize = 100;

/// Default concurrency.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default time in-flight tasks get to finish after cancellation.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from limiter construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimiterError {
    /// Requested concurrency is below the minimum.
    #[error("concurrency must be at least {MIN_CONCURRENCY}, got {value}")]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },
}

/// What happened to one submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission<T> {
    /// The task ran to completion.
    Completed(T),
    /// Cancellation fired before the task was admitted.
    NotAdmitted,
    /// The task was admitted but aborted or panicked before completing.
    Abandoned,
}

impl<T> Admission<T> {
    /// Returns the task output, if it completed.
    pub fn into_completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::NotAdmitted | Self::Abandoned => None,
        }
    }
}

/// Bounded-parallelism task runner.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    drain_timeout: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    /// Creates a limiter admitting at most `max_concurrency` tasks at once.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::InvalidConcurrency`] when `max_concurrency` is 0.
    pub fn new(max_concurrency: usize) -> Result<Self, LimiterError> {
        if max_concurrency < MIN_CONCURRENCY {
            return Err(LimiterError::InvalidConcurrency {
                value: max_concurrency,
            });
        }
        if max_concurrency > HIGH_CONCURRENCY {
            warn!(max_concurrency, "high concurrency may overload the remote service");
        }

        Ok(Self {
            // Semaphore::new panics above MAX_PERMITS, which is unbounded in practice.
            semaphore: Arc::new(Semaphore::new(max_concurrency.min(Semaphore::MAX_PERMITS))),
            max_concurrency,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Sets how long in-flight tasks may run after cancellation.
    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Returns the configured maximum concurrency.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of tasks currently holding a slot.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously active tasks observed.
    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Runs `tasks`, returning one [`Admission`] per task in submission order.
    pub async fn run_bounded<T, F>(
        &self,
        tasks: Vec<F>,
        cancel: &CancellationToken,
    ) -> Vec<Admission<T>>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let total = tasks.len();
        let mut slots: Vec<Admission<T>> = Vec::with_capacity(total);
        let mut join_set: JoinSet<(usize, T)> = JoinSet::new();
        let mut admitted = 0usize;

        for (index, task) in tasks.into_iter().enumerate() {
            // Race the permit against cancellation so a full limiter does not
            // delay shutdown.
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = Arc::clone(&self.semaphore).acquire_owned() => result.ok(),
            };
            let Some(permit) = permit else {
                debug!(index, "admission stopped");
                break;
            };

            slots.push(Admission::Abandoned);
            admitted += 1;

            let guard = ActiveGuard::enter(Arc::clone(&self.active), &self.peak);
            join_set.spawn(async move {
                // Permit and guard are released when this block exits (RAII)
                let _permit = permit;
                let _guard = guard;
                (index, task.await)
            });

            while let Some(joined) = join_set.try_join_next() {
                record(&mut slots, joined);
            }
        }

        slots.resize_with(total, || Admission::NotAdmitted);
        debug!(admitted, total, "admission finished, waiting for tasks");

        loop {
            let joined = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                joined = join_set.join_next() => joined,
            };
            match joined {
                Some(joined) => record(&mut slots, joined),
                None => break,
            }
        }

        if !join_set.is_empty() {
            info!(
                in_flight = join_set.len(),
                drain_ms = self.drain_timeout.as_millis(),
                "cancelled, draining in-flight tasks"
            );
            let deadline = tokio::time::Instant::now() + self.drain_timeout;
            loop {
                match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                    Ok(Some(joined)) => record(&mut slots, joined),
                    Ok(None) => break,
                    Err(_) => {
                        warn!(aborted = join_set.len(), "drain window elapsed, aborting tasks");
                        join_set.abort_all();
                        while let Some(joined) = join_set.join_next().await {
                            record(&mut slots, joined);
                        }
                        break;
                    }
                }
            }
        }

        slots
    }
}

fn record<T>(slots: &mut [Admission<T>], joined: Result<(usize, T), tokio::task::JoinError>) {
    match joined {
        Ok((index, value)) => slots[index] = Admission::Completed(value),
        // Slot keeps its Abandoned placeholder.
        Err(e) if e.is_panic() => warn!(error = %e, "task panicked"),
        Err(e) => debug!(error = %e, "task aborted"),
    }
}

/// Tracks active tasks for instrumentation.
struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl ActiveGuard {
    fn enter(active: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_zero_concurrency() {
        assert_eq!(
            ConcurrencyLimiter::new(0).unwrap_err(),
            LimiterError::InvalidConcurrency { value: 0 }
        );
        assert!(ConcurrencyLimiter::new(1).is_ok());
    }

    #[test]
    fn test_accepts_concurrency_above_one_hundred() {
        let limiter = ConcurrencyLimiter::new(150).unwrap();
        assert_eq!(limiter.max_concurrency(), 150);
        assert!(ConcurrencyLimiter::new(usize::MAX).is_ok());
    }

    #[tokio::test]
    async fn test_wide_limit_admits_every_task() {
        let limiter = ConcurrencyLimiter::new(150).unwrap();
        let tasks: Vec<_> = (0..120u32)
            .map(|i| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                i
            })
            .collect();
        let results = limiter.run_bounded(tasks, &CancellationToken::new()).await;
        assert_eq!(results.len(), 120);
        assert_eq!(limiter.peak_active(), 120);
    }

    #[tokio::test]
    async fn test_results_in_submission_order() {
        let limiter = ConcurrencyLimiter::new(3).unwrap();
        let tasks: Vec<_> = (0..6u64)
            .map(|i| async move {
                tokio::time::sleep(Duration::from_millis(30 - i * 5)).await;
                i
            })
            .collect();
        let results = limiter.run_bounded(tasks, &CancellationToken::new()).await;
        let values: Vec<_> = results.into_iter().map(|a| a.into_completed().unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(limiter.active(), 0);
    }

    #[tokio::test]
    async fn test_empty_task_list() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let results: Vec<Admission<()>> = limiter
            .run_bounded(Vec::<std::future::Ready<()>>::new(), &CancellationToken::new())
            .await;
        assert!(results.is_empty());
        assert_eq!(limiter.peak_active(), 0);
    }

    async fn explode() -> u32 {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panicking_task_releases_slot() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let tasks: Vec<std::pin::Pin<Box<dyn Future<Output = u32> + Send>>> =
            vec![Box::pin(explode()), Box::pin(async { 7 })];
        let results = limiter.run_bounded(tasks, &CancellationToken::new()).await;
        assert_eq!(results[0], Admission::Abandoned);
        assert_eq!(results[1], Admission::Completed(7));
        assert_eq!(limiter.active(), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start_admits_nothing() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let tasks: Vec<_> = (0..3).map(|i| async move { i }).collect();
        let results = limiter.run_bounded(tasks, &cancel).await;
        assert!(results.iter().all(|a| *a == Admission::NotAdmitted));
    }

    #[tokio::test]
    async fn test_cancel_aborts_after_drain_window() {
        let limiter = ConcurrencyLimiter::new(1)
            .unwrap()
            .with_drain_timeout(Duration::from_millis(20));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let tasks: Vec<_> = (0..3)
            .map(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .collect();
        let results = limiter.run_bounded(tasks, &cancel).await;

        assert_eq!(results[0], Admission::Abandoned);
        assert_eq!(results[1], Admission::NotAdmitted);
        assert_eq!(results[2], Admission::NotAdmitted);
        assert_eq!(limiter.active(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_peak_never_exceeds_limit(limit in 1usize..8, task_count in 0usize..40) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();
            let limiter = ConcurrencyLimiter::new(limit).unwrap();
            let observed = Arc::new(AtomicUsize::new(0));
            let max_seen = Arc::new(AtomicUsize::new(0));

            let tasks: Vec<_> = (0..task_count)
                .map(|i| {
                    let observed = Arc::clone(&observed);
                    let max_seen = Arc::clone(&max_seen);
                    async move {
                        let now = observed.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis((i % 3) as u64)).await;
                        observed.fetch_sub(1, Ordering::SeqCst);
                    }
                })
                .collect();

            let results = runtime.block_on(limiter.run_bounded(tasks, &CancellationToken::new()));

            prop_assert_eq!(results.len(), task_count);
            prop_assert!(max_seen.load(Ordering::SeqCst) <= limit);
            prop_assert!(limiter.peak_active() <= limit);
            prop_assert_eq!(limiter.active(), 0);
        }
    }
}
