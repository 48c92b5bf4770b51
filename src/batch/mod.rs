//! Batch fan-out and result aggregation.
//!
//! [`BatchCoordinator`] submits every item to the [`ItemPipeline`] through the
//! [`ConcurrencyLimiter`] and folds the outcomes into a [`BatchReport`]. The
//! report is built only after the limiter returns, so no task ever touches it.

mod report;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::limiter::{Admission, ConcurrencyLimiter, LimiterError};
use crate::pipeline::{ItemOutcome, ItemPipeline, WorkItem};

pub use report::BatchReport;

/// Runs batches of work items.
#[derive(Debug)]
pub struct BatchCoordinator {
    pipeline: Arc<ItemPipeline>,
    limiter: ConcurrencyLimiter,
}

impl BatchCoordinator {
    /// Creates a coordinator running at most `max_concurrency` items at once.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::InvalidConcurrency`] when `max_concurrency` is 0.
    pub fn new(pipeline: Arc<ItemPipeline>, max_concurrency: usize) -> Result<Self, LimiterError> {
        Ok(Self {
            pipeline,
            limiter: ConcurrencyLimiter::new(max_concurrency)?,
        })
    }

    /// Sets how long in-flight items may finish after cancellation.
    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.limiter = self.limiter.with_drain_timeout(drain_timeout);
        self
    }

    /// Returns the limiter, for instrumentation.
    #[must_use]
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Processes every item to completion.
    pub async fn run(&self, items: Vec<WorkItem>) -> BatchReport {
        self.run_until_cancelled(items, &CancellationToken::new()).await
    }

    /// Processes items until done or until `cancel` fires. Items not admitted
    /// or abandoned after the drain window are reported as cancelled.
    #[instrument(skip_all, fields(items = items.len(), concurrency = self.limiter.max_concurrency()))]
    pub async fn run_until_cancelled(
        &self,
        items: Vec<WorkItem>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let started = Instant::now();

        let tasks: Vec<_> = items
            .iter()
            .map(|item| {
                let pipeline = Arc::clone(&self.pipeline);
                let item = item.clone();
                async move { pipeline.process(&item).await }
            })
            .collect();

        let admissions = self.limiter.run_bounded(tasks, cancel).await;

        let outcomes = items.into_iter().zip(admissions).map(|(item, admission)| {
            let outcome = match admission {
                Admission::Completed(outcome) => outcome,
                Admission::NotAdmitted | Admission::Abandoned => ItemOutcome::Cancelled,
            };
            (item, outcome)
        });

        let report = BatchReport::from_outcomes(outcomes, started.elapsed());

        info!(
            submitted = report.submitted(),
            succeeded = report.success_count(),
            skipped = report.skipped_count(),
            failed = report.failure_count(),
            cancelled = report.cancelled_count(),
            peak_active = self.limiter.peak_active(),
            elapsed_ms = report.elapsed.as_millis(),
            "batch complete"
        );

        report
    }
}
