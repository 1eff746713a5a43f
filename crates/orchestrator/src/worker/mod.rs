//! Submission worker: the claim / process / sleep loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use dirsubmit_core::SubmissionId;

use crate::claim::QueueClaimer;
use crate::clock::Clock;
use crate::config::WorkerConfig;
use crate::processor::{IntegrationRegistry, JobProcessor, ProcessOutcome};
use crate::retry::RetryPolicy;
use crate::store::{FailureOutcome, JobStore, StoreError};

mod budget;

pub use budget::DailyBudget;

/// Batch-level failure; the loop backs off and tries again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub claimed: usize,
    pub submitted: usize,
    pub action_needed: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Claims returned to the queue on shutdown.
    pub released: usize,
    /// Failures that could not be recorded; those jobs stay `in_progress`.
    pub unrecorded: usize,
    pub budget_exhausted: bool,
}

/// Counters accumulated across batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub batches: u64,
    pub batch_errors: u64,
    pub claimed: u64,
    pub submitted: u64,
    pub action_needed: u64,
    pub requeued: u64,
    pub failed: u64,
    pub released: u64,
}

impl WorkerStats {
    fn record(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.claimed += report.claimed as u64;
        self.submitted += report.submitted as u64;
        self.action_needed += report.action_needed as u64;
        self.requeued += report.requeued as u64;
        self.failed += report.failed as u64;
        self.released += report.released as u64;
    }
}

/// Handle to a worker running on the tokio runtime.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request shutdown and wait for the in-flight job to finish.
    /// Returns the final counters.
    pub async fn shutdown(self) -> WorkerStats {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "submission worker task panicked");
        }
        read_stats(&self.stats)
    }

    pub fn stats(&self) -> WorkerStats {
        read_stats(&self.stats)
    }
}

fn read_stats(stats: &Mutex<WorkerStats>) -> WorkerStats {
    stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Claims and processes submissions in batches.
pub struct SubmissionWorker<S: JobStore> {
    store: Arc<S>,
    claimer: QueueClaimer<S>,
    processor: JobProcessor<S>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    budget: DailyBudget,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<S: JobStore> SubmissionWorker<S> {
    pub fn new(
        store: Arc<S>,
        registry: IntegrationRegistry,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        let retry = config.retry_policy();
        let claimer = QueueClaimer::new(store.clone(), config.rate_limit_policy(), retry);
        let processor = JobProcessor::new(store.clone(), registry, clock.clone())
            .with_action_deadline(config.action_deadline());
        let budget = DailyBudget::new(config.max_submissions_per_day, clock.now());

        Self {
            store,
            claimer,
            processor,
            retry,
            clock,
            budget,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        read_stats(&self.stats)
    }

    /// Run on the current runtime until the returned handle is shut down.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let join = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }

    /// Loop until `shutdown` becomes `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.config.batch_size,
            daily_limit = self.budget.limit(),
            "submission worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.run_batch_until(&shutdown).await {
                Ok(report) => {
                    if report.claimed > 0 {
                        info!(
                            claimed = report.claimed,
                            submitted = report.submitted,
                            action_needed = report.action_needed,
                            requeued = report.requeued,
                            failed = report.failed,
                            released = report.released,
                            "batch complete"
                        );
                    }
                    self.config.batch_interval
                }
                Err(err) => {
                    self.stats
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .batch_errors += 1;
                    warn!(error = %err, backoff_secs = self.config.error_backoff.as_secs(), "batch failed");
                    self.config.error_backoff
                }
            };

            if !sleep_or_shutdown(pause, &mut shutdown).await {
                break;
            }
        }

        info!("submission worker stopped");
    }

    /// Run a single claim / process iteration.
    pub async fn run_batch(&mut self) -> Result<BatchReport, WorkerError> {
        let (_tx, never) = watch::channel(false);
        self.run_batch_until(&never).await
    }

    async fn run_batch_until(
        &mut self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<BatchReport, WorkerError> {
        let mut report = BatchReport::default();

        let remaining = self.budget.remaining(self.clock.now());
        if remaining == 0 {
            debug!(daily_limit = self.budget.limit(), "daily budget exhausted");
            report.budget_exhausted = true;
            return Ok(report);
        }

        let max_batch = self.config.batch_size.min(remaining as usize);
        let claimed = self.claimer.claim(max_batch, self.clock.now()).await?;
        report.claimed = claimed.len();

        for (idx, job) in claimed.iter().enumerate() {
            match self.processor.process(job).await {
                Ok(ProcessOutcome::Submitted) => report.submitted += 1,
                Ok(ProcessOutcome::ActionNeeded) => report.action_needed += 1,
                Err(err) => {
                    let message = err.to_string();
                    match self
                        .store
                        .record_failure(job.id, &message, &self.retry, self.clock.now())
                        .await
                    {
                        Ok(FailureOutcome::Requeued { retry_count }) => {
                            warn!(submission_id = %job.id, retry_count, error = %message, "submission requeued");
                            report.requeued += 1;
                        }
                        Ok(FailureOutcome::Failed { retry_count }) => {
                            warn!(submission_id = %job.id, retry_count, error = %message, "submission failed");
                            report.failed += 1;
                        }
                        Err(store_err) => {
                            error!(
                                submission_id = %job.id,
                                error = %store_err,
                                cause = %message,
                                "could not record failure, leaving job in progress"
                            );
                            report.unrecorded += 1;
                        }
                    }
                }
            }
            self.budget.record(self.clock.now(), 1);

            if *shutdown.borrow() {
                let rest: Vec<SubmissionId> = claimed[idx + 1..].iter().map(|s| s.id).collect();
                report.released = self.release(&rest).await;
                break;
            }
        }

        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(&report);
        Ok(report)
    }

    async fn release(&self, ids: &[SubmissionId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        match self.store.release_claims(ids, self.clock.now()).await {
            Ok(released) => {
                info!(released, "released unprocessed claims on shutdown");
                released
            }
            Err(err) => {
                error!(error = %err, count = ids.len(), "failed to release claims");
                0
            }
        }
    }
}

/// Sleep for `pause`; `false` if shutdown was requested meanwhile.
pub(crate) async fn sleep_or_shutdown(pause: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(pause) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    use crate::clock::ManualClock;
    use crate::processor::{DirectoryIntegration, IntegrationError, IntegrationReceipt};
    use crate::store::InMemoryStore;
    use dirsubmit_core::{
        BusinessProfile, Directory, DirectoryId, NewSubmission, Submission, SubmissionMode,
        SubmissionStatus, UserId,
    };

    struct Accepting;

    #[async_trait]
    impl DirectoryIntegration for Accepting {
        async fn submit(
            &self,
            _: &Submission,
            _: &Directory,
            _: &BusinessProfile,
        ) -> Result<IntegrationReceipt, IntegrationError> {
            Ok(IntegrationReceipt::default())
        }
    }

    /// Accepts the submission and then requests shutdown.
    struct ShutdownAfterSubmit(watch::Sender<bool>);

    #[async_trait]
    impl DirectoryIntegration for ShutdownAfterSubmit {
        async fn submit(
            &self,
            _: &Submission,
            _: &Directory,
            _: &BusinessProfile,
        ) -> Result<IntegrationReceipt, IntegrationError> {
            let _ = self.0.send(true);
            Ok(IntegrationReceipt::default())
        }
    }

    struct Failing;

    #[async_trait]
    impl DirectoryIntegration for Failing {
        async fn submit(
            &self,
            _: &Submission,
            _: &Directory,
            _: &BusinessProfile,
        ) -> Result<IntegrationReceipt, IntegrationError> {
            Err(IntegrationError::Transport("connection reset".into()))
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        user: UserId,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let user = UserId::new();
            store.insert_profile(BusinessProfile::new(user, "Acme Plumbing")).await;
            Self {
                store,
                clock: Arc::new(ManualClock::new(Utc::now())),
                user,
            }
        }

        async fn directory(&self, slug: &str, mode: SubmissionMode) -> DirectoryId {
            self.store.insert_directory(Directory::new(slug, slug, mode)).await
        }

        async fn enqueue(&self, dir: DirectoryId, count: i32) {
            for i in 0..count {
                self.store
                    .enqueue(NewSubmission::new(self.user, dir).at_position(i), self.clock.now())
                    .await
                    .unwrap();
            }
        }

        fn worker(&self, registry: IntegrationRegistry, config: WorkerConfig) -> SubmissionWorker<InMemoryStore> {
            SubmissionWorker::new(self.store.clone(), registry, self.clock.clone(), config)
        }

        async fn count(&self, status: SubmissionStatus) -> usize {
            self.store
                .submissions()
                .await
                .iter()
                .filter(|s| s.status == status)
                .count()
        }
    }

    fn config(batch_size: usize, per_day: u32) -> WorkerConfig {
        WorkerConfig {
            batch_size,
            max_submissions_per_day: per_day,
            directory_hourly_cap: 1_000,
            batch_interval: Duration::from_millis(5),
            error_backoff: Duration::from_millis(5),
            ..WorkerConfig::default()
        }
    }

    #[tokio::test]
    async fn daily_budget_clamps_claims_and_resets_next_day() {
        let fx = Fixture::new().await;
        let dir = fx.directory("yelp", SubmissionMode::Manual).await;
        fx.enqueue(dir, 6).await;
        let mut worker = fx.worker(IntegrationRegistry::new(), config(5, 3));

        let first = worker.run_batch().await.unwrap();
        assert_eq!(first.claimed, 3);
        assert_eq!(first.action_needed, 3);
        assert_eq!(fx.count(SubmissionStatus::Queued).await, 3);

        let second = worker.run_batch().await.unwrap();
        assert!(second.budget_exhausted);
        assert_eq!(second.claimed, 0);
        assert_eq!(fx.count(SubmissionStatus::Queued).await, 3);

        fx.clock.advance(chrono::Duration::days(1));
        let third = worker.run_batch().await.unwrap();
        assert_eq!(third.claimed, 3);
        assert_eq!(fx.count(SubmissionStatus::InProgress).await, 0);
    }

    #[tokio::test]
    async fn api_directory_without_integration_needs_action() {
        let fx = Fixture::new().await;
        let with = fx.directory("google-business", SubmissionMode::Api).await;
        let without = fx.directory("apple-maps", SubmissionMode::Api).await;
        fx.enqueue(with, 1).await;
        fx.enqueue(without, 1).await;

        let mut registry = IntegrationRegistry::new();
        registry.register("google-business", Arc::new(Accepting));
        let mut worker = fx.worker(registry, config(5, 50));

        let report = worker.run_batch().await.unwrap();
        assert_eq!(report.submitted, 1);
        assert_eq!(report.action_needed, 1);
        assert_eq!(worker.stats().claimed, 2);
    }

    #[tokio::test]
    async fn failing_integration_goes_through_retry_path() {
        let fx = Fixture::new().await;
        let dir = fx.directory("flaky", SubmissionMode::Api).await;
        fx.enqueue(dir, 1).await;

        let mut registry = IntegrationRegistry::new();
        registry.register("flaky", Arc::new(Failing));
        let mut worker = fx.worker(registry, config(5, 50));

        let outcomes: Vec<BatchReport> = [
            worker.run_batch().await.unwrap(),
            worker.run_batch().await.unwrap(),
            worker.run_batch().await.unwrap(),
        ]
        .into();
        assert_eq!(outcomes[0].requeued, 1);
        assert_eq!(outcomes[1].requeued, 1);
        assert_eq!(outcomes[2].failed, 1);

        let job = fx.store.submissions().await.remove(0);
        assert_eq!(job.status, SubmissionStatus::Failed);
        assert_eq!(job.retry_count, 3);
        assert!(job.error_message.unwrap().contains("connection reset"));

        assert_eq!(worker.run_batch().await.unwrap().claimed, 0);
    }

    #[tokio::test]
    async fn shutdown_mid_batch_releases_remaining_claims() {
        let fx = Fixture::new().await;
        let dir = fx.directory("stopper", SubmissionMode::Api).await;
        fx.enqueue(dir, 3).await;

        let (tx, rx) = watch::channel(false);
        let mut registry = IntegrationRegistry::new();
        registry.register("stopper", Arc::new(ShutdownAfterSubmit(tx)));
        let mut worker = fx.worker(registry, config(5, 50));

        let report = worker.run_batch_until(&rx).await.unwrap();
        assert_eq!(report.claimed, 3);
        assert_eq!(report.submitted, 1);
        assert_eq!(report.released, 2);

        assert_eq!(fx.count(SubmissionStatus::Submitted).await, 1);
        assert_eq!(fx.count(SubmissionStatus::Queued).await, 2);
        assert_eq!(fx.count(SubmissionStatus::InProgress).await, 0);
        assert!(fx.store.submissions().await.iter().all(|s| s.retry_count == 0));
    }

    #[tokio::test]
    async fn spawned_worker_drains_queue_and_stops() {
        let fx = Fixture::new().await;
        let dir = fx.directory("yelp", SubmissionMode::Manual).await;
        fx.enqueue(dir, 4).await;

        let handle = fx.worker(IntegrationRegistry::new(), config(2, 50)).spawn();
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.stats().action_needed < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker did not drain the queue");

        let stats = handle.shutdown().await;
        assert_eq!(stats.claimed, 4);
        assert_eq!(fx.count(SubmissionStatus::ActionNeeded).await, 4);
    }
}
