//! Job processor: turns one claimed submission into a lifecycle transition.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, instrument};

use dirsubmit_core::{DirectoryId, Submission, UserId};

use crate::clock::Clock;
use crate::store::{JobStore, StoreError};

pub mod strategy;

pub use strategy::{
    DirectoryIntegration, IntegrationError, IntegrationReceipt, IntegrationRegistry, Outcome,
    SubmissionStrategy,
};

/// Default time a user has to complete a manual action.
pub const DEFAULT_ACTION_DEADLINE_DAYS: i64 = 10;

/// Why processing a job failed. Every variant goes through the retry path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    #[error("no business profile for user {0}")]
    ProfileMissing(UserId),
    #[error("directory {0} not found")]
    DirectoryMissing(DirectoryId),
    #[error(transparent)]
    Integration(#[from] IntegrationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Transition recorded for a processed job.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Submitted,
    ActionNeeded,
}

/// Processes claimed jobs against the store.
pub struct JobProcessor<S: JobStore> {
    store: Arc<S>,
    registry: IntegrationRegistry,
    clock: Arc<dyn Clock>,
    action_deadline: Duration,
}

impl<S: JobStore> JobProcessor<S> {
    pub fn new(store: Arc<S>, registry: IntegrationRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            registry,
            clock,
            action_deadline: Duration::days(DEFAULT_ACTION_DEADLINE_DAYS),
        }
    }

    pub fn with_action_deadline(mut self, action_deadline: Duration) -> Self {
        self.action_deadline = action_deadline;
        self
    }

    #[instrument(
        skip(self, submission),
        fields(
            submission_id = %submission.id,
            directory_id = %submission.directory_id,
            retry_count = submission.retry_count
        ),
        err
    )]
    pub async fn process(&self, submission: &Submission) -> Result<ProcessOutcome, ProcessError> {
        let profile = self
            .store
            .load_profile(submission.user_id)
            .await?
            .ok_or(ProcessError::ProfileMissing(submission.user_id))?;
        let directory = self
            .store
            .directory(submission.directory_id)
            .await?
            .ok_or(ProcessError::DirectoryMissing(submission.directory_id))?;

        let strategy = SubmissionStrategy::for_directory(&directory);
        debug!(strategy = ?strategy, slug = %directory.slug, "attempting submission");

        let outcome = strategy
            .attempt(&self.registry, submission, &directory, &profile)
            .await?;

        let now = self.clock.now();
        match outcome {
            Outcome::Submitted { listing_url } => {
                self.store
                    .mark_submitted(submission.id, listing_url, now)
                    .await?;
                Ok(ProcessOutcome::Submitted)
            }
            Outcome::ActionNeeded(action) => {
                self.store
                    .mark_action_needed(submission.id, &action, now + self.action_deadline, now)
                    .await?;
                Ok(ProcessOutcome::ActionNeeded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::RateLimitPolicy;
    use crate::retry::RetryPolicy;
    use crate::store::{ClaimRequest, InMemoryStore};
    use chrono::Utc;
    use dirsubmit_core::{
        BusinessProfile, Directory, NewSubmission, SubmissionMode, SubmissionStatus,
    };

    async fn claimed_job(
        store: &InMemoryStore,
        user: UserId,
        dir: DirectoryId,
        now: chrono::DateTime<Utc>,
    ) -> Submission {
        store.enqueue(NewSubmission::new(user, dir), now).await.unwrap();
        let request = ClaimRequest {
            batch_size: 1,
            retry: RetryPolicy::default(),
            now,
        };
        store
            .claim_batch(&request, &RateLimitPolicy::default())
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn manual_job_gets_ten_day_deadline() {
        let now = Utc::now();
        let store = Arc::new(InMemoryStore::new());
        let user = UserId::new();
        let dir = store
            .insert_directory(Directory::new("yelp", "Yelp", SubmissionMode::Manual))
            .await;
        store.insert_profile(BusinessProfile::new(user, "Acme")).await;
        let job = claimed_job(&store, user, dir, now).await;

        let processor = JobProcessor::new(
            store.clone(),
            IntegrationRegistry::new(),
            Arc::new(ManualClock::new(now)),
        );
        assert_eq!(processor.process(&job).await.unwrap(), ProcessOutcome::ActionNeeded);

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::ActionNeeded);
        assert_eq!(stored.action_deadline, Some(now + Duration::days(10)));
        assert_eq!(stored.action_required_at, Some(now));
    }

    #[tokio::test]
    async fn missing_profile_is_an_error() {
        let now = Utc::now();
        let store = Arc::new(InMemoryStore::new());
        let user = UserId::new();
        let dir = store
            .insert_directory(Directory::new("yelp", "Yelp", SubmissionMode::Manual))
            .await;
        let job = claimed_job(&store, user, dir, now).await;

        let processor = JobProcessor::new(
            store.clone(),
            IntegrationRegistry::new(),
            Arc::new(ManualClock::new(now)),
        );
        assert_eq!(
            processor.process(&job).await.unwrap_err(),
            ProcessError::ProfileMissing(user)
        );
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::InProgress);
    }
}
