//! Queue claimer: one rate-limited, skip-locked claim per batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use dirsubmit_core::Submission;

use crate::rate_limit::RateLimitPolicy;
use crate::retry::RetryPolicy;
use crate::store::{ClaimRequest, JobStore, StoreError};

/// Claims batches from a [`JobStore`] under a fixed rate-limit and retry policy.
pub struct QueueClaimer<S: JobStore> {
    store: Arc<S>,
    rate_limit: RateLimitPolicy,
    retry: RetryPolicy,
}

impl<S: JobStore> QueueClaimer<S> {
    pub fn new(store: Arc<S>, rate_limit: RateLimitPolicy, retry: RetryPolicy) -> Self {
        Self {
            store,
            rate_limit,
            retry,
        }
    }

    /// Claim up to `max_batch_size` jobs. An empty batch is not an error.
    pub async fn claim(
        &self,
        max_batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Submission>, StoreError> {
        if max_batch_size == 0 {
            return Ok(Vec::new());
        }

        let request = ClaimRequest {
            batch_size: max_batch_size,
            retry: self.retry,
            now,
        };
        let claimed = self.store.claim_batch(&request, &self.rate_limit).await?;

        if claimed.is_empty() {
            debug!(batch_size = max_batch_size, "no eligible submissions");
        } else {
            info!(
                batch_size = max_batch_size,
                claimed = claimed.len(),
                "claimed submissions"
            );
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use dirsubmit_core::{Directory, NewSubmission, SubmissionMode, UserId};

    #[tokio::test]
    async fn zero_budget_claims_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let dir = store
            .insert_directory(Directory::new("yelp", "Yelp", SubmissionMode::Manual))
            .await;
        let now = Utc::now();
        store
            .enqueue(NewSubmission::new(UserId::new(), dir), now)
            .await
            .unwrap();

        let claimer = QueueClaimer::new(store.clone(), RateLimitPolicy::default(), RetryPolicy::default());
        assert!(claimer.claim(0, now).await.unwrap().is_empty());
        assert_eq!(claimer.claim(5, now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn paused_directory_is_never_claimed() {
        let store = Arc::new(InMemoryStore::new());
        let dir = store
            .insert_directory(Directory::new("paused", "Paused", SubmissionMode::Manual))
            .await;
        let now = Utc::now();
        store
            .enqueue(NewSubmission::new(UserId::new(), dir), now)
            .await
            .unwrap();

        let claimer = QueueClaimer::new(
            store,
            RateLimitPolicy::default().with_override("paused", 0),
            RetryPolicy::default(),
        );
        assert!(claimer.claim(5, now).await.unwrap().is_empty());
    }
}
