//! Job store abstraction and implementations.
//!
//! The orchestrator never talks to a database directly: every state transition
//! goes through [`JobStore`] or [`ReminderStore`], and each method is one
//! atomic unit (one SQL transaction in [`PostgresStore`], one critical section
//! in [`InMemoryStore`]). Campaign counters move inside the same unit as the
//! submission row they account for.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dirsubmit_core::{
    ActionRequest, BusinessProfile, CampaignRun, CampaignRunId, Directory, DirectoryId,
    NewSubmission, NotificationEvent, NotificationPreferences, NotificationType, Submission,
    SubmissionId, SubmissionStatus, UserId,
};

use crate::rate_limit::RateLimitPolicy;
use crate::retry::RetryPolicy;

pub mod in_memory;
pub mod postgres;
mod schema;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("submission not found: {0}")]
    NotFound(SubmissionId),
    #[error("submission {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: SubmissionId,
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
    #[error("database error: {0}")]
    Database(String),
    #[error("failed to decode row: {0}")]
    Decode(String),
}

/// Parameters of one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Upper bound on the number of returned jobs.
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub now: DateTime<Utc>,
}

/// Result of recording a processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back in the queue with the new `retry_count`.
    Requeued { retry_count: u32 },
    /// Terminally failed with `MAX_RETRIES_EXCEEDED`.
    Failed { retry_count: u32 },
}

/// An awaiting-action submission joined with what a reminder needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderCandidate {
    pub submission: Submission,
    pub directory_name: String,
    pub preferences: NotificationPreferences,
}

/// A submission the deadline pass just blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedSubmission {
    pub submission: Submission,
    pub previous_status: SubmissionStatus,
    pub directory_name: String,
    /// `None` when the owner has no notification preferences on file.
    pub preferences: Option<NotificationPreferences>,
}

/// Submission queue and lifecycle transitions used by the worker.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a `queued` submission. Accounts it in its campaign run, if any.
    async fn enqueue(
        &self,
        request: NewSubmission,
        now: DateTime<Utc>,
    ) -> Result<SubmissionId, StoreError>;

    /// Get a submission by ID.
    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>, StoreError>;

    /// Create an empty campaign run for a user.
    async fn create_campaign_run(&self, user_id: UserId) -> Result<CampaignRunId, StoreError>;

    /// Get a campaign run by ID.
    async fn campaign_run(&self, id: CampaignRunId) -> Result<Option<CampaignRun>, StoreError>;

    /// Get a directory by ID.
    async fn directory(&self, id: DirectoryId) -> Result<Option<Directory>, StoreError>;

    /// Load the owning user's business profile.
    async fn load_profile(&self, user_id: UserId) -> Result<Option<BusinessProfile>, StoreError>;

    /// Atomically claim up to `request.batch_size` eligible queued jobs.
    ///
    /// Directories at their hourly cap are excluded. Claimed rows are
    /// `in_progress` with `started_at = now` when this returns, ordered by
    /// `queue_position` then `created_at`. Concurrent callers never receive
    /// the same row.
    async fn claim_batch(
        &self,
        request: &ClaimRequest,
        policy: &RateLimitPolicy,
    ) -> Result<Vec<Submission>, StoreError>;

    /// Return claimed but unprocessed jobs to the queue without counting an
    /// attempt. Rows no longer `in_progress` are left untouched.
    async fn release_claims(
        &self,
        ids: &[SubmissionId],
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// `in_progress -> submitted`.
    async fn mark_submitted(
        &self,
        id: SubmissionId,
        listing_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// `in_progress -> action_needed` with the given deadline.
    async fn mark_action_needed(
        &self,
        id: SubmissionId,
        action: &ActionRequest,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Apply the retry policy to a failed `in_progress` job.
    async fn record_failure(
        &self,
        id: SubmissionId,
        error_message: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, StoreError>;
}

/// Queries and transitions used by the reminder/deadline pass.
#[async_trait]
pub trait ReminderStore: Send + Sync + 'static {
    /// Actionable submissions with a non-null deadline after `now`, joined
    /// with their owner's notification preferences.
    async fn reminder_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderCandidate>, StoreError>;

    /// Whether a notification of this type was already delivered.
    async fn has_notification(
        &self,
        user_id: UserId,
        submission_id: SubmissionId,
        notification_type: NotificationType,
    ) -> Result<bool, StoreError>;

    /// Append a ledger row. A `sent` row replaces an earlier `failed` one for
    /// the same key; an existing `sent` row is never overwritten.
    async fn record_notification(&self, event: &NotificationEvent) -> Result<(), StoreError>;

    /// Block every actionable submission whose deadline is before `now`.
    async fn block_expired(
        &self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<BlockedSubmission>, StoreError>;
}

/// Worker transitions only apply to jobs this worker claimed.
pub(crate) fn ensure_claimed(
    id: SubmissionId,
    from: SubmissionStatus,
    to: SubmissionStatus,
) -> Result<(), StoreError> {
    if from == SubmissionStatus::InProgress && from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition { id, from, to })
    }
}
