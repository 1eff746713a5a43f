//! Submission jobs and their lifecycle.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{CampaignRunId, DirectoryId, SubmissionId, UserId};

/// Error code written when a job exhausts its retries.
pub const MAX_RETRIES_EXCEEDED: &str = "MAX_RETRIES_EXCEEDED";

/// Lifecycle status of a submission.
///
/// ```text
/// queued -> in_progress -> submitted
///                       -> action_needed -> blocked
///                       -> failed -> queued (retry)
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Queued,
    InProgress,
    Submitted,
    /// Written by the human confirmation path after a manual submission.
    PendingVerification,
    ActionNeeded,
    /// Legacy spelling of `ActionNeeded` still present in stored rows.
    NeedsAction,
    Failed,
    Blocked,
}

impl SubmissionStatus {
    pub const ALL: [SubmissionStatus; 8] = [
        SubmissionStatus::Queued,
        SubmissionStatus::InProgress,
        SubmissionStatus::Submitted,
        SubmissionStatus::PendingVerification,
        SubmissionStatus::ActionNeeded,
        SubmissionStatus::NeedsAction,
        SubmissionStatus::Failed,
        SubmissionStatus::Blocked,
    ];

    /// Statuses a reminder or deadline applies to.
    pub const ACTIONABLE: [SubmissionStatus; 3] = [
        SubmissionStatus::ActionNeeded,
        SubmissionStatus::NeedsAction,
        SubmissionStatus::PendingVerification,
    ];

    /// Statuses that consume a directory's hourly budget.
    pub const RATE_LIMITED: [SubmissionStatus; 3] = [
        SubmissionStatus::InProgress,
        SubmissionStatus::Submitted,
        SubmissionStatus::PendingVerification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Queued => "queued",
            SubmissionStatus::InProgress => "in_progress",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::PendingVerification => "pending_verification",
            SubmissionStatus::ActionNeeded => "action_needed",
            SubmissionStatus::NeedsAction => "needs_action",
            SubmissionStatus::Failed => "failed",
            SubmissionStatus::Blocked => "blocked",
        }
    }

    /// No automated transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Submitted | SubmissionStatus::Failed | SubmissionStatus::Blocked
        )
    }

    pub fn is_actionable(&self) -> bool {
        Self::ACTIONABLE.contains(self)
    }

    pub fn counts_toward_rate_limit(&self) -> bool {
        Self::RATE_LIMITED.contains(self)
    }

    /// Whether the orchestrator may move a row from `self` to `next`.
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        match (self, next) {
            (Queued, InProgress) => true,
            (InProgress, Submitted | ActionNeeded | Failed | Queued) => true,
            (ActionNeeded | NeedsAction | PendingVerification, Blocked) => true,
            (ActionNeeded | NeedsAction, Submitted | PendingVerification) => true,
            (Failed, Queued) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::unknown_variant("submission status", s))
    }
}

/// Request from the enqueuer to create a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubmission {
    pub user_id: UserId,
    pub directory_id: DirectoryId,
    pub campaign_run_id: Option<CampaignRunId>,
    /// Lower values are claimed first.
    pub queue_position: i32,
}

impl NewSubmission {
    pub fn new(user_id: UserId, directory_id: DirectoryId) -> Self {
        Self {
            user_id,
            directory_id,
            campaign_run_id: None,
            queue_position: 0,
        }
    }

    pub fn in_campaign(mut self, campaign_run_id: CampaignRunId) -> Self {
        self.campaign_run_id = Some(campaign_run_id);
        self
    }

    pub fn at_position(mut self, queue_position: i32) -> Self {
        self.queue_position = queue_position;
        self
    }
}

/// What a human has to do to finish a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action_type: String,
    pub instructions: String,
    pub url: Option<String>,
}

/// One directory submission job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub user_id: UserId,
    pub directory_id: DirectoryId,
    pub campaign_run_id: Option<CampaignRunId>,
    pub status: SubmissionStatus,
    pub retry_count: u32,
    pub queue_position: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,

    pub action_type: Option<String>,
    pub action_instructions: Option<String>,
    pub action_url: Option<String>,
    pub action_deadline: Option<DateTime<Utc>>,
    pub action_required_at: Option<DateTime<Utc>>,

    pub submitted_at: Option<DateTime<Utc>>,
    pub listing_url: Option<String>,

    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,

    pub blocked_at: Option<DateTime<Utc>>,
    pub blocked_reason: Option<String>,
}

impl Submission {
    /// Build the row an enqueue inserts.
    pub fn queued(id: SubmissionId, request: &NewSubmission, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: request.user_id,
            directory_id: request.directory_id,
            campaign_run_id: request.campaign_run_id,
            status: SubmissionStatus::Queued,
            retry_count: 0,
            queue_position: request.queue_position,
            created_at: now,
            updated_at: now,
            started_at: None,
            action_type: None,
            action_instructions: None,
            action_url: None,
            action_deadline: None,
            action_required_at: None,
            submitted_at: None,
            listing_url: None,
            error_message: None,
            error_code: None,
            failed_at: None,
            blocked_at: None,
            blocked_reason: None,
        }
    }

    pub fn mark_in_progress(&mut self, now: DateTime<Utc>) {
        self.status = SubmissionStatus::InProgress;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_submitted(&mut self, listing_url: Option<String>, now: DateTime<Utc>) {
        self.status = SubmissionStatus::Submitted;
        self.submitted_at = Some(now);
        if listing_url.is_some() {
            self.listing_url = listing_url;
        }
        self.clear_error();
        self.updated_at = now;
    }

    pub fn mark_action_needed(
        &mut self,
        action: &ActionRequest,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.status = SubmissionStatus::ActionNeeded;
        self.action_type = Some(action.action_type.clone());
        self.action_instructions = Some(action.instructions.clone());
        self.action_url = action.url.clone();
        self.action_deadline = Some(deadline);
        self.action_required_at = Some(now);
        self.clear_error();
        self.updated_at = now;
    }

    /// Return the job to the queue after a transient failure.
    pub fn mark_requeued(&mut self, error_message: &str, now: DateTime<Utc>) {
        self.status = SubmissionStatus::Queued;
        self.error_message = Some(error_message.to_string());
        self.retry_count += 1;
        self.updated_at = now;
    }

    /// Return a claimed job to the queue without counting an attempt.
    pub fn mark_released(&mut self, now: DateTime<Utc>) {
        self.status = SubmissionStatus::Queued;
        self.started_at = None;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error_message: &str, error_code: &str, now: DateTime<Utc>) {
        self.status = SubmissionStatus::Failed;
        self.error_message = Some(error_message.to_string());
        self.error_code = Some(error_code.to_string());
        self.failed_at = Some(now);
        self.retry_count += 1;
        self.updated_at = now;
    }

    pub fn mark_blocked(&mut self, reason: &str, now: DateTime<Utc>) {
        self.status = SubmissionStatus::Blocked;
        self.blocked_reason = Some(reason.to_string());
        self.blocked_at = Some(now);
        self.updated_at = now;
    }

    fn clear_error(&mut self) {
        self.error_message = None;
        self.error_code = None;
        self.failed_at = None;
    }

    /// Verify the status-dependent field groups are consistent with `status`.
    ///
    /// `error_message` alone may linger on a requeued job (it records the last
    /// transient failure), so only `failed_at` marks the failure group.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        let submitted = self.submitted_at.is_some();
        let failed = self.failed_at.is_some();
        let blocked = self.blocked_at.is_some();
        let awaiting = self.action_required_at.is_some();

        let expect = |cond: bool, what: &str| {
            if cond {
                Ok(())
            } else {
                Err(DomainError::invariant(format!(
                    "submission {} in status {} has inconsistent {}",
                    self.id, self.status, what
                )))
            }
        };

        match self.status {
            SubmissionStatus::Queued => {
                expect(!submitted && !failed && !blocked && !awaiting, "terminal fields")
            }
            SubmissionStatus::InProgress => {
                expect(self.started_at.is_some(), "started_at")?;
                expect(!submitted && !failed && !blocked && !awaiting, "terminal fields")
            }
            SubmissionStatus::Submitted | SubmissionStatus::PendingVerification => {
                expect(!failed && !blocked, "failure/blocked fields")
            }
            SubmissionStatus::ActionNeeded | SubmissionStatus::NeedsAction => {
                expect(awaiting && self.action_deadline.is_some(), "action fields")?;
                expect(!submitted && !failed && !blocked, "terminal fields")
            }
            SubmissionStatus::Failed => {
                expect(failed && self.error_code.is_some(), "failure fields")?;
                expect(!submitted && !blocked && !awaiting, "other terminal fields")
            }
            SubmissionStatus::Blocked => {
                expect(blocked && self.blocked_reason.is_some(), "blocked fields")?;
                expect(!submitted && !failed, "other terminal fields")
            }
        }
    }
}
