//! In-memory job store for tests/dev.
//!
//! All tables live behind one async mutex and every trait method holds it for
//! its whole body, so each method behaves like a single serializable
//! transaction: a claim can never interleave with another claim.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use dirsubmit_core::{
    ActionRequest, BusinessProfile, CampaignRun, CampaignRunId, DeliveryStatus, Directory,
    DirectoryId, MAX_RETRIES_EXCEEDED, NewSubmission, NotificationEvent, NotificationPreferences,
    NotificationType, Submission, SubmissionId, SubmissionStatus, UserId,
};

use super::{
    BlockedSubmission, ClaimRequest, FailureOutcome, JobStore, ReminderCandidate, ReminderStore,
    StoreError, ensure_claimed,
};
use crate::campaign::{CounterShift, claim_shifts, release_shifts};
use crate::rate_limit::{DirectoryLoad, RateLimitPolicy};
use crate::retry::{RetryDecision, RetryPolicy};

#[derive(Debug, Default)]
struct Tables {
    submissions: HashMap<SubmissionId, Submission>,
    directories: HashMap<DirectoryId, Directory>,
    profiles: HashMap<UserId, BusinessProfile>,
    preferences: HashMap<UserId, NotificationPreferences>,
    campaigns: HashMap<CampaignRunId, CampaignRun>,
    notifications: Vec<NotificationEvent>,
}

impl Tables {
    fn apply_shift(&mut self, shift: CounterShift) {
        if let Some(run) = self.campaigns.get_mut(&shift.campaign) {
            run.shift(shift.from, shift.to, shift.count);
        }
    }

    fn apply_transition(
        &mut self,
        campaign: Option<CampaignRunId>,
        from: SubmissionStatus,
        to: SubmissionStatus,
    ) {
        if let Some(shift) = CounterShift::for_transition(campaign, from, to) {
            self.apply_shift(shift);
        }
    }

    fn directory_loads(&self, since: DateTime<Utc>) -> Vec<DirectoryLoad> {
        let mut recent: HashMap<DirectoryId, u32> = HashMap::new();
        for s in self.submissions.values() {
            let in_window = s.started_at.is_some_and(|at| at >= since);
            if s.status.counts_toward_rate_limit() && in_window {
                *recent.entry(s.directory_id).or_default() += 1;
            }
        }

        self.directories
            .values()
            .map(|d| DirectoryLoad {
                directory_id: d.id,
                slug: d.slug.clone(),
                recent: recent.get(&d.id).copied().unwrap_or(0),
            })
            .collect()
    }

    fn directory_name(&self, id: DirectoryId) -> String {
        self.directories
            .get(&id)
            .map(|d| d.name.clone())
            .unwrap_or_default()
    }

    fn claimed_mut(
        &mut self,
        id: SubmissionId,
        to: SubmissionStatus,
    ) -> Result<&mut Submission, StoreError> {
        let submission = self
            .submissions
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        ensure_claimed(id, submission.status, to)?;
        Ok(submission)
    }
}

/// In-memory implementation of [`JobStore`] and [`ReminderStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_directory(&self, directory: Directory) -> DirectoryId {
        let id = directory.id;
        self.tables.lock().await.directories.insert(id, directory);
        id
    }

    pub async fn insert_profile(&self, profile: BusinessProfile) {
        self.tables
            .lock()
            .await
            .profiles
            .insert(profile.user_id, profile);
    }

    pub async fn insert_preferences(&self, user_id: UserId, preferences: NotificationPreferences) {
        self.tables
            .lock()
            .await
            .preferences
            .insert(user_id, preferences);
    }

    /// Overwrite a stored submission (seeding rows in a given state).
    pub async fn put_submission(&self, submission: Submission) {
        self.tables
            .lock()
            .await
            .submissions
            .insert(submission.id, submission);
    }

    /// Every submission, in no particular order.
    pub async fn submissions(&self) -> Vec<Submission> {
        self.tables
            .lock()
            .await
            .submissions
            .values()
            .cloned()
            .collect()
    }

    /// The full notification ledger, oldest first.
    pub async fn notifications(&self) -> Vec<NotificationEvent> {
        self.tables.lock().await.notifications.clone()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn enqueue(
        &self,
        request: NewSubmission,
        now: DateTime<Utc>,
    ) -> Result<SubmissionId, StoreError> {
        let mut tables = self.tables.lock().await;
        let id = SubmissionId::new();
        if let Some(campaign) = request.campaign_run_id {
            tables
                .campaigns
                .get_mut(&campaign)
                .ok_or_else(|| StoreError::Database(format!("unknown campaign run {campaign}")))?
                .record_enqueued();
        }
        tables
            .submissions
            .insert(id, Submission::queued(id, &request, now));
        Ok(id)
    }

    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>, StoreError> {
        Ok(self.tables.lock().await.submissions.get(&id).cloned())
    }

    async fn create_campaign_run(&self, user_id: UserId) -> Result<CampaignRunId, StoreError> {
        let run = CampaignRun::new(user_id);
        let id = run.id;
        self.tables.lock().await.campaigns.insert(id, run);
        Ok(id)
    }

    async fn campaign_run(&self, id: CampaignRunId) -> Result<Option<CampaignRun>, StoreError> {
        Ok(self.tables.lock().await.campaigns.get(&id).cloned())
    }

    async fn directory(&self, id: DirectoryId) -> Result<Option<Directory>, StoreError> {
        Ok(self.tables.lock().await.directories.get(&id).cloned())
    }

    async fn load_profile(&self, user_id: UserId) -> Result<Option<BusinessProfile>, StoreError> {
        Ok(self.tables.lock().await.profiles.get(&user_id).cloned())
    }

    async fn claim_batch(
        &self,
        request: &ClaimRequest,
        policy: &RateLimitPolicy,
    ) -> Result<Vec<Submission>, StoreError> {
        let mut tables = self.tables.lock().await;

        let loads = tables.directory_loads(policy.window_start(request.now));
        let limited = policy.limited_directories(&loads);

        let mut eligible: Vec<&Submission> = tables
            .submissions
            .values()
            .filter(|s| {
                s.status == SubmissionStatus::Queued
                    && request.retry.is_claimable(s.retry_count)
                    && !limited.contains(&s.directory_id)
            })
            .collect();
        eligible.sort_by_key(|s| (s.queue_position, s.created_at, s.id));
        let ids: Vec<SubmissionId> = eligible
            .into_iter()
            .take(request.batch_size)
            .map(|s| s.id)
            .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(s) = tables.submissions.get_mut(&id) {
                s.mark_in_progress(request.now);
                claimed.push(s.clone());
            }
        }

        for shift in claim_shifts(&claimed) {
            tables.apply_shift(shift);
        }

        Ok(claimed)
    }

    async fn release_claims(
        &self,
        ids: &[SubmissionId],
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut released = Vec::new();
        for id in ids {
            if let Some(s) = tables.submissions.get_mut(id) {
                if s.status == SubmissionStatus::InProgress {
                    s.mark_released(now);
                    released.push(s.clone());
                }
            }
        }
        for shift in release_shifts(&released) {
            tables.apply_shift(shift);
        }
        Ok(released.len())
    }

    async fn mark_submitted(
        &self,
        id: SubmissionId,
        listing_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let submission = tables.claimed_mut(id, SubmissionStatus::Submitted)?;
        let campaign = submission.campaign_run_id;
        submission.mark_submitted(listing_url, now);
        tables.apply_transition(campaign, SubmissionStatus::InProgress, SubmissionStatus::Submitted);
        Ok(())
    }

    async fn mark_action_needed(
        &self,
        id: SubmissionId,
        action: &ActionRequest,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let submission = tables.claimed_mut(id, SubmissionStatus::ActionNeeded)?;
        let campaign = submission.campaign_run_id;
        submission.mark_action_needed(action, deadline, now);
        tables.apply_transition(
            campaign,
            SubmissionStatus::InProgress,
            SubmissionStatus::ActionNeeded,
        );
        Ok(())
    }

    async fn record_failure(
        &self,
        id: SubmissionId,
        error_message: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, StoreError> {
        let mut tables = self.tables.lock().await;
        let submission = tables.claimed_mut(id, SubmissionStatus::Failed)?;
        let campaign = submission.campaign_run_id;

        let (outcome, to) = match policy.decide(submission.retry_count) {
            RetryDecision::Requeue => {
                submission.mark_requeued(error_message, now);
                (
                    FailureOutcome::Requeued {
                        retry_count: submission.retry_count,
                    },
                    SubmissionStatus::Queued,
                )
            }
            RetryDecision::Fail => {
                submission.mark_failed(error_message, MAX_RETRIES_EXCEEDED, now);
                (
                    FailureOutcome::Failed {
                        retry_count: submission.retry_count,
                    },
                    SubmissionStatus::Failed,
                )
            }
        };

        tables.apply_transition(campaign, SubmissionStatus::InProgress, to);
        Ok(outcome)
    }
}

#[async_trait]
impl ReminderStore for InMemoryStore {
    async fn reminder_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderCandidate>, StoreError> {
        let tables = self.tables.lock().await;
        let mut candidates: Vec<ReminderCandidate> = tables
            .submissions
            .values()
            .filter(|s| s.status.is_actionable())
            .filter(|s| s.action_deadline.is_some_and(|deadline| deadline > now))
            .filter_map(|s| {
                let preferences = tables.preferences.get(&s.user_id)?.clone();
                Some(ReminderCandidate {
                    submission: s.clone(),
                    directory_name: tables.directory_name(s.directory_id),
                    preferences,
                })
            })
            .collect();
        candidates.sort_by_key(|c| (c.submission.action_deadline, c.submission.id));
        Ok(candidates)
    }

    async fn has_notification(
        &self,
        user_id: UserId,
        submission_id: SubmissionId,
        notification_type: NotificationType,
    ) -> Result<bool, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.notifications.iter().any(|n| {
            n.user_id == user_id
                && n.submission_id == submission_id
                && n.notification_type == notification_type
                && n.status == DeliveryStatus::Sent
        }))
    }

    async fn record_notification(&self, event: &NotificationEvent) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let existing = tables.notifications.iter().position(|n| {
            n.user_id == event.user_id
                && n.submission_id == event.submission_id
                && n.notification_type == event.notification_type
        });

        match existing {
            Some(idx) if tables.notifications[idx].status == DeliveryStatus::Sent => {}
            Some(idx) => tables.notifications[idx] = event.clone(),
            None => tables.notifications.push(event.clone()),
        }
        Ok(())
    }

    async fn block_expired(
        &self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<BlockedSubmission>, StoreError> {
        let mut tables = self.tables.lock().await;
        let expired: Vec<SubmissionId> = tables
            .submissions
            .values()
            .filter(|s| s.status.is_actionable())
            .filter(|s| s.action_deadline.is_some_and(|deadline| deadline < now))
            .map(|s| s.id)
            .collect();

        let mut blocked = Vec::with_capacity(expired.len());
        for id in expired {
            let Some(submission) = tables.submissions.get_mut(&id) else {
                continue;
            };
            let previous_status = submission.status;
            submission.mark_blocked(reason, now);
            let submission = submission.clone();

            tables.apply_transition(
                submission.campaign_run_id,
                previous_status,
                SubmissionStatus::Blocked,
            );
            blocked.push(BlockedSubmission {
                directory_name: tables.directory_name(submission.directory_id),
                preferences: tables.preferences.get(&submission.user_id).cloned(),
                previous_status,
                submission,
            });
        }
        blocked.sort_by_key(|b| b.submission.id);
        Ok(blocked)
    }
}
