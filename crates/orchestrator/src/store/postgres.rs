//! Postgres-backed job store.
//!
//! ## Atomicity
//!
//! Every trait method runs in one transaction. Worker transitions lock the
//! submission row (`FOR UPDATE`) before checking its status, and the campaign
//! counter update is issued in the same transaction as the row write.
//!
//! ## Claims
//!
//! `claim_batch` takes a transaction-scoped advisory lock before counting
//! directory load, so concurrent claimers see each other's `started_at`
//! stamps and the hourly cap holds across workers. The candidate rows are
//! still selected with `FOR UPDATE SKIP LOCKED` so rows locked by a
//! concurrent `record_failure` or `block_expired` are simply passed over.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | Database / PoolClosed / Io / other | `Database` |
//! | ColumnDecode / ColumnNotFound | `Decode` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use dirsubmit_core::{
    ActionRequest, BusinessProfile, CampaignRun, CampaignRunId, DeliveryStatus, Directory,
    DirectoryId, MAX_RETRIES_EXCEEDED, NewSubmission, NotificationEvent, NotificationPreferences,
    NotificationType, Submission, SubmissionId, SubmissionMode, SubmissionStatus, UserId,
};

use super::schema::STATEMENTS;
use super::{
    BlockedSubmission, ClaimRequest, FailureOutcome, JobStore, ReminderCandidate, ReminderStore,
    StoreError, ensure_claimed,
};
use crate::campaign::{CounterShift, claim_shifts, counter_column, release_shifts};
use crate::rate_limit::{DirectoryLoad, RateLimitPolicy};
use crate::retry::{RetryDecision, RetryPolicy};

/// Advisory lock key serialising claims across workers.
const CLAIM_LOCK_KEY: i64 = 0x6469_7273_7562_6d74;

/// Postgres implementation of [`JobStore`] and [`ReminderStore`].
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in STATEMENTS {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    /// Insert or replace a directory row.
    pub async fn upsert_directory(&self, directory: &Directory) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO directories (id, slug, name, public_url, submission_mode)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                slug = EXCLUDED.slug,
                name = EXCLUDED.name,
                public_url = EXCLUDED.public_url,
                submission_mode = EXCLUDED.submission_mode
            "#,
        )
        .bind(directory.id.as_uuid())
        .bind(&directory.slug)
        .bind(&directory.name)
        .bind(&directory.public_url)
        .bind(directory.submission_mode.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_directory", e))?;
        Ok(())
    }

    /// Insert or replace a user's notification preferences.
    pub async fn upsert_preferences(
        &self,
        user_id: UserId,
        preferences: &NotificationPreferences,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_preferences (
                user_id, email, display_name, reminders_enabled,
                quiet_hours_start, quiet_hours_end, timezone
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET
                email = EXCLUDED.email,
                display_name = EXCLUDED.display_name,
                reminders_enabled = EXCLUDED.reminders_enabled,
                quiet_hours_start = EXCLUDED.quiet_hours_start,
                quiet_hours_end = EXCLUDED.quiet_hours_end,
                timezone = EXCLUDED.timezone
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(&preferences.email)
        .bind(&preferences.display_name)
        .bind(preferences.reminders_enabled)
        .bind(&preferences.quiet_hours_start)
        .bind(&preferences.quiet_hours_end)
        .bind(&preferences.timezone)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_preferences", e))?;
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, directory_id = %request.directory_id),
        err
    )]
    async fn enqueue(
        &self,
        request: NewSubmission,
        now: DateTime<Utc>,
    ) -> Result<SubmissionId, StoreError> {
        let mut tx = self.begin("enqueue").await?;

        if let Some(campaign) = request.campaign_run_id {
            let updated = sqlx::query(
                r#"
                UPDATE campaign_runs
                SET directories_total = directories_total + 1,
                    directories_queued = directories_queued + 1
                WHERE id = $1
                "#,
            )
            .bind(campaign.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("enqueue", e))?;
            if updated.rows_affected() == 0 {
                return Err(StoreError::Database(format!("unknown campaign run {campaign}")));
            }
        }

        let submission = Submission::queued(SubmissionId::new(), &request, now);
        sqlx::query(
            r#"
            INSERT INTO submissions (
                id, user_id, directory_id, campaign_run_id, status,
                retry_count, queue_position, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $7)
            "#,
        )
        .bind(submission.id.as_uuid())
        .bind(submission.user_id.as_uuid())
        .bind(submission.directory_id.as_uuid())
        .bind(submission.campaign_run_id.map(Uuid::from))
        .bind(submission.status.as_str())
        .bind(submission.queue_position)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("enqueue", e))?;
        Ok(submission.id)
    }

    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>, StoreError> {
        let row = sqlx::query("SELECT * FROM submissions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(decode_submission).transpose()
    }

    async fn create_campaign_run(&self, user_id: UserId) -> Result<CampaignRunId, StoreError> {
        let run = CampaignRun::new(user_id);
        sqlx::query("INSERT INTO campaign_runs (id, user_id) VALUES ($1, $2)")
            .bind(run.id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_campaign_run", e))?;
        Ok(run.id)
    }

    async fn campaign_run(&self, id: CampaignRunId) -> Result<Option<CampaignRun>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, directories_total, directories_queued,
                   directories_in_progress, directories_action_needed,
                   directories_submitted, directories_failed
            FROM campaign_runs
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("campaign_run", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let run = CampaignRun {
            id: CampaignRunId::from_uuid(row.try_get("id").map_err(decode_error)?),
            user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode_error)?),
            directories_total: row.try_get("directories_total").map_err(decode_error)?,
            directories_queued: row.try_get("directories_queued").map_err(decode_error)?,
            directories_in_progress: row
                .try_get("directories_in_progress")
                .map_err(decode_error)?,
            directories_action_needed: row
                .try_get("directories_action_needed")
                .map_err(decode_error)?,
            directories_submitted: row.try_get("directories_submitted").map_err(decode_error)?,
            directories_failed: row.try_get("directories_failed").map_err(decode_error)?,
        };
        Ok(Some(run))
    }

    async fn directory(&self, id: DirectoryId) -> Result<Option<Directory>, StoreError> {
        let row = sqlx::query(
            "SELECT id, slug, name, public_url, submission_mode FROM directories WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("directory", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mode: Option<String> = row.try_get("submission_mode").map_err(decode_error)?;
        Ok(Some(Directory {
            id: DirectoryId::from_uuid(row.try_get("id").map_err(decode_error)?),
            slug: row.try_get("slug").map_err(decode_error)?,
            name: row.try_get("name").map_err(decode_error)?,
            public_url: row.try_get("public_url").map_err(decode_error)?,
            submission_mode: SubmissionMode::from_stored(mode.as_deref()),
        }))
    }

    async fn load_profile(&self, user_id: UserId) -> Result<Option<BusinessProfile>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, business_name, website, email, phone, address, description
            FROM business_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_profile", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(BusinessProfile {
            user_id,
            business_name: row.try_get("business_name").map_err(decode_error)?,
            website: row.try_get("website").map_err(decode_error)?,
            email: row.try_get("email").map_err(decode_error)?,
            phone: row.try_get("phone").map_err(decode_error)?,
            address: row.try_get("address").map_err(decode_error)?,
            description: row.try_get("description").map_err(decode_error)?,
        }))
    }

    #[instrument(
        skip(self, request, policy),
        fields(batch_size = request.batch_size, claimed = tracing::field::Empty),
        err
    )]
    async fn claim_batch(
        &self,
        request: &ClaimRequest,
        policy: &RateLimitPolicy,
    ) -> Result<Vec<Submission>, StoreError> {
        if request.batch_size == 0 {
            return Ok(Vec::new());
        }
        let mut tx = self.begin("claim_batch").await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CLAIM_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("claim_batch", e))?;

        let load_rows = sqlx::query(
            r#"
            SELECT d.id, d.slug, COUNT(s.id) AS recent
            FROM directories d
            LEFT JOIN submissions s
                ON s.directory_id = d.id
                AND s.status = ANY($1)
                AND s.started_at >= $2
            GROUP BY d.id, d.slug
            "#,
        )
        .bind(status_names(&SubmissionStatus::RATE_LIMITED))
        .bind(policy.window_start(request.now))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_batch", e))?;

        let mut loads = Vec::with_capacity(load_rows.len());
        for row in &load_rows {
            let recent: i64 = row.try_get("recent").map_err(decode_error)?;
            loads.push(DirectoryLoad {
                directory_id: DirectoryId::from_uuid(row.try_get("id").map_err(decode_error)?),
                slug: row.try_get("slug").map_err(decode_error)?,
                recent: u32::try_from(recent).unwrap_or(u32::MAX),
            });
        }
        let limited: Vec<Uuid> = policy
            .limited_directories(&loads)
            .into_iter()
            .map(Uuid::from)
            .collect();

        let max_retry = i32::try_from(request.retry.max_retry_count).unwrap_or(i32::MAX);
        let limit = i64::try_from(request.batch_size).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            WITH picked AS (
                SELECT id
                FROM submissions
                WHERE status = 'queued'
                    AND retry_count < $1
                    AND NOT (directory_id = ANY($2))
                ORDER BY queue_position ASC, created_at ASC, id ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE submissions s
            SET status = 'in_progress', started_at = $4, updated_at = $4
            FROM picked
            WHERE s.id = picked.id
            RETURNING s.*
            "#,
        )
        .bind(max_retry)
        .bind(limited)
        .bind(limit)
        .bind(request.now)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_batch", e))?;

        let mut claimed = rows
            .iter()
            .map(decode_submission)
            .collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by_key(|s| (s.queue_position, s.created_at, s.id));

        for shift in claim_shifts(&claimed) {
            apply_shift(&mut tx, shift).await?;
        }
        tx.commit().await.map_err(|e| map_sqlx_error("claim_batch", e))?;

        Span::current().record("claimed", claimed.len());
        Ok(claimed)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn release_claims(
        &self,
        ids: &[SubmissionId],
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let mut tx = self.begin("release_claims").await?;

        let rows = sqlx::query(
            r#"
            UPDATE submissions
            SET status = 'queued', started_at = NULL, updated_at = $2
            WHERE id = ANY($1) AND status = 'in_progress'
            RETURNING *
            "#,
        )
        .bind(ids)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("release_claims", e))?;

        let released = rows
            .iter()
            .map(decode_submission)
            .collect::<Result<Vec<_>, _>>()?;
        for shift in release_shifts(&released) {
            apply_shift(&mut tx, shift).await?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("release_claims", e))?;
        Ok(released.len())
    }

    #[instrument(skip(self, listing_url), fields(submission_id = %id), err)]
    async fn mark_submitted(
        &self,
        id: SubmissionId,
        listing_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin("mark_submitted").await?;
        let mut submission = lock_submission(&mut tx, id).await?;
        ensure_claimed(id, submission.status, SubmissionStatus::Submitted)?;

        submission.mark_submitted(listing_url, now);
        write_submission(&mut tx, &submission).await?;
        apply_transition(
            &mut tx,
            submission.campaign_run_id,
            SubmissionStatus::InProgress,
            SubmissionStatus::Submitted,
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("mark_submitted", e))
    }

    #[instrument(skip(self, action), fields(submission_id = %id), err)]
    async fn mark_action_needed(
        &self,
        id: SubmissionId,
        action: &ActionRequest,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin("mark_action_needed").await?;
        let mut submission = lock_submission(&mut tx, id).await?;
        ensure_claimed(id, submission.status, SubmissionStatus::ActionNeeded)?;

        submission.mark_action_needed(action, deadline, now);
        write_submission(&mut tx, &submission).await?;
        apply_transition(
            &mut tx,
            submission.campaign_run_id,
            SubmissionStatus::InProgress,
            SubmissionStatus::ActionNeeded,
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("mark_action_needed", e))
    }

    #[instrument(skip(self, error_message, policy), fields(submission_id = %id), err)]
    async fn record_failure(
        &self,
        id: SubmissionId,
        error_message: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, StoreError> {
        let mut tx = self.begin("record_failure").await?;
        let mut submission = lock_submission(&mut tx, id).await?;
        ensure_claimed(id, submission.status, SubmissionStatus::Failed)?;

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

        write_submission(&mut tx, &submission).await?;
        apply_transition(
            &mut tx,
            submission.campaign_run_id,
            SubmissionStatus::InProgress,
            to,
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("record_failure", e))?;
        Ok(outcome)
    }
}

#[async_trait]
impl ReminderStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn reminder_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderCandidate>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                s.*,
                COALESCE(d.name, '') AS directory_name,
                p.email AS pref_email,
                p.display_name AS pref_display_name,
                p.reminders_enabled AS pref_reminders_enabled,
                p.quiet_hours_start AS pref_quiet_hours_start,
                p.quiet_hours_end AS pref_quiet_hours_end,
                p.timezone AS pref_timezone
            FROM submissions s
            JOIN notification_preferences p ON p.user_id = s.user_id
            LEFT JOIN directories d ON d.id = s.directory_id
            WHERE s.status = ANY($1)
                AND s.action_deadline IS NOT NULL
                AND s.action_deadline > $2
            ORDER BY s.action_deadline ASC, s.id ASC
            "#,
        )
        .bind(status_names(&SubmissionStatus::ACTIONABLE))
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reminder_candidates", e))?;

        rows.iter()
            .map(|row| {
                Ok(ReminderCandidate {
                    submission: decode_submission(row)?,
                    directory_name: row.try_get("directory_name").map_err(decode_error)?,
                    preferences: decode_preferences(row)?,
                })
            })
            .collect()
    }

    async fn has_notification(
        &self,
        user_id: UserId,
        submission_id: SubmissionId,
        notification_type: NotificationType,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM notification_events
                WHERE user_id = $1
                    AND submission_id = $2
                    AND notification_type = $3
                    AND status = $4
            ) AS delivered
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(submission_id.as_uuid())
        .bind(notification_type.as_str())
        .bind(DeliveryStatus::Sent.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_notification", e))?;
        row.try_get("delivered").map_err(decode_error)
    }

    #[instrument(
        skip(self, event),
        fields(
            submission_id = %event.submission_id,
            notification_type = %event.notification_type,
            status = event.status.as_str()
        ),
        err
    )]
    async fn record_notification(&self, event: &NotificationEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_events (
                id, user_id, submission_id, notification_type,
                channel, status, error_message, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, submission_id, notification_type)
            DO UPDATE SET
                id = EXCLUDED.id,
                channel = EXCLUDED.channel,
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                created_at = EXCLUDED.created_at
            WHERE notification_events.status <> 'sent'
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.user_id.as_uuid())
        .bind(event.submission_id.as_uuid())
        .bind(event.notification_type.as_str())
        .bind(&event.channel)
        .bind(event.status.as_str())
        .bind(&event.error_message)
        .bind(event.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_notification", e))?;
        Ok(())
    }

    #[instrument(skip(self, reason), fields(blocked = tracing::field::Empty), err)]
    async fn block_expired(
        &self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<BlockedSubmission>, StoreError> {
        let mut tx = self.begin("block_expired").await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM submissions
            WHERE status = ANY($1)
                AND action_deadline IS NOT NULL
                AND action_deadline < $2
            ORDER BY id
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(status_names(&SubmissionStatus::ACTIONABLE))
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("block_expired", e))?;

        let mut blocked = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut submission = decode_submission(row)?;
            let previous_status = submission.status;
            submission.mark_blocked(reason, now);
            write_submission(&mut tx, &submission).await?;
            apply_transition(
                &mut tx,
                submission.campaign_run_id,
                previous_status,
                SubmissionStatus::Blocked,
            )
            .await?;

            let directory_name: Option<String> =
                sqlx::query_scalar("SELECT name FROM directories WHERE id = $1")
                    .bind(submission.directory_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("block_expired", e))?;

            let preferences = sqlx::query(
                r#"
                SELECT
                    email AS pref_email,
                    display_name AS pref_display_name,
                    reminders_enabled AS pref_reminders_enabled,
                    quiet_hours_start AS pref_quiet_hours_start,
                    quiet_hours_end AS pref_quiet_hours_end,
                    timezone AS pref_timezone
                FROM notification_preferences
                WHERE user_id = $1
                "#,
            )
            .bind(submission.user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("block_expired", e))?
            .as_ref()
            .map(decode_preferences)
            .transpose()?;

            blocked.push(BlockedSubmission {
                submission,
                previous_status,
                directory_name: directory_name.unwrap_or_default(),
                preferences,
            });
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("block_expired", e))?;
        Span::current().record("blocked", blocked.len());
        Ok(blocked)
    }
}

async fn lock_submission(
    tx: &mut Transaction<'static, Postgres>,
    id: SubmissionId,
) -> Result<Submission, StoreError> {
    let row = sqlx::query("SELECT * FROM submissions WHERE id = $1 FOR UPDATE")
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_submission", e))?
        .ok_or(StoreError::NotFound(id))?;
    decode_submission(&row)
}

/// Persist every mutable column of `submission`.
async fn write_submission(
    tx: &mut Transaction<'static, Postgres>,
    submission: &Submission,
) -> Result<(), StoreError> {
    let retry_count = i32::try_from(submission.retry_count)
        .map_err(|e| StoreError::Decode(format!("retry_count out of range: {e}")))?;
    sqlx::query(
        r#"
        UPDATE submissions SET
            status = $2,
            retry_count = $3,
            updated_at = $4,
            started_at = $5,
            action_type = $6,
            action_instructions = $7,
            action_url = $8,
            action_deadline = $9,
            action_required_at = $10,
            submitted_at = $11,
            listing_url = $12,
            error_message = $13,
            error_code = $14,
            failed_at = $15,
            blocked_at = $16,
            blocked_reason = $17
        WHERE id = $1
        "#,
    )
    .bind(submission.id.as_uuid())
    .bind(submission.status.as_str())
    .bind(retry_count)
    .bind(submission.updated_at)
    .bind(submission.started_at)
    .bind(&submission.action_type)
    .bind(&submission.action_instructions)
    .bind(&submission.action_url)
    .bind(submission.action_deadline)
    .bind(submission.action_required_at)
    .bind(submission.submitted_at)
    .bind(&submission.listing_url)
    .bind(&submission.error_message)
    .bind(&submission.error_code)
    .bind(submission.failed_at)
    .bind(submission.blocked_at)
    .bind(&submission.blocked_reason)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_submission", e))?;
    Ok(())
}

async fn apply_transition(
    tx: &mut Transaction<'static, Postgres>,
    campaign: Option<CampaignRunId>,
    from: SubmissionStatus,
    to: SubmissionStatus,
) -> Result<(), StoreError> {
    match CounterShift::for_transition(campaign, from, to) {
        Some(shift) => apply_shift(tx, shift).await,
        None => Ok(()),
    }
}

async fn apply_shift(
    tx: &mut Transaction<'static, Postgres>,
    shift: CounterShift,
) -> Result<(), StoreError> {
    let from = counter_column(shift.from);
    let to = counter_column(shift.to);
    // Column names come from a closed set, never from input.
    let sql = format!("UPDATE campaign_runs SET {from} = {from} - $2, {to} = {to} + $2 WHERE id = $1");
    sqlx::query(&sql)
        .bind(shift.campaign.as_uuid())
        .bind(shift.count)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("apply_shift", e))?;
    Ok(())
}

fn status_names(statuses: &[SubmissionStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Database(format!(
            "database error in {}: {} (code {})",
            operation,
            db_err.message(),
            db_err.code().as_deref().unwrap_or("none")
        )),
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Decode(format!("{} in {}", err, operation))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Decode(err.to_string())
}

// SQLx row types

#[derive(Debug)]
struct SubmissionRow {
    id: Uuid,
    user_id: Uuid,
    directory_id: Uuid,
    campaign_run_id: Option<Uuid>,
    status: String,
    retry_count: i32,
    queue_position: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    action_type: Option<String>,
    action_instructions: Option<String>,
    action_url: Option<String>,
    action_deadline: Option<DateTime<Utc>>,
    action_required_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    listing_url: Option<String>,
    error_message: Option<String>,
    error_code: Option<String>,
    failed_at: Option<DateTime<Utc>>,
    blocked_at: Option<DateTime<Utc>>,
    blocked_reason: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for SubmissionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SubmissionRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            directory_id: row.try_get("directory_id")?,
            campaign_run_id: row.try_get("campaign_run_id")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            queue_position: row.try_get("queue_position")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            action_type: row.try_get("action_type")?,
            action_instructions: row.try_get("action_instructions")?,
            action_url: row.try_get("action_url")?,
            action_deadline: row.try_get("action_deadline")?,
            action_required_at: row.try_get("action_required_at")?,
            submitted_at: row.try_get("submitted_at")?,
            listing_url: row.try_get("listing_url")?,
            error_message: row.try_get("error_message")?,
            error_code: row.try_get("error_code")?,
            failed_at: row.try_get("failed_at")?,
            blocked_at: row.try_get("blocked_at")?,
            blocked_reason: row.try_get("blocked_reason")?,
        })
    }
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = StoreError;

    fn try_from(row: SubmissionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<SubmissionStatus>()
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let retry_count = u32::try_from(row.retry_count)
            .map_err(|_| StoreError::Decode(format!("negative retry_count on {}", row.id)))?;

        Ok(Submission {
            id: SubmissionId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            directory_id: DirectoryId::from_uuid(row.directory_id),
            campaign_run_id: row.campaign_run_id.map(CampaignRunId::from_uuid),
            status,
            retry_count,
            queue_position: row.queue_position,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            action_type: row.action_type,
            action_instructions: row.action_instructions,
            action_url: row.action_url,
            action_deadline: row.action_deadline,
            action_required_at: row.action_required_at,
            submitted_at: row.submitted_at,
            listing_url: row.listing_url,
            error_message: row.error_message,
            error_code: row.error_code,
            failed_at: row.failed_at,
            blocked_at: row.blocked_at,
            blocked_reason: row.blocked_reason,
        })
    }
}

fn decode_submission(row: &PgRow) -> Result<Submission, StoreError> {
    SubmissionRow::from_row(row)
        .map_err(decode_error)?
        .try_into()
}

/// Decode the `pref_*` aliased columns.
fn decode_preferences(row: &PgRow) -> Result<NotificationPreferences, StoreError> {
    Ok(NotificationPreferences {
        email: row.try_get("pref_email").map_err(decode_error)?,
        display_name: row.try_get("pref_display_name").map_err(decode_error)?,
        reminders_enabled: row.try_get("pref_reminders_enabled").map_err(decode_error)?,
        quiet_hours_start: row.try_get("pref_quiet_hours_start").map_err(decode_error)?,
        quiet_hours_end: row.try_get("pref_quiet_hours_end").map_err(decode_error)?,
        timezone: row.try_get("pref_timezone").map_err(decode_error)?,
    })
}
