//! Deadline enforcement and the reminder/escalation pass.
//!
//! A pass walks every awaiting-action submission, picks the reminder due for
//! its remaining days (if any), and sends it once per
//! `(user, submission, type)`. It then blocks every submission whose deadline
//! has passed and sends the one-time blocked notice.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use dirsubmit_core::{
    NotificationEvent, NotificationPreferences, NotificationType, Submission,
};

use crate::clock::Clock;
use crate::notify::{Mailer, TemplateContext, render};
use crate::store::{ReminderStore, StoreError};
use crate::worker::sleep_or_shutdown;

mod quiet_hours;

pub use quiet_hours::{QuietHours, QuietHoursError, QuietHoursFallback};

/// Reason written to `blocked_reason` when a deadline elapses.
pub const DEADLINE_ELAPSED: &str = "action deadline elapsed";

/// Outcome of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReminderReport {
    pub sent: usize,
    pub skipped: usize,
    pub errors: usize,
    pub blocked: usize,
}

impl ReminderReport {
    fn count(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Sent => self.sent += 1,
            Delivery::SendFailed | Delivery::Unrecorded => self.errors += 1,
        }
    }
}

/// Result of sending one email and writing its ledger row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Delivery {
    Sent,
    SendFailed,
    /// Sent, but the ledger row was not written, so dedup will not see it.
    Unrecorded,
}

/// Why a candidate got no email this pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Skip {
    NotDue,
    Disabled,
    QuietHours,
    AlreadySent,
}

pub struct ReminderScheduler<S: ReminderStore, M: Mailer> {
    store: Arc<S>,
    mailer: Arc<M>,
    clock: Arc<dyn Clock>,
    fallback: QuietHoursFallback,
}

impl<S: ReminderStore, M: Mailer> ReminderScheduler<S, M> {
    pub fn new(store: Arc<S>, mailer: Arc<M>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            mailer,
            clock,
            fallback: QuietHoursFallback::default(),
        }
    }

    pub fn with_quiet_hours_fallback(mut self, fallback: QuietHoursFallback) -> Self {
        self.fallback = fallback;
        self
    }

    /// Send due reminders, then block expired submissions.
    ///
    /// Per-candidate failures are counted in `errors` and never abort the
    /// pass; only failing to list candidates or to block is an error.
    pub async fn run_pass(&self) -> Result<ReminderReport, StoreError> {
        let now = self.clock.now();
        let mut report = ReminderReport::default();

        let candidates = self.store.reminder_candidates(now).await?;
        debug!(candidates = candidates.len(), "reminder pass started");

        for candidate in &candidates {
            let Some(deadline) = candidate.submission.action_deadline else {
                report.skipped += 1;
                continue;
            };
            let days_remaining = (deadline - now).num_days();

            let notification_type = match self
                .due_reminder(&candidate.submission, &candidate.preferences, days_remaining)
                .await
            {
                Ok(Ok(notification_type)) => notification_type,
                Ok(Err(skip)) => {
                    debug!(submission_id = %candidate.submission.id, reason = ?skip, "reminder skipped");
                    report.skipped += 1;
                    continue;
                }
                Err(err) => {
                    error!(submission_id = %candidate.submission.id, error = %err, "reminder lookup failed");
                    report.errors += 1;
                    continue;
                }
            };

            let ctx = TemplateContext {
                to: candidate.preferences.email.clone(),
                recipient_name: candidate.preferences.display_name.clone(),
                directory_name: candidate.directory_name.clone(),
                deadline: Some(deadline),
                days_remaining: Some(days_remaining),
                instructions: candidate.submission.action_instructions.clone(),
                action_url: candidate.submission.action_url.clone(),
            };
            let delivery = self
                .deliver(&candidate.submission, notification_type, &ctx)
                .await;
            report.count(delivery);
        }

        let blocked = self.block_expired(&mut report).await?;
        report.blocked = blocked;

        info!(
            sent = report.sent,
            skipped = report.skipped,
            errors = report.errors,
            blocked = report.blocked,
            "reminder pass complete"
        );
        Ok(report)
    }

    /// Decide which reminder, if any, a candidate gets now.
    async fn due_reminder(
        &self,
        submission: &Submission,
        preferences: &NotificationPreferences,
        days_remaining: i64,
    ) -> Result<Result<NotificationType, Skip>, StoreError> {
        let Some(notification_type) = NotificationType::reminder_for_days_remaining(days_remaining)
        else {
            return Ok(Err(Skip::NotDue));
        };
        if !preferences.reminders_enabled {
            return Ok(Err(Skip::Disabled));
        }
        if self.in_quiet_hours(submission, preferences) {
            return Ok(Err(Skip::QuietHours));
        }
        if self
            .store
            .has_notification(submission.user_id, submission.id, notification_type)
            .await?
        {
            return Ok(Err(Skip::AlreadySent));
        }
        Ok(Ok(notification_type))
    }

    fn in_quiet_hours(&self, submission: &Submission, preferences: &NotificationPreferences) -> bool {
        match QuietHours::from_preferences(preferences) {
            Ok(Some(quiet)) => quiet.contains(self.clock.now()),
            Ok(None) => false,
            Err(err) => {
                warn!(
                    submission_id = %submission.id,
                    user_id = %submission.user_id,
                    error = %err,
                    fallback = ?self.fallback,
                    "unparseable quiet hours"
                );
                self.fallback == QuietHoursFallback::Suppress
            }
        }
    }

    /// Block expired submissions and send each owner the blocked notice.
    /// Returns the number of submissions blocked.
    async fn block_expired(&self, report: &mut ReminderReport) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let blocked = self.store.block_expired(DEADLINE_ELAPSED, now).await?;

        for item in &blocked {
            info!(
                submission_id = %item.submission.id,
                previous_status = %item.previous_status,
                "submission blocked"
            );
            let Some(preferences) = &item.preferences else {
                continue;
            };
            if !preferences.reminders_enabled {
                continue;
            }

            let already = self
                .store
                .has_notification(
                    item.submission.user_id,
                    item.submission.id,
                    NotificationType::SubmissionBlocked,
                )
                .await;
            match already {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    error!(submission_id = %item.submission.id, error = %err, "blocked notice lookup failed");
                    report.errors += 1;
                    continue;
                }
            }

            let ctx = TemplateContext {
                to: preferences.email.clone(),
                recipient_name: preferences.display_name.clone(),
                directory_name: item.directory_name.clone(),
                deadline: item.submission.action_deadline,
                days_remaining: None,
                instructions: None,
                action_url: None,
            };
            let delivery = self
                .deliver(&item.submission, NotificationType::SubmissionBlocked, &ctx)
                .await;
            report.count(delivery);
        }

        Ok(blocked.len())
    }

    /// Send one email and write its ledger row.
    async fn deliver(
        &self,
        submission: &Submission,
        notification_type: NotificationType,
        ctx: &TemplateContext,
    ) -> Delivery {
        let email = render(notification_type, ctx);
        let now = self.clock.now();

        let (event, delivered) = match self.mailer.send(&email).await {
            Ok(()) => (
                NotificationEvent::sent(submission.user_id, submission.id, notification_type, now),
                true,
            ),
            Err(err) => {
                warn!(
                    submission_id = %submission.id,
                    notification_type = %notification_type,
                    error = %err,
                    "notification send failed"
                );
                (
                    NotificationEvent::failed(
                        submission.user_id,
                        submission.id,
                        notification_type,
                        err.to_string(),
                        now,
                    ),
                    false,
                )
            }
        };

        if let Err(err) = self.store.record_notification(&event).await {
            error!(
                submission_id = %submission.id,
                notification_type = %notification_type,
                error = %err,
                "failed to record notification"
            );
            if delivered {
                return Delivery::Unrecorded;
            }
        }
        if delivered {
            Delivery::Sent
        } else {
            Delivery::SendFailed
        }
    }
}

impl<S: ReminderStore, M: Mailer> ReminderScheduler<S, M> {
    /// Run a pass now and then every `interval` until shut down.
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) -> ReminderHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                if let Err(err) = self.run_pass().await {
                    error!(error = %err, "reminder pass failed");
                }
                if !sleep_or_shutdown(interval, &mut shutdown_rx).await {
                    break;
                }
            }
            info!("reminder scheduler stopped");
        });

        ReminderHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

/// Handle to a periodic reminder task.
#[derive(Debug)]
pub struct ReminderHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReminderHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "reminder task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::{RecordingMailer, Urgency};
    use crate::rate_limit::RateLimitPolicy;
    use crate::retry::RetryPolicy;
    use crate::store::{ClaimRequest, InMemoryStore, JobStore};
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use dirsubmit_core::{
        ActionRequest, DeliveryStatus, Directory, NewSubmission, SubmissionId, SubmissionMode,
        SubmissionStatus, UserId,
    };

    const EMAIL: &str = "owner@acme.test";

    struct Fixture {
        store: Arc<InMemoryStore>,
        mailer: Arc<RecordingMailer>,
        clock: Arc<ManualClock>,
        t0: DateTime<Utc>,
        user: UserId,
    }

    impl Fixture {
        async fn new(preferences: Option<NotificationPreferences>) -> Self {
            let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
            let user = UserId::new();
            let store = Arc::new(InMemoryStore::new());
            if let Some(preferences) = preferences {
                store.insert_preferences(user, preferences).await;
            }
            Self {
                store,
                mailer: Arc::new(RecordingMailer::new()),
                clock: Arc::new(ManualClock::new(t0)),
                t0,
                user,
            }
        }

        /// A submission that entered `action_needed` at `t0` with `deadline`.
        async fn awaiting(&self, deadline: DateTime<Utc>) -> SubmissionId {
            let dir = self
                .store
                .insert_directory(Directory::new(
                    format!("dir-{}", SubmissionId::new()),
                    "Yelp",
                    SubmissionMode::Manual,
                ))
                .await;
            let id = self
                .store
                .enqueue(NewSubmission::new(self.user, dir), self.t0)
                .await
                .unwrap();
            let request = ClaimRequest {
                batch_size: 1,
                retry: RetryPolicy::default(),
                now: self.t0,
            };
            self.store
                .claim_batch(&request, &RateLimitPolicy::default())
                .await
                .unwrap();
            let action = ActionRequest {
                action_type: "manual_submission".into(),
                instructions: "Submit via the form.".into(),
                url: Some("https://yelp.example/add".into()),
            };
            self.store
                .mark_action_needed(id, &action, deadline, self.t0)
                .await
                .unwrap();
            id
        }

        fn scheduler(&self) -> ReminderScheduler<InMemoryStore, RecordingMailer> {
            ReminderScheduler::new(self.store.clone(), self.mailer.clone(), self.clock.clone())
        }

        fn at_day(&self, day: i64) {
            self.clock.set(self.t0 + ChronoDuration::days(day));
        }
    }

    fn prefs() -> NotificationPreferences {
        NotificationPreferences::new(EMAIL)
    }

    #[tokio::test]
    async fn ten_day_timeline() {
        let fx = Fixture::new(Some(prefs())).await;
        let id = fx.awaiting(fx.t0 + ChronoDuration::days(10)).await;
        let scheduler = fx.scheduler();

        fx.at_day(2);
        let report = scheduler.run_pass().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(fx.mailer.sent()[0].urgency, Urgency::Normal);

        fx.at_day(3);
        let report = scheduler.run_pass().await.unwrap();
        assert_eq!((report.sent, report.skipped), (0, 1));

        fx.at_day(5);
        assert_eq!(scheduler.run_pass().await.unwrap().sent, 1);
        assert_eq!(fx.mailer.sent()[1].urgency, Urgency::High);

        fx.at_day(8);
        assert_eq!(scheduler.run_pass().await.unwrap().sent, 1);
        assert!(fx.mailer.sent()[2].subject.starts_with("Final warning"));

        fx.at_day(11);
        let report = scheduler.run_pass().await.unwrap();
        assert_eq!(report.blocked, 1);
        assert_eq!(report.sent, 1);
        assert!(fx.mailer.sent()[3].subject.contains("blocked"));

        let stored = fx.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Blocked);
        assert_eq!(stored.blocked_reason.as_deref(), Some(DEADLINE_ELAPSED));

        let types: Vec<NotificationType> = fx
            .store
            .notifications()
            .await
            .into_iter()
            .map(|n| n.notification_type)
            .collect();
        assert_eq!(
            types,
            vec![
                NotificationType::Day2,
                NotificationType::Day5,
                NotificationType::FinalWarning,
                NotificationType::SubmissionBlocked,
            ]
        );

        fx.at_day(12);
        let report = scheduler.run_pass().await.unwrap();
        assert_eq!(report, ReminderReport::default());
        assert_eq!(fx.mailer.sent().len(), 4);
    }

    #[tokio::test]
    async fn second_pass_on_same_day_sends_nothing() {
        let fx = Fixture::new(Some(prefs())).await;
        fx.awaiting(fx.t0 + ChronoDuration::days(10)).await;
        let scheduler = fx.scheduler();

        fx.at_day(2);
        assert_eq!(scheduler.run_pass().await.unwrap().sent, 1);
        let again = scheduler.run_pass().await.unwrap();
        assert_eq!((again.sent, again.skipped), (0, 1));
        assert_eq!(fx.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn deadline_boundary_is_exact() {
        let fx = Fixture::new(Some(prefs())).await;
        let now = fx.t0 + ChronoDuration::days(4);
        let expired = fx.awaiting(now - ChronoDuration::seconds(1)).await;
        let pending = fx.awaiting(now + ChronoDuration::seconds(1)).await;
        fx.clock.set(now);

        let report = fx.scheduler().run_pass().await.unwrap();
        assert_eq!(report.blocked, 1);
        assert_eq!(
            fx.store.get(expired).await.unwrap().unwrap().status,
            SubmissionStatus::Blocked
        );
        assert_eq!(
            fx.store.get(pending).await.unwrap().unwrap().status,
            SubmissionStatus::ActionNeeded
        );
    }

    #[tokio::test]
    async fn send_failure_is_recorded_and_retried_next_pass() {
        let fx = Fixture::new(Some(prefs())).await;
        fx.awaiting(fx.t0 + ChronoDuration::days(10)).await;
        let scheduler = fx.scheduler();
        fx.mailer.fail_for(EMAIL);

        fx.at_day(2);
        let report = scheduler.run_pass().await.unwrap();
        assert_eq!((report.sent, report.errors), (0, 1));
        let ledger = fx.store.notifications().await;
        assert_eq!(ledger[0].status, DeliveryStatus::Failed);

        fx.mailer.recover(EMAIL);
        assert_eq!(scheduler.run_pass().await.unwrap().sent, 1);
        let ledger = fx.store.notifications().await;
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn disabled_reminders_and_missing_preferences_are_skipped() {
        let mut disabled = prefs();
        disabled.reminders_enabled = false;
        let fx = Fixture::new(Some(disabled)).await;
        fx.awaiting(fx.t0 + ChronoDuration::days(10)).await;
        fx.at_day(2);
        let report = fx.scheduler().run_pass().await.unwrap();
        assert_eq!((report.sent, report.skipped), (0, 1));

        let fx = Fixture::new(None).await;
        fx.awaiting(fx.t0 + ChronoDuration::days(10)).await;
        fx.at_day(2);
        assert_eq!(fx.scheduler().run_pass().await.unwrap(), ReminderReport::default());
    }

    #[tokio::test]
    async fn quiet_hours_defer_until_window_ends() {
        // t0 is 15:00 UTC, so the day-2 reminder is due from day 1 15:00 to day 2 15:00.
        let fx = Fixture::new(Some(prefs().with_quiet_hours("13:00", "14:00", "UTC"))).await;
        fx.awaiting(fx.t0 + ChronoDuration::days(10)).await;
        let scheduler = fx.scheduler();

        fx.clock
            .set(fx.t0 + ChronoDuration::days(2) - ChronoDuration::minutes(90));
        let report = scheduler.run_pass().await.unwrap();
        assert_eq!((report.sent, report.skipped), (0, 1));

        fx.clock.advance(ChronoDuration::hours(1));
        assert_eq!(scheduler.run_pass().await.unwrap().sent, 1);
        assert_eq!(
            fx.store.notifications().await[0].notification_type,
            NotificationType::Day2
        );
    }

    #[tokio::test]
    async fn unparseable_quiet_hours_follow_fallback() {
        let broken = prefs().with_quiet_hours("14:00", "16:00", "Not/AZone");

        let fx = Fixture::new(Some(broken.clone())).await;
        fx.awaiting(fx.t0 + ChronoDuration::days(10)).await;
        fx.at_day(2);
        assert_eq!(fx.scheduler().run_pass().await.unwrap().sent, 1);

        let fx = Fixture::new(Some(broken)).await;
        fx.awaiting(fx.t0 + ChronoDuration::days(10)).await;
        fx.at_day(2);
        let report = fx
            .scheduler()
            .with_quiet_hours_fallback(QuietHoursFallback::Suppress)
            .run_pass()
            .await
            .unwrap();
        assert_eq!((report.sent, report.skipped), (0, 1));
    }

    #[tokio::test]
    async fn periodic_task_runs_a_pass_and_stops() {
        let fx = Fixture::new(Some(prefs())).await;
        fx.awaiting(fx.t0 + ChronoDuration::days(10)).await;
        fx.at_day(2);

        let handle = Arc::new(fx.scheduler()).spawn_periodic(Duration::from_secs(3600));
        tokio::time::timeout(Duration::from_secs(5), async {
            while fx.mailer.sent().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no reminder sent");
        handle.shutdown().await;
        assert_eq!(fx.mailer.sent().len(), 1);
    }

    /// Delegates to the in-memory store but cannot write the ledger.
    struct LedgerDown(Arc<InMemoryStore>);

    #[async_trait::async_trait]
    impl ReminderStore for LedgerDown {
        async fn reminder_candidates(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<crate::store::ReminderCandidate>, StoreError> {
            self.0.reminder_candidates(now).await
        }

        async fn has_notification(
            &self,
            user_id: UserId,
            submission_id: SubmissionId,
            notification_type: NotificationType,
        ) -> Result<bool, StoreError> {
            self.0
                .has_notification(user_id, submission_id, notification_type)
                .await
        }

        async fn record_notification(&self, _: &NotificationEvent) -> Result<(), StoreError> {
            Err(StoreError::Database("ledger unavailable".into()))
        }

        async fn block_expired(
            &self,
            reason: &str,
            now: DateTime<Utc>,
        ) -> Result<Vec<crate::store::BlockedSubmission>, StoreError> {
            self.0.block_expired(reason, now).await
        }
    }

    #[tokio::test]
    async fn unrecorded_send_counts_as_error() {
        let fx = Fixture::new(Some(prefs())).await;
        fx.awaiting(fx.t0 + ChronoDuration::days(10)).await;
        fx.at_day(2);

        let scheduler = ReminderScheduler::new(
            Arc::new(LedgerDown(fx.store.clone())),
            fx.mailer.clone(),
            fx.clock.clone(),
        );
        let report = scheduler.run_pass().await.unwrap();
        assert_eq!((report.sent, report.errors), (0, 1));
        assert_eq!(fx.mailer.sent().len(), 1);
        assert!(fx.store.notifications().await.is_empty());
    }
}
