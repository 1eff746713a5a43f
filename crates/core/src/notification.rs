//! Notification ledger and recipient preferences.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{NotificationEventId, SubmissionId, UserId};

/// Kinds of user-facing notification the orchestrator sends.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// First reminder, 8 days before the action deadline.
    Day2,
    /// Second reminder, 5 days before the action deadline.
    Day5,
    /// Last reminder, 2 days before the action deadline.
    FinalWarning,
    /// The action deadline elapsed and the submission was blocked.
    SubmissionBlocked,
}

impl NotificationType {
    pub const ALL: [NotificationType; 4] = [
        NotificationType::Day2,
        NotificationType::Day5,
        NotificationType::FinalWarning,
        NotificationType::SubmissionBlocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Day2 => "day2",
            NotificationType::Day5 => "day5",
            NotificationType::FinalWarning => "final_warning",
            NotificationType::SubmissionBlocked => "submission_blocked",
        }
    }

    /// Reminder due when `days_remaining` whole days are left before the deadline.
    pub fn reminder_for_days_remaining(days_remaining: i64) -> Option<Self> {
        match days_remaining {
            8 => Some(NotificationType::Day2),
            5 => Some(NotificationType::Day5),
            2 => Some(NotificationType::FinalWarning),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::unknown_variant("notification type", s))
    }
}

/// Delivery outcome recorded in the ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(DomainError::unknown_variant("delivery status", other)),
        }
    }
}

/// Append-only ledger row used to deduplicate sends per
/// `(user, submission, notification_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: NotificationEventId,
    pub user_id: UserId,
    pub submission_id: SubmissionId,
    pub notification_type: NotificationType,
    pub channel: String,
    pub status: DeliveryStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn sent(
        user_id: UserId,
        submission_id: SubmissionId,
        notification_type: NotificationType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationEventId::new(),
            user_id,
            submission_id,
            notification_type,
            channel: "email".to_string(),
            status: DeliveryStatus::Sent,
            error_message: None,
            created_at: now,
        }
    }

    pub fn failed(
        user_id: UserId,
        submission_id: SubmissionId,
        notification_type: NotificationType,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            error_message: Some(error.into()),
            ..Self::sent(user_id, submission_id, notification_type, now)
        }
    }
}

/// A user's reminder settings, joined onto reminder candidates.
///
/// Quiet hours are kept as the raw `"HH:MM"` strings stored for the user;
/// interpretation (and what to do when they do not parse) is up to the
/// scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub email: String,
    pub display_name: Option<String>,
    pub reminders_enabled: bool,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    /// IANA timezone name, e.g. `Europe/Berlin`.
    pub timezone: String,
}

impl NotificationPreferences {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: None,
            reminders_enabled: true,
            quiet_hours_start: None,
            quiet_hours_end: None,
            timezone: "UTC".to_string(),
        }
    }

    pub fn with_quiet_hours(
        mut self,
        start: impl Into<String>,
        end: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        self.quiet_hours_start = Some(start.into());
        self.quiet_hours_end = Some(end.into());
        self.timezone = timezone.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminder_days() {
        assert_eq!(
            NotificationType::reminder_for_days_remaining(8),
            Some(NotificationType::Day2)
        );
        assert_eq!(
            NotificationType::reminder_for_days_remaining(5),
            Some(NotificationType::Day5)
        );
        assert_eq!(
            NotificationType::reminder_for_days_remaining(2),
            Some(NotificationType::FinalWarning)
        );
        for days in [0, 1, 3, 4, 6, 7, 9, 10] {
            assert_eq!(NotificationType::reminder_for_days_remaining(days), None);
        }
    }

    #[test]
    fn failed_event_carries_error() {
        let event = NotificationEvent::failed(
            UserId::new(),
            SubmissionId::new(),
            NotificationType::Day5,
            "smtp timeout",
            Utc::now(),
        );
        assert_eq!(event.status, DeliveryStatus::Failed);
        assert_eq!(event.error_message.as_deref(), Some("smtp timeout"));
    }
}
