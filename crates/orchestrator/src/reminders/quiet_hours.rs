//! Per-user quiet hours, evaluated in the user's timezone.

use core::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use dirsubmit_core::NotificationPreferences;

/// What to do when a user's quiet-hours settings cannot be parsed.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuietHoursFallback {
    /// Treat the user as outside quiet hours.
    #[default]
    SendAnyway,
    /// Treat the user as inside quiet hours.
    Suppress,
}

impl FromStr for QuietHoursFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "send" | "send_anyway" => Ok(QuietHoursFallback::SendAnyway),
            "suppress" => Ok(QuietHoursFallback::Suppress),
            other => Err(format!("expected `send` or `suppress`, got `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuietHoursError {
    #[error("invalid quiet-hours time {0:?}")]
    Time(String),
    #[error("unknown timezone {0:?}")]
    Timezone(String),
}

/// A daily window `[start, end)` in local time. Wraps past midnight when
/// `start > end`; empty when `start == end`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: Tz,
}

impl QuietHours {
    /// `Ok(None)` when the user has not configured both bounds.
    pub fn from_preferences(
        preferences: &NotificationPreferences,
    ) -> Result<Option<Self>, QuietHoursError> {
        let (Some(start), Some(end)) = (
            preferences.quiet_hours_start.as_deref(),
            preferences.quiet_hours_end.as_deref(),
        ) else {
            return Ok(None);
        };

        let timezone = preferences
            .timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| QuietHoursError::Timezone(preferences.timezone.clone()))?;

        Ok(Some(Self {
            start: parse_time(start)?,
            end: parse_time(end)?,
            timezone,
        }))
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone).time();
        if self.start == self.end {
            false
        } else if self.start < self.end {
            self.start <= local && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, QuietHoursError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| QuietHoursError::Time(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn prefs(start: &str, end: &str, tz: &str) -> NotificationPreferences {
        NotificationPreferences::new("owner@acme.test").with_quiet_hours(start, end, tz)
    }

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, h, m, 0).unwrap()
    }

    #[test]
    fn same_day_window() {
        let quiet = QuietHours::from_preferences(&prefs("12:00", "14:00", "UTC"))
            .unwrap()
            .unwrap();
        assert!(!quiet.contains(utc(11, 59)));
        assert!(quiet.contains(utc(12, 0)));
        assert!(quiet.contains(utc(13, 30)));
        assert!(!quiet.contains(utc(14, 0)));
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let quiet = QuietHours::from_preferences(&prefs("22:00", "07:00", "UTC"))
            .unwrap()
            .unwrap();
        assert!(quiet.contains(utc(23, 0)));
        assert!(quiet.contains(utc(3, 0)));
        assert!(!quiet.contains(utc(7, 0)));
        assert!(!quiet.contains(utc(12, 0)));
    }

    #[test]
    fn evaluated_in_user_timezone() {
        // New York is UTC-5 in January.
        let quiet = QuietHours::from_preferences(&prefs("22:00", "07:00", "America/New_York"))
            .unwrap()
            .unwrap();
        assert!(quiet.contains(utc(4, 0)));
        assert!(!quiet.contains(utc(14, 0)));
        assert!(quiet.contains(utc(11, 30)));
        assert!(!quiet.contains(utc(12, 30)));
        assert!(quiet.contains(utc(3, 30)));
    }

    #[test]
    fn equal_bounds_mean_no_window() {
        let quiet = QuietHours::from_preferences(&prefs("09:00", "09:00", "UTC"))
            .unwrap()
            .unwrap();
        assert!(!quiet.contains(utc(9, 0)));
    }

    #[test]
    fn missing_bounds_disable_quiet_hours() {
        let prefs = NotificationPreferences::new("owner@acme.test");
        assert_eq!(QuietHours::from_preferences(&prefs).unwrap(), None);
    }

    #[test]
    fn parse_failures_are_reported() {
        assert_eq!(
            QuietHours::from_preferences(&prefs("25:00", "07:00", "UTC")).unwrap_err(),
            QuietHoursError::Time("25:00".into())
        );
        assert_eq!(
            QuietHours::from_preferences(&prefs("22:00", "07:00", "Mars/Olympus")).unwrap_err(),
            QuietHoursError::Timezone("Mars/Olympus".into())
        );
    }

    #[test]
    fn fallback_parses() {
        assert_eq!("send".parse::<QuietHoursFallback>(), Ok(QuietHoursFallback::SendAnyway));
        assert_eq!("Suppress".parse::<QuietHoursFallback>(), Ok(QuietHoursFallback::Suppress));
        assert!("ignore".parse::<QuietHoursFallback>().is_err());
    }
}
