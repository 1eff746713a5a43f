//! Runtime configuration read from environment variables.

use std::collections::HashMap;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use crate::rate_limit::{DEFAULT_HOURLY_CAP, RateLimitPolicy};
use crate::reminders::QuietHoursFallback;
use crate::retry::{DEFAULT_MAX_RETRY_COUNT, RetryPolicy};

/// Accepted `ACTION_DEADLINE_DAYS`.
pub const ACTION_DEADLINE_DAYS_RANGE: RangeInclusive<i64> = 1..=365;
/// Accepted `*_SECS` intervals: one second to one week.
pub const INTERVAL_SECS_RANGE: RangeInclusive<u64> = 1..=604_800;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Worker and reminder settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub worker_enabled: bool,
    pub reminders_enabled: bool,
    pub max_submissions_per_day: u32,
    pub batch_size: usize,
    pub batch_interval: Duration,
    pub error_backoff: Duration,
    pub max_retry_count: u32,
    pub directory_hourly_cap: u32,
    /// Per-slug caps overriding `directory_hourly_cap`.
    pub directory_cap_overrides: HashMap<String, u32>,
    pub action_deadline_days: i64,
    pub reminder_interval: Duration,
    pub quiet_hours_fallback: QuietHoursFallback,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_enabled: true,
            reminders_enabled: true,
            max_submissions_per_day: 50,
            batch_size: 5,
            batch_interval: Duration::from_secs(300),
            error_backoff: Duration::from_secs(60),
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            directory_hourly_cap: DEFAULT_HOURLY_CAP,
            directory_cap_overrides: HashMap::new(),
            action_deadline_days: 10,
            reminder_interval: Duration::from_secs(86_400),
            quiet_hours_fallback: QuietHoursFallback::default(),
        }
    }
}

impl WorkerConfig {
    /// Read the process environment. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            worker_enabled: parse_bool(get, "DIRSUBMIT_WORKER_ENABLED", defaults.worker_enabled)?,
            reminders_enabled: parse_bool(
                get,
                "DIRSUBMIT_REMINDERS_ENABLED",
                defaults.reminders_enabled,
            )?,
            max_submissions_per_day: parse(
                get,
                "MAX_SUBMISSIONS_PER_DAY",
                defaults.max_submissions_per_day,
            )?,
            batch_size: parse(get, "BATCH_SIZE", defaults.batch_size)?,
            batch_interval: Duration::from_secs(parse_in_range(
                get,
                "BATCH_INTERVAL_SECS",
                defaults.batch_interval.as_secs(),
                INTERVAL_SECS_RANGE,
            )?),
            error_backoff: Duration::from_secs(parse_in_range(
                get,
                "ERROR_BACKOFF_SECS",
                defaults.error_backoff.as_secs(),
                INTERVAL_SECS_RANGE,
            )?),
            max_retry_count: parse(get, "MAX_RETRY_COUNT", defaults.max_retry_count)?,
            directory_hourly_cap: parse(
                get,
                "DIRECTORY_HOURLY_CAP",
                defaults.directory_hourly_cap,
            )?,
            directory_cap_overrides: match get("DIRECTORY_HOURLY_CAP_OVERRIDES") {
                Some(raw) => parse_overrides(&raw)?,
                None => defaults.directory_cap_overrides,
            },
            action_deadline_days: parse_in_range(
                get,
                "ACTION_DEADLINE_DAYS",
                defaults.action_deadline_days,
                ACTION_DEADLINE_DAYS_RANGE,
            )?,
            reminder_interval: Duration::from_secs(parse_in_range(
                get,
                "REMINDER_INTERVAL_SECS",
                defaults.reminder_interval.as_secs(),
                INTERVAL_SECS_RANGE,
            )?),
            quiet_hours_fallback: match get("QUIET_HOURS_FALLBACK") {
                Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                    key: "QUIET_HOURS_FALLBACK",
                    value: raw.clone(),
                    reason,
                })?,
                None => defaults.quiet_hours_fallback,
            },
        })
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        self.directory_cap_overrides.iter().fold(
            RateLimitPolicy::default().with_default_cap(self.directory_hourly_cap),
            |policy, (slug, cap)| policy.with_override(slug.clone(), *cap),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retry_count)
    }

    pub fn action_deadline(&self) -> chrono::Duration {
        chrono::Duration::days(self.action_deadline_days)
    }
}

fn parse<F, T>(get: F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_in_range<F, T>(
    get: F,
    key: &'static str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: FromStr + PartialOrd + Display,
    T::Err: Display,
{
    let value = parse(get, key, default)?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: format!("must be between {} and {}", range.start(), range.end()),
        })
    }
}

fn parse_bool<F>(get: F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn parse_overrides(raw: &str) -> Result<HashMap<String, u32>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: "DIRECTORY_HOURLY_CAP_OVERRIDES",
        value: raw.to_string(),
        reason,
    };

    let mut overrides = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (slug, cap) = entry
            .split_once('=')
            .ok_or_else(|| invalid(format!("entry {entry:?} is not slug=cap")))?;
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(invalid(format!("entry {entry:?} has an empty slug")));
        }
        let cap = cap
            .trim()
            .parse::<u32>()
            .map_err(|e| invalid(format!("entry {entry:?}: {e}")))?;
        overrides.insert(slug.to_string(), cap);
    }
    Ok(overrides)
}
