//! Per-directory hourly throughput limits.
//!
//! The limiter is recomputed from the store on every claim, inside the claim
//! transaction, so it is correct across any number of workers. There is no
//! in-process cache.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use dirsubmit_core::DirectoryId;

/// Default number of submissions a directory accepts per window.
pub const DEFAULT_HOURLY_CAP: u32 = 5;

/// Recent activity of one directory, as counted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLoad {
    pub directory_id: DirectoryId,
    pub slug: String,
    /// Submissions in `in_progress`, `submitted` or `pending_verification`
    /// whose `started_at` falls inside the window.
    pub recent: u32,
}

/// Hourly cap per directory, with named overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub default_hourly_cap: u32,
    /// Keyed by directory slug. A cap of 0 pauses the directory.
    pub overrides: HashMap<String, u32>,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            default_hourly_cap: DEFAULT_HOURLY_CAP,
            overrides: HashMap::new(),
            window: Duration::hours(1),
        }
    }
}

impl RateLimitPolicy {
    pub fn with_default_cap(mut self, cap: u32) -> Self {
        self.default_hourly_cap = cap;
        self
    }

    pub fn with_override(mut self, slug: impl Into<String>, cap: u32) -> Self {
        self.overrides.insert(slug.into(), cap);
        self
    }

    pub fn cap_for(&self, slug: &str) -> u32 {
        self.overrides
            .get(slug)
            .copied()
            .unwrap_or(self.default_hourly_cap)
    }

    /// Lower bound of `started_at` for a submission to count against the cap.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window
    }

    /// Directories that must be excluded from the next claim.
    pub fn limited_directories(&self, loads: &[DirectoryLoad]) -> HashSet<DirectoryId> {
        loads
            .iter()
            .filter(|load| load.recent >= self.cap_for(&load.slug))
            .map(|load| load.directory_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(slug: &str, recent: u32) -> DirectoryLoad {
        DirectoryLoad {
            directory_id: DirectoryId::new(),
            slug: slug.to_string(),
            recent,
        }
    }

    #[test]
    fn directory_at_cap_is_limited() {
        let policy = RateLimitPolicy::default();
        let busy = load("yelp", 5);
        let quiet = load("bing-places", 4);

        let limited = policy.limited_directories(&[busy.clone(), quiet.clone()]);
        assert!(limited.contains(&busy.directory_id));
        assert!(!limited.contains(&quiet.directory_id));
    }

    #[test]
    fn overrides_raise_and_lower_caps() {
        let policy = RateLimitPolicy::default()
            .with_override("google-business", 20)
            .with_override("strict-chamber", 1);

        let high_volume = load("google-business", 10);
        let strict = load("strict-chamber", 1);

        let limited = policy.limited_directories(&[high_volume.clone(), strict.clone()]);
        assert!(!limited.contains(&high_volume.directory_id));
        assert!(limited.contains(&strict.directory_id));
    }

    #[test]
    fn zero_cap_pauses_idle_directory() {
        let policy = RateLimitPolicy::default().with_override("paused", 0);
        let paused = load("paused", 0);
        assert!(policy.limited_directories(&[paused.clone()]).contains(&paused.directory_id));
    }

    #[test]
    fn window_is_one_hour_by_default() {
        let now = Utc::now();
        assert_eq!(RateLimitPolicy::default().window_start(now), now - Duration::hours(1));
    }
}
