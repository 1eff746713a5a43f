//! Retry decisions for failed submission attempts.

use serde::{Deserialize, Serialize};

/// Default number of attempts before a job fails terminally.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;

/// What to do with a job whose processing failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDecision {
    /// Put the job back in the queue for another attempt.
    Requeue,
    /// Give up: the job becomes `failed` with `MAX_RETRIES_EXCEEDED`.
    Fail,
}

/// Bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts a job gets; `retry_count` never exceeds this.
    pub max_retry_count: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retry_count: u32) -> Self {
        Self { max_retry_count }
    }

    /// Decide based on the job's `retry_count` before this failure is counted.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count.saturating_add(1) < self.max_retry_count {
            RetryDecision::Requeue
        } else {
            RetryDecision::Fail
        }
    }

    /// Whether a queued job with `retry_count` may still be claimed.
    pub fn is_claimable(&self, retry_count: u32) -> bool {
        retry_count < self.max_retry_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_three_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(0), RetryDecision::Requeue);
        assert_eq!(policy.decide(1), RetryDecision::Requeue);
        assert_eq!(policy.decide(2), RetryDecision::Fail);
        assert_eq!(policy.decide(7), RetryDecision::Fail);
    }

    #[test]
    fn zero_or_one_attempt_fails_immediately() {
        assert_eq!(RetryPolicy::new(1).decide(0), RetryDecision::Fail);
        assert_eq!(RetryPolicy::new(0).decide(0), RetryDecision::Fail);
    }

    #[test]
    fn claimable_below_cap() {
        let policy = RetryPolicy::default();
        assert!(policy.is_claimable(2));
        assert!(!policy.is_claimable(3));
    }
}
