//! Process-local daily submission budget.

use chrono::{DateTime, NaiveDate, Utc};

/// Counts jobs processed on the current UTC day.
///
/// The count lives in this process only: replicas each get the full budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyBudget {
    limit: u32,
    used: u32,
    day: NaiveDate,
}

impl DailyBudget {
    pub fn new(limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            used: 0,
            day: now.date_naive(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Jobs still allowed today. Resets when the UTC date changes.
    pub fn remaining(&mut self, now: DateTime<Utc>) -> u32 {
        self.roll_over(now);
        self.limit.saturating_sub(self.used)
    }

    pub fn record(&mut self, now: DateTime<Utc>, count: u32) {
        self.roll_over(now);
        self.used = self.used.saturating_add(count);
    }

    fn roll_over(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.used = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn exhausts_and_resets_at_utc_midnight() {
        let evening = Utc.with_ymd_and_hms(2026, 3, 14, 23, 0, 0).unwrap();
        let mut budget = DailyBudget::new(3, evening);

        budget.record(evening, 2);
        assert_eq!(budget.remaining(evening), 1);
        budget.record(evening, 5);
        assert_eq!(budget.remaining(evening), 0);

        let after_midnight = evening + Duration::hours(1);
        assert_eq!(budget.remaining(after_midnight), 3);
    }
}
