//! Campaign runs: denormalised per-campaign progress counters.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{CampaignRunId, UserId};
use crate::submission::SubmissionStatus;

/// One of the five live counters of a campaign run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignCounter {
    Queued,
    InProgress,
    ActionNeeded,
    Submitted,
    Failed,
}

impl CampaignCounter {
    /// The counter a submission in `status` is accounted under.
    pub fn for_status(status: SubmissionStatus) -> Self {
        match status {
            SubmissionStatus::Queued => CampaignCounter::Queued,
            SubmissionStatus::InProgress => CampaignCounter::InProgress,
            SubmissionStatus::ActionNeeded | SubmissionStatus::NeedsAction => {
                CampaignCounter::ActionNeeded
            }
            SubmissionStatus::Submitted | SubmissionStatus::PendingVerification => {
                CampaignCounter::Submitted
            }
            SubmissionStatus::Failed | SubmissionStatus::Blocked => CampaignCounter::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignCounter::Queued => "queued",
            CampaignCounter::InProgress => "in_progress",
            CampaignCounter::ActionNeeded => "action_needed",
            CampaignCounter::Submitted => "submitted",
            CampaignCounter::Failed => "failed",
        }
    }
}

impl fmt::Display for CampaignCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate counters for a batch of submissions created together.
///
/// Invariant: the five live counters always sum to `directories_total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignRun {
    pub id: CampaignRunId,
    pub user_id: UserId,
    pub directories_total: i64,
    pub directories_queued: i64,
    pub directories_in_progress: i64,
    pub directories_action_needed: i64,
    pub directories_submitted: i64,
    pub directories_failed: i64,
}

impl CampaignRun {
    pub fn new(user_id: UserId) -> Self {
        Self {
            id: CampaignRunId::new(),
            user_id,
            directories_total: 0,
            directories_queued: 0,
            directories_in_progress: 0,
            directories_action_needed: 0,
            directories_submitted: 0,
            directories_failed: 0,
        }
    }

    pub fn counter(&self, counter: CampaignCounter) -> i64 {
        match counter {
            CampaignCounter::Queued => self.directories_queued,
            CampaignCounter::InProgress => self.directories_in_progress,
            CampaignCounter::ActionNeeded => self.directories_action_needed,
            CampaignCounter::Submitted => self.directories_submitted,
            CampaignCounter::Failed => self.directories_failed,
        }
    }

    fn counter_mut(&mut self, counter: CampaignCounter) -> &mut i64 {
        match counter {
            CampaignCounter::Queued => &mut self.directories_queued,
            CampaignCounter::InProgress => &mut self.directories_in_progress,
            CampaignCounter::ActionNeeded => &mut self.directories_action_needed,
            CampaignCounter::Submitted => &mut self.directories_submitted,
            CampaignCounter::Failed => &mut self.directories_failed,
        }
    }

    /// Account a newly enqueued submission.
    pub fn record_enqueued(&mut self) {
        self.directories_total += 1;
        self.directories_queued += 1;
    }

    /// Move `count` submissions from one counter to another.
    pub fn shift(&mut self, from: CampaignCounter, to: CampaignCounter, count: i64) {
        if from == to || count == 0 {
            return;
        }
        *self.counter_mut(from) -= count;
        *self.counter_mut(to) += count;
    }

    pub fn live_sum(&self) -> i64 {
        self.directories_queued
            + self.directories_in_progress
            + self.directories_action_needed
            + self.directories_submitted
            + self.directories_failed
    }

    pub fn check_conservation(&self) -> Result<(), DomainError> {
        if self.live_sum() != self.directories_total {
            return Err(DomainError::invariant(format!(
                "campaign run {} counters sum to {} but total is {}",
                self.id,
                self.live_sum(),
                self.directories_total
            )));
        }
        Ok(())
    }
}
