//! Campaign counter bookkeeping shared by the store implementations.
//!
//! Every submission transition that belongs to a campaign run produces one
//! [`CounterShift`], applied in the same transaction as the row update.

use std::collections::BTreeMap;

use dirsubmit_core::{CampaignCounter, CampaignRunId, Submission, SubmissionStatus};

/// Move `count` submissions of `campaign` from one counter to another.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CounterShift {
    pub campaign: CampaignRunId,
    pub from: CampaignCounter,
    pub to: CampaignCounter,
    pub count: i64,
}

impl CounterShift {
    /// Shift for a single submission moving between statuses.
    ///
    /// `None` when the submission has no campaign or both statuses map to
    /// the same counter.
    pub fn for_transition(
        campaign: Option<CampaignRunId>,
        from: SubmissionStatus,
        to: SubmissionStatus,
    ) -> Option<Self> {
        let campaign = campaign?;
        let (from, to) = (CampaignCounter::for_status(from), CampaignCounter::for_status(to));
        (from != to).then_some(Self {
            campaign,
            from,
            to,
            count: 1,
        })
    }
}

/// Group a claimed batch into one `queued -> in_progress` shift per campaign.
pub fn claim_shifts(claimed: &[Submission]) -> Vec<CounterShift> {
    grouped_shifts(claimed, CampaignCounter::Queued, CampaignCounter::InProgress)
}

/// Group released claims into one `in_progress -> queued` shift per campaign.
pub fn release_shifts(released: &[Submission]) -> Vec<CounterShift> {
    grouped_shifts(released, CampaignCounter::InProgress, CampaignCounter::Queued)
}

fn grouped_shifts(
    submissions: &[Submission],
    from: CampaignCounter,
    to: CampaignCounter,
) -> Vec<CounterShift> {
    let mut per_campaign: BTreeMap<CampaignRunId, i64> = BTreeMap::new();
    for campaign in submissions.iter().filter_map(|s| s.campaign_run_id) {
        *per_campaign.entry(campaign).or_default() += 1;
    }

    per_campaign
        .into_iter()
        .map(|(campaign, count)| CounterShift {
            campaign,
            from,
            to,
            count,
        })
        .collect()
}

/// Column of `campaign_runs` holding a counter.
pub fn counter_column(counter: CampaignCounter) -> &'static str {
    match counter {
        CampaignCounter::Queued => "directories_queued",
        CampaignCounter::InProgress => "directories_in_progress",
        CampaignCounter::ActionNeeded => "directories_action_needed",
        CampaignCounter::Submitted => "directories_submitted",
        CampaignCounter::Failed => "directories_failed",
    }
}
