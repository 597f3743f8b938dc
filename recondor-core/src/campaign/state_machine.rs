//! Static campaign lifecycle transition table.
//!
//! Pause is cooperative: `pausing` blocks new claims for the campaign and the
//! worker that finishes its last running job flips it to `paused`.

use recondor_model::CampaignStatus;

use crate::{CoreError, Result};

/// The states reachable from `from` in a single transition.
pub fn valid_transitions(from: CampaignStatus) -> &'static [CampaignStatus] {
    use CampaignStatus::*;
    match from {
        Pending => &[Queued, Cancelled],
        Queued => &[Running, Pausing, Cancelled],
        Running => &[Pausing, Completed, Failed, Cancelled],
        Pausing => &[Paused, Cancelled],
        Paused => &[Running, Cancelled],
        Completed | Failed | Cancelled => &[Archived],
        Archived => &[],
    }
}

pub fn can_transition(from: CampaignStatus, to: CampaignStatus) -> bool {
    valid_transitions(from).contains(&to)
}

pub fn validate_transition(from: CampaignStatus, to: CampaignStatus) -> Result<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}

/// Terminal states stop all processing; only archival remains.
pub fn is_terminal(status: CampaignStatus) -> bool {
    matches!(
        status,
        CampaignStatus::Completed
            | CampaignStatus::Failed
            | CampaignStatus::Cancelled
            | CampaignStatus::Archived
    )
}
