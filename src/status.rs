//! Campaign Status Resolver
//!
//! Status is always derived from the ledger fields, never stored on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }
}

/// Derive the lifecycle state of a campaign at `now`.
///
/// `completed` wins over everything. A campaign past its deadline that did
/// not reach its goal has failed. Anything else is still active.
pub fn resolve(
    completed: bool,
    deadline: DateTime<Utc>,
    pledged: u128,
    goal: u128,
    now: DateTime<Utc>,
) -> CampaignStatus {
    if completed {
        CampaignStatus::Completed
    } else if now > deadline && pledged < goal {
        CampaignStatus::Failed
    } else {
        CampaignStatus::Active
    }
}

/// `resolve` against the wall clock
pub fn resolve_now(completed: bool, deadline: DateTime<Utc>, pledged: u128, goal: u128) -> CampaignStatus {
    resolve(completed, deadline, pledged, goal, Utc::now())
}
