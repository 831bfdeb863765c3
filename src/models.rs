//! Client Models
//!
//! Data structures matching the crowdfunding contract records.
//! `Raw*` types carry base units as read from the ledger; the display
//! types carry human-decimal strings.

use std::convert::Infallible;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ClientError, ClientResult};
use crate::status::{self, CampaignStatus};
use crate::units::{format_units, parse_units};

// ========================
// Ledger Records
// ========================

/// Campaign tuple as stored by the contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCampaign {
    pub owner: String,
    pub title: String,
    pub description: String,
    pub image: String,
    pub goal: u128,
    pub balance: u128,
    /// Unix seconds
    pub deadline: u64,
    /// Unix seconds, 0 when the contract does not record it
    pub start_time: u64,
    pub completed: bool,
    pub auto_complete: bool,
}

/// Undecoded log entry returned by a log query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<u64>,
    pub block_timestamp: Option<u64>,
    pub transaction_hash: Option<String>,
}

/// Arguments of the createCampaign write, in base units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCampaignCall {
    pub title: String,
    pub description: String,
    pub goal: u128,
    pub duration_days: u64,
    pub image: String,
    pub auto_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("campaign goal is zero")]
    ZeroGoal,
    #[error("timestamp {0} out of range")]
    BadTimestamp(u64),
}

pub fn timestamp(secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
}

// ========================
// Display Entities
// ========================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: u64,
    pub owner: String,
    pub title: String,
    pub description: String,
    pub image: String,
    pub goal: String,
    pub pledged: String,
    /// Base units behind `goal` and `pledged`
    pub goal_units: u128,
    pub pledged_units: u128,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub auto_complete: bool,
    pub completed: bool,
}

impl Campaign {
    /// Convert a ledger record at the unit boundary
    pub fn from_raw(id: u64, raw: &RawCampaign) -> Result<Self, RecordError> {
        if raw.goal == 0 {
            return Err(RecordError::ZeroGoal);
        }
        let end_at = timestamp(raw.deadline).ok_or(RecordError::BadTimestamp(raw.deadline))?;
        let start_at = timestamp(raw.start_time).ok_or(RecordError::BadTimestamp(raw.start_time))?;

        Ok(Self {
            id,
            owner: raw.owner.clone(),
            title: raw.title.clone(),
            description: raw.description.clone(),
            image: raw.image.clone(),
            goal: format_units(raw.goal),
            pledged: format_units(raw.balance),
            goal_units: raw.goal,
            pledged_units: raw.balance,
            start_at,
            end_at,
            auto_complete: raw.auto_complete,
            completed: raw.completed,
        })
    }

    /// Status at `now`, derived from the ledger fields
    pub fn status_at(&self, now: DateTime<Utc>) -> CampaignStatus {
        status::resolve(self.completed, self.end_at, self.pledged_units, self.goal_units, now)
    }

    pub fn status(&self) -> CampaignStatus {
        self.status_at(Utc::now())
    }

    pub fn is_owned_by(&self, address: &str) -> bool {
        self.owner.eq_ignore_ascii_case(address)
    }

    /// Owners cannot donate to their own campaign, and only active ones take funds
    pub fn accepts_donations_from(&self, address: &str) -> bool {
        self.status() == CampaignStatus::Active && !self.is_owned_by(address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donation {
    pub donor: String,
    pub amount: String,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub block_number: Option<u64>,
}

// ========================
// Inputs and Filters
// ========================

/// Form data for a new campaign (display units)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignInput {
    pub title: String,
    pub description: String,
    pub image: String,
    pub goal: String,
    pub duration_in_days: u64,
    pub auto_complete: bool,
}

impl CampaignInput {
    /// Check the form and convert it to ledger units
    pub fn validate(&self) -> ClientResult<CreateCampaignCall> {
        if self.title.trim().is_empty() {
            return Err(ClientError::Validation("Title is required".to_string()));
        }
        if self.description.trim().is_empty() {
            return Err(ClientError::Validation("Description is required".to_string()));
        }
        let goal = parse_units(&self.goal)?;
        if goal == 0 {
            return Err(ClientError::Validation("Goal must be a positive number".to_string()));
        }
        if self.duration_in_days == 0 {
            return Err(ClientError::Validation("Duration must be a positive number".to_string()));
        }

        Ok(CreateCampaignCall {
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            goal,
            duration_days: self.duration_in_days,
            image: self.image.trim().to_string(),
            auto_complete: self.auto_complete,
        })
    }
}

/// Check a donation amount and convert it to ledger units
pub fn validate_amount(amount: &str) -> ClientResult<u128> {
    let value = parse_units(amount)?;
    if value == 0 {
        return Err(ClientError::Validation("Amount must be greater than 0".to_string()));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
    Failed,
}

impl StatusFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::All => "all",
            StatusFilter::Active => "active",
            StatusFilter::Completed => "completed",
            StatusFilter::Failed => "failed",
        }
    }

    pub fn matches(&self, status: CampaignStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Active => status == CampaignStatus::Active,
            StatusFilter::Completed => status == CampaignStatus::Completed,
            StatusFilter::Failed => status == CampaignStatus::Failed,
        }
    }
}

/// Unknown names select everything
impl FromStr for StatusFilter {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "active" => StatusFilter::Active,
            "completed" => StatusFilter::Completed,
            "failed" => StatusFilter::Failed,
            _ => StatusFilter::All,
        })
    }
}

/// Derived view over the campaign cache
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CampaignFilter {
    pub status: StatusFilter,
    /// Only campaigns owned by this address
    pub owner: Option<String>,
}

impl CampaignFilter {
    pub fn matches(&self, campaign: &Campaign) -> bool {
        self.matches_at(campaign, Utc::now())
    }

    pub fn matches_at(&self, campaign: &Campaign, now: DateTime<Utc>) -> bool {
        self.status.matches(campaign.status_at(now))
            && self.owner.as_deref().map_or(true, |o| campaign.is_owned_by(o))
    }
}
