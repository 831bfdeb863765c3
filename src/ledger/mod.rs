//! Ledger Interface
//!
//! Read/write surface of the remote crowdfunding contract, in base units.
//! All methods return raw `ProviderError`s; callers classify them.

mod rpc;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::{CreateCampaignCall, RawCampaign, RawLog};

pub use rpc::{parse_quantity, to_quantity, ProviderLedger, ReceiptPolicy};

pub type LedgerResult<T> = Result<T, ProviderError>;

#[async_trait(?Send)]
pub trait LedgerClient {
    /// Total number of campaigns ever created
    async fn campaign_count(&self) -> LedgerResult<u64>;

    /// Single record; `None` while the node does not serve it yet
    async fn campaign(&self, id: u64) -> LedgerResult<Option<RawCampaign>>;

    /// Records `0..count`, one result per record so a bad one can be skipped
    async fn campaigns(&self, count: u64) -> LedgerResult<Vec<LedgerResult<RawCampaign>>>;

    /// DonationReceived logs for one campaign id, with block timestamps
    async fn donation_logs(&self, campaign_id: u64) -> LedgerResult<Vec<RawLog>>;

    /// Confirmed createCampaign; returns the new campaign id
    async fn create_campaign(&self, from: &str, call: &CreateCampaignCall) -> LedgerResult<u64>;

    async fn donate(&self, from: &str, campaign_id: u64, amount: u128, message: Option<&str>) -> LedgerResult<()>;

    async fn complete_campaign(&self, from: &str, campaign_id: u64) -> LedgerResult<()>;

    async fn withdraw_funds(&self, from: &str, campaign_id: u64) -> LedgerResult<()>;

    async fn can_withdraw(&self, from: &str, campaign_id: u64) -> LedgerResult<bool>;
}
