//! Crowdfunding Client
//!
//! On-chain state synchronization for the crowdfunding frontend: the wallet
//! connection, the campaign and donation caches, and the mutation flow that
//! keeps them fresh after writes.

pub mod abi;
pub mod campaigns;
pub mod config;
pub mod context;
pub mod donations;
pub mod error;
pub mod events;
pub mod ledger;
pub mod models;
pub mod mutations;
pub mod provider;
pub mod runtime;
pub mod status;
pub mod storage;
pub mod store;
pub mod units;
pub mod wallet;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use campaigns::{ChainCampaignRepository, RetryPolicy};
pub use config::{ChainConfig, ConfigError};
pub use context::{bootstrap, provide_chain_services, use_chain_services, ChainServices};
pub use donations::DonationLedger;
pub use error::{ClientError, ClientResult, Notification, ProviderError, Remediation};
pub use models::{Campaign, CampaignFilter, CampaignInput, Donation, StatusFilter};
pub use mutations::MutationCoordinator;
pub use status::CampaignStatus;
pub use store::{use_chain_store, AppStore, ChainState};
pub use wallet::{ConnectionState, WalletConnectionManager};
pub use watcher::AccountWatcher;
