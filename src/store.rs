//! Chain State Store
//!
//! Uses Leptos reactive_stores for fine-grained reactivity. The services
//! own the data; this store is a read model fed by their change events.

use std::collections::HashMap;

use leptos::prelude::*;
use reactive_stores::Store;

use crate::error::{ClientError, Notification};
use crate::events::WalletEvent;
use crate::models::{Campaign, Donation};

/// What the UI renders, with field-level reactivity
#[derive(Clone, Debug, Default, Store)]
pub struct ChainState {
    /// Connected account
    pub address: Option<String>,
    /// A permission prompt is open
    pub connecting: bool,
    pub campaigns: Vec<Campaign>,
    /// Donation history per campaign id, newest first
    pub donations: HashMap<u64, Vec<Donation>>,
    /// Last error, rendered as a toast
    pub last_error: Option<Notification>,
}

/// Type alias for the store
pub type AppStore = Store<ChainState>;

/// Get the chain store from context
pub fn use_chain_store() -> AppStore {
    expect_context::<AppStore>()
}

// ========================
// Store Helper Functions
// ========================

pub fn store_apply_wallet_event(store: &AppStore, event: &WalletEvent) {
    match event {
        WalletEvent::Connecting => *store.connecting().write() = true,
        WalletEvent::Connected(address) => {
            *store.connecting().write() = false;
            *store.address().write() = Some(address.clone());
        }
        WalletEvent::Disconnected => {
            *store.connecting().write() = false;
            *store.address().write() = None;
        }
    }
}

/// Replace the campaign list with a repository snapshot
pub fn store_set_campaigns(store: &AppStore, campaigns: Vec<Campaign>) {
    *store.campaigns().write() = campaigns;
}

pub fn store_set_donations(store: &AppStore, campaign_id: u64, donations: Vec<Donation>) {
    store.donations().write().insert(campaign_id, donations);
}

pub fn store_clear_donations(store: &AppStore) {
    store.donations().write().clear();
}

/// Show the user-facing rendering of an error
pub fn store_report_error(store: &AppStore, err: &ClientError) {
    log::warn!("[STORE] {}", err);
    *store.last_error().write() = Some(err.notification());
}

pub fn store_clear_error(store: &AppStore) {
    *store.last_error().write() = None;
}
