//! Wallet Provider Interface
//!
//! The injected wallet handle (EIP-1193 style). Services only talk to the
//! extension through this trait, so tests can supply a fake.

mod browser;

use std::rc::Rc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;

pub use browser::BrowserProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    AccountsChanged,
    ChainChanged,
    Disconnect,
}

impl ProviderEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderEventKind::AccountsChanged => "accountsChanged",
            ProviderEventKind::ChainChanged => "chainChanged",
            ProviderEventKind::Disconnect => "disconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub type ProviderListener = Rc<dyn Fn(ProviderEvent)>;

#[async_trait(?Send)]
pub trait WalletProvider {
    /// Whether a wallet extension is present at all
    fn is_installed(&self) -> bool;

    /// Raw JSON-RPC request through the wallet
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;

    /// Push notifications; `None` when the provider cannot deliver them
    fn subscribe(&self, kind: ProviderEventKind, listener: ProviderListener) -> Option<SubscriptionId>;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// First entry of an `eth_accounts` / `eth_requestAccounts` result
pub fn first_account(value: &Value) -> Option<String> {
    value
        .as_array()
        .and_then(|accounts| accounts.first())
        .and_then(|a| a.as_str())
        .map(|a| a.to_string())
}
