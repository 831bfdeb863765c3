//! Wallet Connection
//!
//! Owns the single connection to the user's account. Concurrent `connect`
//! calls share one in-flight permission request, and an explicit disconnect
//! is persisted so a reload does not reconnect silently.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures::future::{select, Either, LocalBoxFuture, Shared};
use futures::FutureExt;
use serde_json::{json, Value};

use crate::error::{classify, ClientError, ClientResult};
use crate::events::{ListenerId, Listeners, WalletEvent};
use crate::provider::{first_account, WalletProvider};
use crate::runtime::Timer;
use crate::storage::{FlagStore, EXPLICIT_DISCONNECT_KEY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSettings {
    /// Force-clears a stalled connect attempt
    pub connect_timeout: Duration,
    /// Network the wallet must be on for writes; `None` disables the check
    pub expected_chain_id: Option<String>,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            expected_chain_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(String),
}

/// Cancels a background watch registered with the wallet
pub struct WatchHandle {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl WatchHandle {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

type PendingConnect = Shared<LocalBoxFuture<'static, ClientResult<String>>>;

struct Inner {
    provider: Rc<dyn WalletProvider>,
    flags: Rc<dyn FlagStore>,
    timer: Rc<dyn Timer>,
    settings: WalletSettings,
    address: RefCell<Option<String>>,
    pending: RefCell<Option<PendingConnect>>,
    /// Bumped on disconnect/reset; results started under an older value are stale
    generation: Cell<u64>,
    watch: RefCell<Option<WatchHandle>>,
    listeners: Listeners<WalletEvent>,
}

#[derive(Clone)]
pub struct WalletConnectionManager {
    inner: Rc<Inner>,
}

impl WalletConnectionManager {
    pub fn new(
        provider: Rc<dyn WalletProvider>,
        flags: Rc<dyn FlagStore>,
        timer: Rc<dyn Timer>,
        settings: WalletSettings,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                provider,
                flags,
                timer,
                settings,
                address: RefCell::new(None),
                pending: RefCell::new(None),
                generation: Cell::new(0),
                watch: RefCell::new(None),
                listeners: Listeners::new(),
            }),
        }
    }

    // ========================
    // Snapshots
    // ========================

    pub fn state(&self) -> ConnectionState {
        if let Some(address) = self.address() {
            ConnectionState::Connected(address)
        } else if self.inner.pending.borrow().is_some() {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn address(&self) -> Option<String> {
        self.inner.address.borrow().clone()
    }

    pub fn is_explicitly_disconnected(&self) -> bool {
        self.inner.flags.get(EXPLICIT_DISCONNECT_KEY)
    }

    pub fn provider(&self) -> Rc<dyn WalletProvider> {
        self.inner.provider.clone()
    }

    /// Connected address or `NotConnected`, for reads that must not prompt
    pub fn require_address(&self) -> ClientResult<String> {
        self.address().ok_or(ClientError::NotConnected)
    }

    pub fn subscribe(&self, callback: impl Fn(&WalletEvent) + 'static) -> ListenerId {
        self.inner.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner.listeners.unsubscribe(id);
    }

    // ========================
    // Connection
    // ========================

    /// Interactive connect. Joins the in-flight attempt if there is one.
    pub async fn connect(&self) -> ClientResult<String> {
        self.inner.flags.set(EXPLICIT_DISCONNECT_KEY, false);
        let generation = self.inner.generation.get();

        let existing = self.inner.pending.borrow().clone();
        let pending = match existing {
            Some(pending) => {
                log::debug!("[WALLET] Joining in-flight connect");
                pending
            }
            None => {
                if !self.inner.provider.is_installed() {
                    return Err(ClientError::MissingProvider);
                }
                log::info!("[WALLET] Requesting account access");
                let pending = request_accounts(
                    Rc::downgrade(&self.inner),
                    self.inner.provider.clone(),
                    self.inner.timer.clone(),
                    self.inner.settings.connect_timeout,
                )
                .boxed_local()
                .shared();
                *self.inner.pending.borrow_mut() = Some(pending.clone());
                self.inner.listeners.emit(&WalletEvent::Connecting);
                pending
            }
        };

        let result = pending.await;
        if let Ok(address) = &result {
            if self.inner.generation.get() == generation {
                self.set_address(Some(address.clone()));
            } else {
                log::info!("[WALLET] Disconnected while connecting, ignoring {}", address);
            }
        }
        result
    }

    /// Connected address, prompting only when there is none
    pub async fn ensure_connected(&self) -> ClientResult<String> {
        match self.address() {
            Some(address) => Ok(address),
            None => self.connect().await,
        }
    }

    /// Non-interactive check of already-granted accounts
    pub async fn check_connection(&self) -> ClientResult<Option<String>> {
        if self.is_explicitly_disconnected() {
            log::debug!("[WALLET] Explicitly disconnected, skipping account check");
            return Ok(None);
        }
        if !self.inner.provider.is_installed() {
            return Err(ClientError::MissingProvider);
        }

        let generation = self.inner.generation.get();
        let accounts = self
            .inner
            .provider
            .request("eth_accounts", json!([]))
            .await
            .map_err(|e| classify(&e))?;
        let account = first_account(&accounts);

        if self.inner.generation.get() == generation {
            self.set_address(account.clone());
        }
        Ok(account)
    }

    /// Drop the connection, stop watching and remember the user's intent
    pub fn disconnect(&self) {
        self.bump_generation();
        self.cancel_watch();
        self.inner.flags.set(EXPLICIT_DISCONNECT_KEY, true);
        self.inner.address.borrow_mut().take();
        log::info!("[WALLET] Disconnected");
        self.inner.listeners.emit(&WalletEvent::Disconnected);
    }

    /// Forget the address for reconciliation. Keeps the watch and the flag.
    pub fn reset(&self) {
        self.bump_generation();
        let previous = self.inner.address.borrow_mut().take();
        if previous.is_some() {
            self.inner.listeners.emit(&WalletEvent::Disconnected);
        }
    }

    /// Replace the background watch; the previous one is cancelled
    pub fn register_watch(&self, handle: WatchHandle) {
        let previous = self.inner.watch.borrow_mut().replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    pub fn cancel_watch(&self) {
        let watch = self.inner.watch.borrow_mut().take();
        if let Some(watch) = watch {
            watch.cancel();
        }
    }

    pub fn has_watch(&self) -> bool {
        self.inner.watch.borrow().is_some()
    }

    // ========================
    // Network
    // ========================

    pub async fn chain_id(&self) -> ClientResult<String> {
        let value = self
            .inner
            .provider
            .request("eth_chainId", json!([]))
            .await
            .map_err(|e| classify(&e))?;
        value
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ClientError::NetworkOrContract(format!("unexpected chain id {}", value)))
    }

    pub async fn switch_network(&self, chain_id: &str) -> ClientResult<()> {
        log::info!("[WALLET] Switching network to {}", chain_id);
        self.inner
            .provider
            .request("wallet_switchEthereumChain", json!([{ "chainId": chain_id }]))
            .await
            .map(|_: Value| ())
            .map_err(|e| classify(&e))
    }

    /// Fails with `WrongNetwork` when the wallet is not on the expected chain
    pub async fn ensure_network(&self) -> ClientResult<()> {
        let Some(expected) = self.inner.settings.expected_chain_id.as_deref() else {
            return Ok(());
        };
        let actual = self.chain_id().await?;
        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(ClientError::WrongNetwork {
                expected: expected.to_string(),
                actual,
            })
        }
    }

    fn bump_generation(&self) {
        self.inner.generation.set(self.inner.generation.get() + 1);
    }

    fn set_address(&self, address: Option<String>) {
        let changed = {
            let mut current = self.inner.address.borrow_mut();
            let changed = *current != address;
            *current = address.clone();
            changed
        };
        if !changed {
            return;
        }
        match address {
            Some(address) => {
                log::info!("[WALLET] Connected {}", address);
                self.inner.listeners.emit(&WalletEvent::Connected(address));
            }
            None => self.inner.listeners.emit(&WalletEvent::Disconnected),
        }
    }
}

/// The shared permission request. Clears the in-flight slot when it settles,
/// including on timeout.
async fn request_accounts(
    inner: Weak<Inner>,
    provider: Rc<dyn WalletProvider>,
    timer: Rc<dyn Timer>,
    timeout: Duration,
) -> ClientResult<String> {
    let request = provider.request("eth_requestAccounts", json!([]));
    let result = match select(request, timer.sleep(timeout)).await {
        Either::Left((Ok(accounts), _)) => first_account(&accounts)
            .ok_or_else(|| ClientError::NetworkOrContract("wallet returned no accounts".to_string())),
        Either::Left((Err(err), _)) => Err(classify(&err)),
        Either::Right(((), _)) => {
            log::warn!("[WALLET] Connect timed out after {:?}", timeout);
            Err(ClientError::NetworkOrContract(format!(
                "wallet connection timed out after {}s",
                timeout.as_secs()
            )))
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.pending.borrow_mut().take();
        if let Err(err) = &result {
            log::warn!("[WALLET] Connect failed: {}", err);
            if inner.address.borrow().is_none() {
                inner.listeners.emit(&WalletEvent::Disconnected);
            }
        }
    }
    result
}
