//! Account Watcher
//!
//! Notices account or network changes made in the wallet extension and
//! reconciles local state. Push notifications are used when the provider
//! delivers them; otherwise a polling heartbeat runs.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;

use crate::campaigns::ChainCampaignRepository;
use crate::donations::DonationLedger;
use crate::error::ClientResult;
use crate::provider::{first_account, ProviderEvent, ProviderEventKind, ProviderListener, SubscriptionId};
use crate::runtime::{Spawner, Timer};
use crate::wallet::{WalletConnectionManager, WatchHandle};

/// `(chain id, first granted account)` as last seen by a poll
type Observation = (String, Option<String>);

struct Inner {
    wallet: WalletConnectionManager,
    campaigns: ChainCampaignRepository,
    donations: DonationLedger,
    timer: Rc<dyn Timer>,
    spawner: Spawner,
    interval: Duration,
    /// A poll or reconcile is running
    ticking: Cell<bool>,
    /// A push reconcile is spawned but has not started
    queued: Cell<bool>,
    /// A push event arrived while a reconcile was running
    dirty: Cell<bool>,
    last_seen: RefCell<Option<Observation>>,
    alive: RefCell<Option<Rc<Cell<bool>>>>,
}

#[derive(Clone)]
pub struct AccountWatcher {
    inner: Rc<Inner>,
}

struct TickGuard<'a>(&'a Cell<bool>);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl AccountWatcher {
    pub fn new(
        wallet: WalletConnectionManager,
        campaigns: ChainCampaignRepository,
        donations: DonationLedger,
        timer: Rc<dyn Timer>,
        spawner: Spawner,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                wallet,
                campaigns,
                donations,
                timer,
                spawner,
                interval,
                ticking: Cell::new(false),
                queued: Cell::new(false),
                dirty: Cell::new(false),
                last_seen: RefCell::new(None),
                alive: RefCell::new(None),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.alive.borrow().as_ref().map_or(false, |alive| alive.get())
    }

    /// Start watching, replacing any previous watch
    pub fn start(&self) {
        let alive = Rc::new(Cell::new(true));
        *self.inner.last_seen.borrow_mut() = None;

        let provider = self.inner.wallet.provider();
        let listener: ProviderListener = {
            let watcher = Rc::downgrade(&self.inner);
            let alive = alive.clone();
            Rc::new(move |event: ProviderEvent| {
                let Some(inner) = watcher.upgrade() else {
                    return;
                };
                if !alive.get() {
                    return;
                }
                log::info!("[WATCHER] Provider event: {:?}", event);
                if inner.queued.replace(true) {
                    log::debug!("[WATCHER] Reconcile already queued");
                    return;
                }
                let spawn = inner.spawner.clone();
                let watcher = AccountWatcher { inner };
                spawn(async move { watcher.pushed().await }.boxed_local());
            })
        };
        let subscriptions: Vec<SubscriptionId> = [ProviderEventKind::AccountsChanged, ProviderEventKind::ChainChanged]
            .into_iter()
            .filter_map(|kind| provider.subscribe(kind, listener.clone()))
            .collect();

        if subscriptions.is_empty() {
            log::info!("[WATCHER] Push events unsupported, polling every {:?}", self.inner.interval);
            let watcher = self.clone();
            let alive = alive.clone();
            (self.inner.spawner)(
                async move {
                    while alive.get() {
                        watcher.tick().await;
                        watcher.inner.timer.sleep(watcher.inner.interval).await;
                    }
                    log::debug!("[WATCHER] Polling stopped");
                }
                .boxed_local(),
            );
        } else {
            log::info!("[WATCHER] Subscribed to {} provider events", subscriptions.len());
        }

        *self.inner.alive.borrow_mut() = Some(alive.clone());
        self.inner.wallet.register_watch(WatchHandle::new(move || {
            alive.set(false);
            for id in subscriptions {
                provider.unsubscribe(id);
            }
        }));
    }

    pub fn stop(&self) {
        self.inner.wallet.cancel_watch();
    }

    /// One poll. Returns true when a change was seen and reconciled.
    /// A tick that starts while another is running is skipped.
    pub async fn tick(&self) -> bool {
        if self.inner.ticking.replace(true) {
            log::debug!("[WATCHER] Previous tick still running, skipping");
            return false;
        }
        let _guard = TickGuard(&self.inner.ticking);

        let Some(observed) = self.observe().await else {
            return false;
        };
        let previous = self.inner.last_seen.borrow_mut().replace(observed.clone());
        match previous {
            Some(previous) if previous != observed => {
                log::info!("[WATCHER] Wallet changed from {:?} to {:?}", previous, observed);
                if let Err(e) = self.reconcile().await {
                    log::warn!("[WATCHER] Reconcile failed: {}", e);
                }
                true
            }
            _ => false,
        }
    }

    /// Reconcile for push events, sharing the guard with `tick`. Events
    /// that land while it runs trigger exactly one more pass.
    async fn pushed(&self) {
        self.inner.queued.set(false);
        if self.inner.ticking.replace(true) {
            log::debug!("[WATCHER] Reconcile running, rerunning after it");
            self.inner.dirty.set(true);
            return;
        }
        let _guard = TickGuard(&self.inner.ticking);
        loop {
            self.inner.dirty.set(false);
            if let Err(e) = self.reconcile().await {
                log::warn!("[WATCHER] Reconcile failed: {}", e);
            }
            if !self.inner.dirty.get() {
                break;
            }
        }
    }

    /// Drop cached state and reload it for whatever account is granted now
    pub async fn reconcile(&self) -> ClientResult<()> {
        self.inner.wallet.reset();
        self.inner.donations.clear();
        if self.inner.wallet.check_connection().await?.is_some() {
            self.inner.campaigns.load_all().await?;
        }
        Ok(())
    }

    async fn observe(&self) -> Option<Observation> {
        let provider = self.inner.wallet.provider();
        let chain = match self.inner.wallet.chain_id().await {
            Ok(chain) => chain.to_lowercase(),
            Err(e) => {
                log::debug!("[WATCHER] Reading chain id failed: {}", e);
                return None;
            }
        };
        let account = if self.inner.wallet.is_explicitly_disconnected() {
            None
        } else {
            match provider.request("eth_accounts", json!([])).await {
                Ok(accounts) => first_account(&accounts).map(|a| a.to_lowercase()),
                Err(e) => {
                    log::debug!("[WATCHER] Reading accounts failed: {}", e.message);
                    return None;
                }
            }
        };
        Some((chain, account))
    }
}
