//! Application Context
//!
//! The chain services are built once at startup and shared via the Leptos
//! Context API, alongside the reactive store they feed.

use std::rc::Rc;

use leptos::prelude::*;
use leptos::task::spawn_local;
use reactive_stores::Store;

use crate::campaigns::ChainCampaignRepository;
use crate::config::ChainConfig;
use crate::donations::DonationLedger;
use crate::error::ClientResult;
use crate::events::{DonationEvent, WalletEvent};
use crate::ledger::{LedgerClient, ProviderLedger};
use crate::mutations::MutationCoordinator;
use crate::provider::{BrowserProvider, WalletProvider};
use crate::runtime::{leptos_spawner, GlooTimer, Spawner, Timer};
use crate::storage::{FlagStore, LocalStorageFlags};
use crate::store::{
    store_apply_wallet_event, store_clear_donations, store_report_error, store_set_campaigns,
    store_set_donations, AppStore, ChainState,
};
use crate::wallet::WalletConnectionManager;
use crate::watcher::AccountWatcher;

/// Every chain-facing service, wired together
#[derive(Clone)]
pub struct ChainServices {
    pub config: ChainConfig,
    pub wallet: WalletConnectionManager,
    pub campaigns: ChainCampaignRepository,
    pub donations: DonationLedger,
    pub mutations: MutationCoordinator,
    pub watcher: AccountWatcher,
}

impl ChainServices {
    pub fn new(
        config: ChainConfig,
        provider: Rc<dyn WalletProvider>,
        ledger: Rc<dyn LedgerClient>,
        flags: Rc<dyn FlagStore>,
        timer: Rc<dyn Timer>,
        spawner: Spawner,
    ) -> Self {
        let wallet = WalletConnectionManager::new(provider, flags, timer.clone(), config.wallet_settings());
        let campaigns = ChainCampaignRepository::new(ledger.clone(), wallet.clone(), timer.clone(), config.retry_policy());
        let donations = DonationLedger::new(ledger.clone(), wallet.clone());
        let mutations = MutationCoordinator::new(ledger, wallet.clone(), campaigns.clone(), donations.clone());
        let watcher = AccountWatcher::new(
            wallet.clone(),
            campaigns.clone(),
            donations.clone(),
            timer,
            spawner,
            config.poll_interval(),
        );

        // A fresh connection starts the watch; disconnect() cancels it
        let on_connect = watcher.clone();
        wallet.subscribe(move |event| {
            if matches!(event, WalletEvent::Connected(_)) && !on_connect.is_active() {
                on_connect.start();
            }
        });

        Self {
            config,
            wallet,
            campaigns,
            donations,
            mutations,
            watcher,
        }
    }

    /// Services backed by the injected wallet and browser storage
    pub fn browser(config: ChainConfig) -> Self {
        let provider: Rc<dyn WalletProvider> = Rc::new(BrowserProvider::new());
        let timer: Rc<dyn Timer> = Rc::new(GlooTimer);
        let ledger = Rc::new(ProviderLedger::new(
            provider.clone(),
            timer.clone(),
            config.contract_address.clone(),
            config.receipt_policy(),
        ));
        Self::new(config, provider, ledger, Rc::new(LocalStorageFlags), timer, leptos_spawner())
    }

    /// Startup: silent reconnect and first load, unless the user opted out
    pub async fn start(&self) -> ClientResult<()> {
        match self.wallet.check_connection().await? {
            Some(address) => {
                log::info!("[APP] Restored connection for {}", address);
                self.campaigns.load_all().await?;
            }
            None => log::info!("[APP] No connected account"),
        }
        Ok(())
    }
}

/// Provide services and store to all children, forward service events into
/// the store and kick off startup. Call inside the root component.
pub fn provide_chain_services(services: ChainServices) -> AppStore {
    let store = Store::new(ChainState::default());
    provide_context(store);

    services.wallet.subscribe(move |event| store_apply_wallet_event(&store, event));

    let campaigns = services.campaigns.clone();
    services
        .campaigns
        .subscribe(move |_| store_set_campaigns(&store, campaigns.campaigns()));

    let donations = services.donations.clone();
    services.donations.subscribe(move |event| match event {
        DonationEvent::Loaded(id) => store_set_donations(&store, *id, donations.donations(*id)),
        DonationEvent::Cleared => store_clear_donations(&store),
    });

    provide_context(StoredValue::new_local(services.clone()));

    spawn_local(async move {
        if let Err(e) = services.start().await {
            store_report_error(&store, &e);
        }
    });

    store
}

/// Get the chain services from context
pub fn use_chain_services() -> ChainServices {
    expect_context::<StoredValue<ChainServices, LocalStorage>>().get_value()
}

/// Panic hook, logger and services for the browser build
pub fn bootstrap(config: ChainConfig) -> AppStore {
    console_error_panic_hook::set_once();
    if let Err(e) = console_logger::init("crowdfund", log::LevelFilter::Info) {
        web_sys::console::warn_1(&format!("[APP] Logger init failed: {}", e).into());
    }
    log::info!("[APP] Using contract {} on {}", config.contract_address, config.network_name);
    provide_chain_services(ChainServices::browser(config))
}
