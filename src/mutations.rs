//! Mutation Coordinator
//!
//! Every state-changing action goes through here: validate, make sure the
//! wallet is connected and on the right network, write, then refresh the
//! affected caches before returning.

use std::cell::Cell;
use std::rc::Rc;

use futures::future::join;

use crate::campaigns::ChainCampaignRepository;
use crate::donations::DonationLedger;
use crate::error::{classify, ClientError, ClientResult, ProviderError};
use crate::ledger::LedgerClient;
use crate::models::{validate_amount, CampaignInput};
use crate::wallet::WalletConnectionManager;

struct Inner {
    ledger: Rc<dyn LedgerClient>,
    wallet: WalletConnectionManager,
    campaigns: ChainCampaignRepository,
    donations: DonationLedger,
    in_flight: Cell<u32>,
}

#[derive(Clone)]
pub struct MutationCoordinator {
    inner: Rc<Inner>,
}

/// Counts a mutation as in flight until dropped
struct BusyGuard(Rc<Inner>);

impl BusyGuard {
    fn new(inner: &Rc<Inner>) -> Self {
        inner.in_flight.set(inner.in_flight.get() + 1);
        Self(inner.clone())
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.in_flight.set(self.0.in_flight.get().saturating_sub(1));
    }
}

impl MutationCoordinator {
    pub fn new(
        ledger: Rc<dyn LedgerClient>,
        wallet: WalletConnectionManager,
        campaigns: ChainCampaignRepository,
        donations: DonationLedger,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                ledger,
                wallet,
                campaigns,
                donations,
                in_flight: Cell::new(0),
            }),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.in_flight.get() > 0
    }

    // ========================
    // Writes
    // ========================

    /// Create a campaign; returns its id once it is readable and cached
    pub async fn create_campaign(&self, input: &CampaignInput) -> ClientResult<u64> {
        let call = input.validate()?;
        let _busy = BusyGuard::new(&self.inner);
        let from = self.prepare().await?;

        let id = self
            .inner
            .ledger
            .create_campaign(&from, &call)
            .await
            .map_err(|e| write_failed("createCampaign", e))?;
        log::info!("[MUTATIONS] Created campaign {}", id);

        self.refresh_campaign(id).await;
        Ok(id)
    }

    pub async fn donate(&self, campaign_id: u64, amount: &str, message: Option<&str>) -> ClientResult<()> {
        let value = validate_amount(amount)?;
        let message = message.map(str::trim).filter(|m| !m.is_empty());
        let _busy = BusyGuard::new(&self.inner);
        let from = self.prepare().await?;

        if let Some(campaign) = self.inner.campaigns.campaign(campaign_id) {
            if campaign.is_owned_by(&from) {
                return Err(ClientError::Validation("You cannot donate to your own campaign".to_string()));
            }
        }

        self.inner
            .ledger
            .donate(&from, campaign_id, value, message)
            .await
            .map_err(|e| write_failed("donate", e))?;
        log::info!("[MUTATIONS] Donated {} to campaign {}", amount, campaign_id);

        join(self.refresh_campaign(campaign_id), self.refresh_donations(campaign_id)).await;
        Ok(())
    }

    pub async fn complete_campaign(&self, campaign_id: u64) -> ClientResult<()> {
        let _busy = BusyGuard::new(&self.inner);
        let from = self.prepare().await?;

        self.inner
            .ledger
            .complete_campaign(&from, campaign_id)
            .await
            .map_err(|e| write_failed("completeCampaign", e))?;
        log::info!("[MUTATIONS] Completed campaign {}", campaign_id);

        self.refresh_campaign(campaign_id).await;
        Ok(())
    }

    pub async fn withdraw_funds(&self, campaign_id: u64) -> ClientResult<()> {
        let _busy = BusyGuard::new(&self.inner);
        let from = self.prepare().await?;

        self.inner
            .ledger
            .withdraw_funds(&from, campaign_id)
            .await
            .map_err(|e| write_failed("withdrawFunds", e))?;
        log::info!("[MUTATIONS] Withdrew funds of campaign {}", campaign_id);

        self.refresh_campaign(campaign_id).await;
        Ok(())
    }

    /// Read-only check whether the connected account may withdraw now
    pub async fn can_withdraw(&self, campaign_id: u64) -> ClientResult<bool> {
        let from = self.inner.wallet.ensure_connected().await?;
        self.inner
            .ledger
            .can_withdraw(&from, campaign_id)
            .await
            .map_err(|e| classify(&e))
    }

    // ========================
    // Helpers
    // ========================

    async fn prepare(&self) -> ClientResult<String> {
        let from = self.inner.wallet.ensure_connected().await?;
        self.inner.wallet.ensure_network().await?;
        Ok(from)
    }

    // The write is confirmed at this point, so a failed read is only logged
    async fn refresh_campaign(&self, id: u64) {
        if let Err(e) = self.inner.campaigns.load_by_id(id).await {
            log::warn!("[MUTATIONS] Refreshing campaign {} failed: {}", id, e);
        }
    }

    async fn refresh_donations(&self, id: u64) {
        if let Err(e) = self.inner.donations.load(id).await {
            log::warn!("[MUTATIONS] Refreshing donations of {} failed: {}", id, e);
        }
    }
}

fn write_failed(operation: &str, err: ProviderError) -> ClientError {
    let classified = classify(&err);
    log::error!("[MUTATIONS] {} failed: {} ({})", operation, classified, err.message);
    classified
}
