//! Campaign Repository
//!
//! Sole writer of the campaign cache. Reads go through the ledger client and
//! are converted to display units here; callers only get snapshots and
//! filtered views.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crate::abi;
use crate::error::{classify, ClientError, ClientResult};
use crate::events::{CampaignEvent, ListenerId, Listeners};
use crate::ledger::LedgerClient;
use crate::models::{Campaign, CampaignFilter, RawCampaign};
use crate::runtime::Timer;
use crate::wallet::WalletConnectionManager;

/// Retry schedule for reads that may hit the read-after-write gap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total read attempts
    pub retries: u32,
    /// Delay after attempt `n` is `n * backoff`
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

struct Inner {
    ledger: Rc<dyn LedgerClient>,
    wallet: WalletConnectionManager,
    timer: Rc<dyn Timer>,
    retry: RetryPolicy,
    cache: RefCell<Vec<Campaign>>,
    /// Bumped on every upsert
    revision: Cell<u64>,
    /// Revision of the latest upsert per id; a reload started before it
    /// keeps the upserted record
    upserted_at: RefCell<HashMap<u64, u64>>,
    listeners: Listeners<CampaignEvent>,
}

#[derive(Clone)]
pub struct ChainCampaignRepository {
    inner: Rc<Inner>,
}

impl ChainCampaignRepository {
    pub fn new(
        ledger: Rc<dyn LedgerClient>,
        wallet: WalletConnectionManager,
        timer: Rc<dyn Timer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                ledger,
                wallet,
                timer,
                retry,
                cache: RefCell::new(Vec::new()),
                revision: Cell::new(0),
                upserted_at: RefCell::new(HashMap::new()),
                listeners: Listeners::new(),
            }),
        }
    }

    // ========================
    // Loading
    // ========================

    /// Reload the whole campaign set. Malformed records are skipped, and
    /// records upserted while the reload was in flight survive it.
    pub async fn load_all(&self) -> ClientResult<Vec<Campaign>> {
        self.inner.wallet.require_address()?;
        let started = self.inner.revision.get();

        let count = self
            .inner
            .ledger
            .campaign_count()
            .await
            .map_err(|e| classify(&e))?;
        let campaigns = if count == 0 {
            Vec::new()
        } else {
            let records = self
                .inner
                .ledger
                .campaigns(count)
                .await
                .map_err(|e| classify(&e))?;
            records
                .into_iter()
                .enumerate()
                .filter_map(|(index, record)| {
                    let id = index as u64;
                    match record {
                        Ok(raw) => convert(id, &raw),
                        Err(e) => {
                            log::warn!("[CAMPAIGNS] Skipping campaign {}: {}", id, e.message);
                            None
                        }
                    }
                })
                .collect()
        };

        log::info!("[CAMPAIGNS] Loaded {} of {} campaigns", campaigns.len(), count);
        let campaigns = {
            let mut cache = self.inner.cache.borrow_mut();
            let merged = self.merge_newer(campaigns, &cache, started);
            *cache = merged.clone();
            merged
        };
        self.inner.listeners.emit(&CampaignEvent::Replaced);
        Ok(campaigns)
    }

    /// Keep cached records upserted after revision `started` over the snapshot
    fn merge_newer(&self, mut snapshot: Vec<Campaign>, cache: &[Campaign], started: u64) -> Vec<Campaign> {
        let upserted_at = self.inner.upserted_at.borrow();
        for campaign in cache {
            if upserted_at.get(&campaign.id).map_or(true, |&rev| rev <= started) {
                continue;
            }
            log::debug!("[CAMPAIGNS] Keeping campaign {} upserted during reload", campaign.id);
            match snapshot.iter_mut().find(|c| c.id == campaign.id) {
                Some(stale) => *stale = campaign.clone(),
                None => snapshot.push(campaign.clone()),
            }
        }
        snapshot.sort_by_key(|c| c.id);
        snapshot
    }

    /// `load_by_id_with` using the configured retry policy
    pub async fn load_by_id(&self, id: u64) -> ClientResult<Campaign> {
        let RetryPolicy { retries, backoff } = self.inner.retry;
        self.load_by_id_with(id, retries, backoff).await
    }

    /// Read one campaign, retrying while the node does not serve it yet.
    /// Upserts the cache on success.
    pub async fn load_by_id_with(&self, id: u64, retries: u32, backoff: Duration) -> ClientResult<Campaign> {
        self.inner.wallet.require_address()?;

        for attempt in 1..=retries {
            match self.inner.ledger.campaign(id).await {
                Ok(Some(raw)) => {
                    if let Some(campaign) = convert(id, &raw) {
                        self.upsert(campaign.clone());
                        return Ok(campaign);
                    }
                }
                Ok(None) => log::debug!("[CAMPAIGNS] Campaign {} not visible yet (attempt {})", id, attempt),
                Err(e) => log::warn!("[CAMPAIGNS] Reading campaign {} failed (attempt {}): {}", id, attempt, e.message),
            }
            if attempt < retries {
                self.inner.timer.sleep(backoff * attempt).await;
            }
        }

        log::warn!("[CAMPAIGNS] Campaign {} not found after {} attempts", id, retries);
        Err(ClientError::NotFound(id))
    }

    fn upsert(&self, campaign: Campaign) {
        let id = campaign.id;
        let revision = self.inner.revision.get() + 1;
        self.inner.revision.set(revision);
        self.inner.upserted_at.borrow_mut().insert(id, revision);
        {
            let mut cache = self.inner.cache.borrow_mut();
            match cache.iter_mut().find(|c| c.id == id) {
                Some(existing) => *existing = campaign,
                None => cache.push(campaign),
            }
        }
        self.inner.listeners.emit(&CampaignEvent::Upserted(id));
    }

    // ========================
    // Views
    // ========================

    pub fn campaigns(&self) -> Vec<Campaign> {
        self.inner.cache.borrow().clone()
    }

    pub fn campaign(&self, id: u64) -> Option<Campaign> {
        self.inner.cache.borrow().iter().find(|c| c.id == id).cloned()
    }

    pub fn owned_by(&self, address: &str) -> Vec<Campaign> {
        self.filtered(&CampaignFilter {
            owner: Some(address.to_string()),
            ..Default::default()
        })
    }

    pub fn filtered(&self, filter: &CampaignFilter) -> Vec<Campaign> {
        self.inner
            .cache
            .borrow()
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect()
    }

    pub fn subscribe(&self, callback: impl Fn(&CampaignEvent) + 'static) -> ListenerId {
        self.inner.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner.listeners.unsubscribe(id);
    }
}

fn convert(id: u64, raw: &RawCampaign) -> Option<Campaign> {
    if abi::is_zero_address(&raw.owner) {
        log::debug!("[CAMPAIGNS] Campaign {} has no owner yet", id);
        return None;
    }
    match Campaign::from_raw(id, raw) {
        Ok(campaign) => Some(campaign),
        Err(e) => {
            log::warn!("[CAMPAIGNS] Skipping malformed campaign {}: {}", id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusFilter;
    use crate::status::CampaignStatus;
    use crate::testing::{connected_harness, harness, raw_campaign, ALICE, BOB, ETHER};

    #[tokio::test]
    async fn test_load_all_empty_is_ok() {
        let h = connected_harness().await;
        assert_eq!(h.campaigns.load_all().await, Ok(vec![]));
        assert_eq!(h.ledger.count_calls("campaigns:"), 0);
    }

    #[tokio::test]
    async fn test_reads_require_connection() {
        let h = harness();
        h.ledger.push(raw_campaign(ALICE, ETHER, 0, 5));
        assert_eq!(h.campaigns.load_all().await, Err(ClientError::NotConnected));
        assert_eq!(h.campaigns.load_by_id(0).await, Err(ClientError::NotConnected));
        assert!(h.ledger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_load_all_skips_malformed_records() {
        let h = connected_harness().await;
        h.ledger.push(raw_campaign(ALICE, ETHER, 0, 5));
        h.ledger.push(raw_campaign(BOB, ETHER, 0, 5));
        h.ledger.push(raw_campaign(BOB, 0, 0, 5));
        h.ledger.push(raw_campaign(ALICE, 2 * ETHER, ETHER, 5));
        h.ledger.set_malformed(1);

        let loaded = h.campaigns.load_all().await.unwrap();
        let ids: Vec<u64> = loaded.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 3]);
        assert_eq!(loaded[1].pledged, "1.0");
        assert_eq!(h.campaigns.campaigns(), loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_by_id_retries_until_visible() {
        let h = connected_harness().await;
        let id = h.ledger.push(raw_campaign(ALICE, ETHER, 0, 5));
        h.campaigns.load_all().await.unwrap();
        h.ledger.hide_for(id, 1);

        let campaign = h.campaigns.load_by_id(id).await.unwrap();
        assert_eq!(campaign.id, id);
        assert_eq!(h.ledger.count_calls(&format!("campaign:{}", id)), 2);
        assert_eq!(h.campaigns.campaigns().iter().filter(|c| c.id == id).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_by_id_backs_off_linearly_then_fails() {
        let h = connected_harness().await;
        let id = h.ledger.push(raw_campaign(ALICE, ETHER, 0, 5));
        h.ledger.hide_for(id, 10);

        let started = tokio::time::Instant::now();
        let result = h
            .campaigns
            .load_by_id_with(id, 3, Duration::from_millis(100))
            .await;

        assert_eq!(result, Err(ClientError::NotFound(id)));
        assert_eq!(h.ledger.count_calls("campaign:"), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(400));
        assert!(h.campaigns.campaigns().is_empty());
    }

    #[tokio::test]
    async fn test_views_and_events() {
        let h = connected_harness().await;
        h.ledger.push(raw_campaign(ALICE, ETHER, 0, 5));
        let mut done = raw_campaign(BOB, ETHER, 0, 5);
        done.completed = true;
        h.ledger.push(done);
        h.ledger.push(raw_campaign(BOB, 10 * ETHER, ETHER, -1));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        h.campaigns.subscribe(move |e| sink.borrow_mut().push(e.clone()));

        h.campaigns.load_all().await.unwrap();
        h.campaigns.load_by_id(2).await.unwrap();

        assert_eq!(*seen.borrow(), vec![CampaignEvent::Replaced, CampaignEvent::Upserted(2)]);
        assert_eq!(h.campaigns.owned_by(&ALICE.to_uppercase().replace("0X", "0x")).len(), 1);
        assert_eq!(h.campaigns.campaign(2).map(|c| c.status()), Some(CampaignStatus::Failed));

        let completed = h.campaigns.filtered(&CampaignFilter {
            status: StatusFilter::Completed,
            owner: Some(BOB.to_string()),
        });
        assert_eq!(completed.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_status_follows_the_clock_after_load() {
        let h = connected_harness().await;
        let mut closing = raw_campaign(ALICE, ETHER, 0, 0);
        closing.deadline = (chrono::Utc::now() + chrono::Duration::seconds(1)).timestamp() as u64;
        h.ledger.push(closing);

        h.campaigns.load_all().await.unwrap();
        let active = CampaignFilter {
            status: StatusFilter::Active,
            owner: None,
        };
        assert_eq!(h.campaigns.filtered(&active).len(), 1);

        tokio::time::sleep(Duration::from_millis(2100)).await;

        let cached = h.campaigns.campaign(0).unwrap();
        assert_eq!(cached.status(), CampaignStatus::Failed);
        assert!(h.campaigns.filtered(&active).is_empty());
        assert_eq!(h.ledger.count_calls("campaigns:"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_keeps_records_upserted_meanwhile() {
        let h = connected_harness().await;
        h.ledger.push(raw_campaign(ALICE, ETHER, 0, 5));
        h.ledger.set_batch_delay(Duration::from_millis(200));

        let (reloaded, upserted) = futures::join!(h.campaigns.load_all(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut funded = raw_campaign(ALICE, ETHER, 0, 5);
            funded.balance = ETHER / 2;
            h.ledger.push(funded);
            h.campaigns.load_by_id(1).await
        });

        assert_eq!(upserted.unwrap().id, 1);
        let ids: Vec<u64> = reloaded.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(h.campaigns.campaign(1).map(|c| c.pledged), Some("0.5".to_string()));

        // A reload started after the upsert takes the ledger's word again
        h.ledger.set_batch_delay(Duration::ZERO);
        h.campaigns.load_all().await.unwrap();
        assert_eq!(h.campaigns.campaigns().len(), 2);
    }
}
