//! Donation Ledger
//!
//! Per-campaign donation history decoded from DonationReceived logs.
//! The deployed event carries only the amount; the variant with a trailing
//! string supplies the donor note. A reload replaces the campaign's slice;
//! it never appends.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::abi::{self, AbiError, Decoder};
use crate::error::{classify, ClientResult};
use crate::events::{DonationEvent, ListenerId, Listeners};
use crate::ledger::LedgerClient;
use crate::models::{timestamp, Donation, RawLog};
use crate::units::format_units;
use crate::wallet::WalletConnectionManager;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("not a DonationReceived event")]
    WrongEvent,
    #[error("event belongs to another campaign")]
    WrongCampaign,
    #[error("missing topic {0}")]
    MissingTopic(usize),
    #[error("missing block timestamp")]
    MissingTimestamp,
    #[error(transparent)]
    Abi(#[from] AbiError),
}

/// Decode one log entry of `campaign_id` into a display donation
pub fn decode_donation(campaign_id: u64, log: &RawLog) -> Result<Donation, DecodeError> {
    let topic = |i: usize| -> Result<[u8; 32], DecodeError> {
        let raw = log.topics.get(i).ok_or(DecodeError::MissingTopic(i))?;
        Ok(abi::parse_topic(raw)?)
    };

    let signature = topic(0)?;
    let with_message = if signature == abi::event_topic(abi::EV_DONATION_RECEIVED) {
        false
    } else if signature == abi::event_topic(abi::EV_DONATION_RECEIVED_WITH_MESSAGE) {
        true
    } else {
        return Err(DecodeError::WrongEvent);
    };
    if Decoder::new(&topic(1)?).u64(0)? != campaign_id {
        return Err(DecodeError::WrongCampaign);
    }
    let donor = abi::address_from_topic(&topic(2)?);

    let data = abi::decode_hex(&log.data)?;
    let decoder = Decoder::new(&data);
    let amount = decoder.uint(0)?;
    let message = if with_message {
        decoder.string(1)?
    } else {
        String::new()
    };

    let at = log
        .block_timestamp
        .and_then(timestamp)
        .ok_or(DecodeError::MissingTimestamp)?;

    Ok(Donation {
        donor,
        amount: format_units(amount),
        message: (!message.is_empty()).then_some(message),
        timestamp: at,
        block_number: log.block_number,
    })
}

struct Inner {
    ledger: Rc<dyn LedgerClient>,
    wallet: WalletConnectionManager,
    cache: RefCell<HashMap<u64, Vec<Donation>>>,
    /// Bumped by `clear`; loads started before it do not write back
    epoch: Cell<u64>,
    listeners: Listeners<DonationEvent>,
}

#[derive(Clone)]
pub struct DonationLedger {
    inner: Rc<Inner>,
}

impl DonationLedger {
    pub fn new(ledger: Rc<dyn LedgerClient>, wallet: WalletConnectionManager) -> Self {
        Self {
            inner: Rc::new(Inner {
                ledger,
                wallet,
                cache: RefCell::new(HashMap::new()),
                epoch: Cell::new(0),
                listeners: Listeners::new(),
            }),
        }
    }

    /// Query and decode the donations of one campaign, newest first
    pub async fn load(&self, campaign_id: u64) -> ClientResult<Vec<Donation>> {
        self.inner.wallet.require_address()?;
        let epoch = self.inner.epoch.get();

        let logs = self
            .inner
            .ledger
            .donation_logs(campaign_id)
            .await
            .map_err(|e| classify(&e))?;

        let mut donations: Vec<Donation> = logs
            .iter()
            .filter_map(|entry| match decode_donation(campaign_id, entry) {
                Ok(donation) => Some(donation),
                Err(e) => {
                    log::warn!(
                        "[DONATIONS] Dropping event {:?} of campaign {}: {}",
                        entry.transaction_hash,
                        campaign_id,
                        e
                    );
                    None
                }
            })
            .collect();
        donations.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.block_number.cmp(&a.block_number))
        });
        log::debug!(
            "[DONATIONS] Campaign {}: {} of {} events decoded",
            campaign_id,
            donations.len(),
            logs.len()
        );

        if self.inner.epoch.get() != epoch {
            log::debug!("[DONATIONS] Cache cleared during load of {}, not caching", campaign_id);
            return Ok(donations);
        }
        self.inner
            .cache
            .borrow_mut()
            .insert(campaign_id, donations.clone());
        self.inner.listeners.emit(&DonationEvent::Loaded(campaign_id));
        Ok(donations)
    }

    pub fn donations(&self, campaign_id: u64) -> Vec<Donation> {
        self.inner
            .cache
            .borrow()
            .get(&campaign_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.inner.epoch.set(self.inner.epoch.get() + 1);
        self.inner.cache.borrow_mut().clear();
        self.inner.listeners.emit(&DonationEvent::Cleared);
    }

    pub fn subscribe(&self, callback: impl Fn(&DonationEvent) + 'static) -> ListenerId {
        self.inner.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner.listeners.unsubscribe(id);
    }
}
