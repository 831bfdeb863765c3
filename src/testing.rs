//! Test Support
//!
//! Fake wallet provider, fake ledger and a tokio-backed timer so every
//! service can be built in isolation on the host.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};

use crate::abi::{self, Token};
use crate::campaigns::{ChainCampaignRepository, RetryPolicy};
use crate::donations::DonationLedger;
use crate::error::ProviderError;
use crate::ledger::{LedgerClient, LedgerResult};
use crate::models::{CreateCampaignCall, RawCampaign, RawLog};
use crate::mutations::MutationCoordinator;
use crate::provider::{ProviderEvent, ProviderEventKind, ProviderListener, SubscriptionId, WalletProvider};
use crate::runtime::Timer;
use crate::storage::MemoryFlags;
use crate::wallet::{WalletConnectionManager, WalletSettings};

pub const ALICE: &str = "0xa11ce00000000000000000000000000000000001";
pub const BOB: &str = "0xb0b0000000000000000000000000000000000002";
pub const ETHER: u128 = 1_000_000_000_000_000_000;

pub struct TokioTimer;

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed_local()
    }
}

// ========================
// Fake Provider
// ========================

type Handler = Box<dyn Fn(&str, &Value) -> Option<Result<Value, ProviderError>>>;

pub struct FakeProvider {
    installed: Cell<bool>,
    push_supported: Cell<bool>,
    calls: RefCell<Vec<String>>,
    granted: RefCell<Vec<String>>,
    approval: RefCell<Result<Vec<String>, ProviderError>>,
    approval_delay: Cell<Duration>,
    chain_id: RefCell<String>,
    next_sub: Cell<u64>,
    listeners: RefCell<Vec<(SubscriptionId, ProviderEventKind, ProviderListener)>>,
    handler: RefCell<Option<Handler>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            installed: Cell::new(true),
            push_supported: Cell::new(false),
            calls: RefCell::new(Vec::new()),
            granted: RefCell::new(Vec::new()),
            approval: RefCell::new(Ok(vec![ALICE.to_string()])),
            approval_delay: Cell::new(Duration::from_millis(50)),
            chain_id: RefCell::new("0xaa36a7".to_string()),
            next_sub: Cell::new(0),
            listeners: RefCell::new(Vec::new()),
            handler: RefCell::new(None),
        }
    }

    pub fn set_handler(&self, handler: impl Fn(&str, &Value) -> Option<Result<Value, ProviderError>> + 'static) {
        *self.handler.borrow_mut() = Some(Box::new(handler));
    }

    pub fn set_installed(&self, installed: bool) {
        self.installed.set(installed);
    }

    pub fn set_push_supported(&self, supported: bool) {
        self.push_supported.set(supported);
    }

    /// Accounts already granted to the page (`eth_accounts`)
    pub fn grant(&self, accounts: &[&str]) {
        *self.granted.borrow_mut() = accounts.iter().map(|a| a.to_string()).collect();
    }

    /// What the permission prompt (`eth_requestAccounts`) resolves to
    pub fn set_approval(&self, result: Result<Vec<String>, ProviderError>) {
        *self.approval.borrow_mut() = result;
    }

    pub fn set_approval_delay(&self, delay: Duration) {
        self.approval_delay.set(delay);
    }

    pub fn set_chain(&self, chain_id: &str) {
        *self.chain_id.borrow_mut() = chain_id.to_string();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count_calls(&self, method: &str) -> usize {
        self.calls.borrow().iter().filter(|m| m.as_str() == method).count()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Deliver a push notification to subscribers of its kind
    pub fn fire(&self, event: ProviderEvent) {
        let kind = match &event {
            ProviderEvent::AccountsChanged(_) => ProviderEventKind::AccountsChanged,
            ProviderEvent::ChainChanged(_) => ProviderEventKind::ChainChanged,
            ProviderEvent::Disconnect => ProviderEventKind::Disconnect,
        };
        let targets: Vec<ProviderListener> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, l)| l.clone())
            .collect();
        for listener in targets {
            listener(event.clone());
        }
    }
}

#[async_trait(?Send)]
impl WalletProvider for FakeProvider {
    fn is_installed(&self) -> bool {
        self.installed.get()
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.calls.borrow_mut().push(method.to_string());
        if let Some(handler) = self.handler.borrow().as_ref() {
            if let Some(result) = handler(method, &params) {
                return result;
            }
        }

        match method {
            "eth_requestAccounts" => {
                tokio::time::sleep(self.approval_delay.get()).await;
                let approval = self.approval.borrow().clone();
                let accounts = approval?;
                *self.granted.borrow_mut() = accounts.clone();
                Ok(json!(accounts))
            }
            "eth_accounts" => Ok(json!(self.granted.borrow().clone())),
            "eth_chainId" => Ok(json!(self.chain_id.borrow().clone())),
            "wallet_switchEthereumChain" => {
                let chain = params[0]["chainId"].as_str().unwrap_or_default().to_string();
                *self.chain_id.borrow_mut() = chain;
                Ok(Value::Null)
            }
            other => Err(ProviderError::message(format!("unsupported method {}", other))),
        }
    }

    fn subscribe(&self, kind: ProviderEventKind, listener: ProviderListener) -> Option<SubscriptionId> {
        if !self.push_supported.get() {
            return None;
        }
        let id = SubscriptionId(self.next_sub.get());
        self.next_sub.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, kind, listener));
        Some(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.borrow_mut().retain(|(sub, _, _)| *sub != id);
    }
}

// ========================
// Fake Ledger
// ========================

pub fn raw_campaign(owner: &str, goal: u128, balance: u128, days_left: i64) -> RawCampaign {
    RawCampaign {
        owner: owner.to_string(),
        title: "Community garden".to_string(),
        description: "Seeds and tools".to_string(),
        image: String::new(),
        goal,
        balance,
        deadline: (Utc::now() + chrono::Duration::days(days_left)).timestamp() as u64,
        start_time: 0,
        completed: false,
        auto_complete: false,
    }
}

/// A well-formed DonationReceived log entry; a non-empty message selects
/// the variant that carries a note
pub fn donation_log(campaign_id: u64, donor: &str, amount: u128, message: &str, timestamp: u64) -> RawLog {
    let donor_bytes = abi::parse_address(donor).unwrap_or([0; 20]);
    let mut donor_topic = [0u8; 32];
    donor_topic[12..].copy_from_slice(&donor_bytes);
    let (signature, data) = if message.is_empty() {
        (abi::EV_DONATION_RECEIVED, abi::encode(&[Token::Uint(amount)]))
    } else {
        (
            abi::EV_DONATION_RECEIVED_WITH_MESSAGE,
            abi::encode(&[Token::Uint(amount), Token::String(message.to_string())]),
        )
    };
    RawLog {
        topics: vec![
            abi::to_hex(&abi::event_topic(signature)),
            abi::uint_topic(campaign_id),
            abi::to_hex(&donor_topic),
        ],
        data: abi::to_hex(&data),
        block_number: Some(timestamp),
        block_timestamp: Some(timestamp),
        transaction_hash: None,
    }
}

#[derive(Default)]
pub struct FakeLedger {
    records: RefCell<Vec<RawCampaign>>,
    malformed: RefCell<HashSet<u64>>,
    hidden_reads: RefCell<HashMap<u64, u32>>,
    hide_created_for: Cell<u32>,
    logs: RefCell<HashMap<u64, Vec<RawLog>>>,
    write_error: RefCell<Option<ProviderError>>,
    read_delay: Cell<Duration>,
    batch_delay: Cell<Duration>,
    can_withdraw: Cell<bool>,
    calls: RefCell<Vec<String>>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: RawCampaign) -> u64 {
        let mut records = self.records.borrow_mut();
        records.push(record);
        (records.len() - 1) as u64
    }

    pub fn set_malformed(&self, id: u64) {
        self.malformed.borrow_mut().insert(id);
    }

    /// Next `reads` single-record reads of `id` return nothing
    pub fn hide_for(&self, id: u64, reads: u32) {
        self.hidden_reads.borrow_mut().insert(id, reads);
    }

    /// Newly created campaigns stay invisible for `reads` reads
    pub fn hide_created_for(&self, reads: u32) {
        self.hide_created_for.set(reads);
    }

    pub fn set_logs(&self, id: u64, logs: Vec<RawLog>) {
        self.logs.borrow_mut().insert(id, logs);
    }

    pub fn fail_writes(&self, err: ProviderError) {
        *self.write_error.borrow_mut() = Some(err);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay.set(delay);
    }

    /// Extra latency for the batched all-campaigns read only
    pub fn set_batch_delay(&self, delay: Duration) {
        self.batch_delay.set(delay);
    }

    pub fn set_can_withdraw(&self, value: bool) {
        self.can_withdraw.set(value);
    }

    pub fn record(&self, id: u64) -> Option<RawCampaign> {
        self.records.borrow().get(id as usize).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn log_call(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    async fn pause(&self) {
        let delay = self.read_delay.get();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_write(&self) -> LedgerResult<()> {
        match self.write_error.borrow().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait(?Send)]
impl LedgerClient for FakeLedger {
    async fn campaign_count(&self) -> LedgerResult<u64> {
        self.log_call("campaign_count".to_string());
        self.pause().await;
        Ok(self.records.borrow().len() as u64)
    }

    async fn campaign(&self, id: u64) -> LedgerResult<Option<RawCampaign>> {
        self.log_call(format!("campaign:{}", id));
        self.pause().await;
        {
            let mut hidden = self.hidden_reads.borrow_mut();
            if let Some(remaining) = hidden.get_mut(&id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(None);
                }
            }
        }
        Ok(self.record(id))
    }

    async fn campaigns(&self, count: u64) -> LedgerResult<Vec<LedgerResult<RawCampaign>>> {
        self.log_call(format!("campaigns:{}", count));
        self.pause().await;
        let extra = self.batch_delay.get();
        if !extra.is_zero() {
            tokio::time::sleep(extra).await;
        }
        let malformed = self.malformed.borrow();
        Ok((0..count)
            .map(|id| {
                if malformed.contains(&id) {
                    return Err(ProviderError::message(format!("cannot decode campaign {}", id)));
                }
                self.record(id)
                    .ok_or_else(|| ProviderError::message(format!("campaign {} missing", id)))
            })
            .collect())
    }

    async fn donation_logs(&self, campaign_id: u64) -> LedgerResult<Vec<RawLog>> {
        self.log_call(format!("donation_logs:{}", campaign_id));
        self.pause().await;
        Ok(self.logs.borrow().get(&campaign_id).cloned().unwrap_or_default())
    }

    async fn create_campaign(&self, from: &str, call: &CreateCampaignCall) -> LedgerResult<u64> {
        self.log_call("create_campaign".to_string());
        self.check_write()?;
        let mut record = raw_campaign(from, call.goal, 0, call.duration_days as i64);
        record.title = call.title.clone();
        record.description = call.description.clone();
        record.image = call.image.clone();
        record.auto_complete = call.auto_complete;
        let id = self.push(record);
        let hidden = self.hide_created_for.get();
        if hidden > 0 {
            self.hide_for(id, hidden);
        }
        Ok(id)
    }

    async fn donate(&self, from: &str, campaign_id: u64, amount: u128, message: Option<&str>) -> LedgerResult<()> {
        self.log_call(format!("donate:{}", campaign_id));
        self.check_write()?;
        let mut records = self.records.borrow_mut();
        let record = records
            .get_mut(campaign_id as usize)
            .ok_or_else(|| ProviderError::message("execution reverted: no such campaign"))?;
        record.balance += amount;
        let ts = Utc::now().timestamp() as u64;
        self.logs
            .borrow_mut()
            .entry(campaign_id)
            .or_default()
            .push(donation_log(campaign_id, from, amount, message.unwrap_or_default(), ts));
        Ok(())
    }

    async fn complete_campaign(&self, _from: &str, campaign_id: u64) -> LedgerResult<()> {
        self.log_call(format!("complete:{}", campaign_id));
        self.check_write()?;
        if let Some(record) = self.records.borrow_mut().get_mut(campaign_id as usize) {
            record.completed = true;
        }
        Ok(())
    }

    async fn withdraw_funds(&self, _from: &str, campaign_id: u64) -> LedgerResult<()> {
        self.log_call(format!("withdraw:{}", campaign_id));
        self.check_write()
    }

    async fn can_withdraw(&self, _from: &str, campaign_id: u64) -> LedgerResult<bool> {
        self.log_call(format!("can_withdraw:{}", campaign_id));
        Ok(self.can_withdraw.get())
    }
}

// ========================
// Service Harness
// ========================

pub struct Harness {
    pub provider: Rc<FakeProvider>,
    pub ledger: Rc<FakeLedger>,
    pub flags: Rc<MemoryFlags>,
    pub wallet: WalletConnectionManager,
    pub campaigns: ChainCampaignRepository,
    pub donations: DonationLedger,
    pub mutations: MutationCoordinator,
}

pub fn test_settings() -> WalletSettings {
    WalletSettings {
        connect_timeout: Duration::from_secs(30),
        expected_chain_id: None,
    }
}

pub fn harness() -> Harness {
    harness_with(test_settings())
}

pub fn harness_with(settings: WalletSettings) -> Harness {
    let provider = Rc::new(FakeProvider::new());
    let ledger = Rc::new(FakeLedger::new());
    let flags = Rc::new(MemoryFlags::new());
    let timer: Rc<dyn Timer> = Rc::new(TokioTimer);

    let wallet = WalletConnectionManager::new(provider.clone(), flags.clone(), timer.clone(), settings);
    let retry = RetryPolicy {
        retries: 3,
        backoff: Duration::from_millis(100),
    };
    let campaigns = ChainCampaignRepository::new(ledger.clone(), wallet.clone(), timer, retry);
    let donations = DonationLedger::new(ledger.clone(), wallet.clone());
    let mutations = MutationCoordinator::new(ledger.clone(), wallet.clone(), campaigns.clone(), donations.clone());

    Harness {
        provider,
        ledger,
        flags,
        wallet,
        campaigns,
        donations,
        mutations,
    }
}

/// Harness with ALICE already connected through granted accounts
pub async fn connected_harness() -> Harness {
    let h = harness();
    h.provider.grant(&[ALICE]);
    let connected = h.wallet.check_connection().await;
    assert_eq!(connected, Ok(Some(ALICE.to_string())));
    h
}

/// Spawner that queues tasks so a test decides when they run
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<Vec<LocalBoxFuture<'static, ()>>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawner(&self) -> crate::runtime::Spawner {
        let tasks = self.tasks.clone();
        Rc::new(move |task: LocalBoxFuture<'static, ()>| tasks.borrow_mut().push(task))
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn take(&self) -> Vec<LocalBoxFuture<'static, ()>> {
        std::mem::take(&mut *self.tasks.borrow_mut())
    }

    /// Run every queued task to completion
    pub async fn drain(&self) {
        futures::future::join_all(self.take()).await;
    }
}
