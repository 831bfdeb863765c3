//! JSON-RPC Ledger
//!
//! `LedgerClient` implemented with plain Ethereum JSON-RPC sent through the
//! wallet provider: `eth_call` for reads, `eth_sendTransaction` plus receipt
//! polling for confirmed writes, `eth_getLogs` for donation history.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};

use super::{LedgerClient, LedgerResult};
use crate::abi::{self, AbiError, Decoder, Token};
use crate::error::ProviderError;
use crate::models::{CreateCampaignCall, RawCampaign, RawLog};
use crate::provider::WalletProvider;
use crate::runtime::Timer;

/// How long to wait for a transaction to be mined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for ReceiptPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_polls: 120,
        }
    }
}

pub fn to_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

pub fn parse_quantity(input: &str) -> Option<u128> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    if digits.is_empty() {
        return None;
    }
    u128::from_str_radix(digits, 16).ok()
}

fn decode_err(err: AbiError) -> ProviderError {
    ProviderError::message(format!("Decode error: {}", err))
}

fn decode_campaign(data: &[u8]) -> Result<RawCampaign, AbiError> {
    let d = Decoder::new(data);
    Ok(RawCampaign {
        owner: d.address(0)?,
        title: d.string(1)?,
        description: d.string(2)?,
        image: d.string(3)?,
        goal: d.uint(4)?,
        deadline: d.u64(5)?,
        balance: d.uint(6)?,
        completed: d.bool(7)?,
        auto_complete: d.bool(8)?,
        start_time: 0,
    })
}

pub struct ProviderLedger {
    provider: Rc<dyn WalletProvider>,
    timer: Rc<dyn Timer>,
    contract: String,
    receipts: ReceiptPolicy,
}

impl ProviderLedger {
    pub fn new(
        provider: Rc<dyn WalletProvider>,
        timer: Rc<dyn Timer>,
        contract: impl Into<String>,
        receipts: ReceiptPolicy,
    ) -> Self {
        Self {
            provider,
            timer,
            contract: contract.into(),
            receipts,
        }
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    async fn call(&self, from: Option<&str>, data: Vec<u8>) -> LedgerResult<Vec<u8>> {
        let mut tx = json!({ "to": self.contract, "data": abi::to_hex(&data) });
        if let Some(from) = from {
            tx["from"] = json!(from);
        }
        let result = self.provider.request("eth_call", json!([tx, "latest"])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| ProviderError::message("eth_call returned no data"))?;
        abi::decode_hex(hex).map_err(decode_err)
    }

    /// Send a transaction and wait until it is mined; returns the receipt
    async fn send(&self, from: &str, data: Vec<u8>, value: u128) -> LedgerResult<Value> {
        let mut tx = json!({ "from": from, "to": self.contract, "data": abi::to_hex(&data) });
        if value > 0 {
            tx["value"] = json!(to_quantity(value));
        }
        let hash = self.provider.request("eth_sendTransaction", json!([tx])).await?;
        let hash = hash
            .as_str()
            .ok_or_else(|| ProviderError::message("eth_sendTransaction returned no hash"))?
            .to_string();
        log::info!("[LEDGER] Sent {} from {}", hash, from);
        self.wait_for_receipt(&hash).await
    }

    async fn wait_for_receipt(&self, hash: &str) -> LedgerResult<Value> {
        for _ in 0..self.receipts.max_polls {
            let receipt = self
                .provider
                .request("eth_getTransactionReceipt", json!([hash]))
                .await?;
            if !receipt.is_null() {
                return match receipt.get("status").and_then(|s| s.as_str()) {
                    Some("0x1") | None => Ok(receipt),
                    Some(_) => Err(ProviderError::message(format!("transaction {} reverted", hash))),
                };
            }
            self.timer.sleep(self.receipts.interval).await;
        }
        Err(ProviderError::message(format!(
            "transaction {} not confirmed after {} polls",
            hash, self.receipts.max_polls
        )))
    }

    /// Campaign id from the CampaignCreated log of a receipt
    fn created_id(&self, receipt: &Value) -> Option<u64> {
        let topic0 = abi::to_hex(&abi::event_topic(abi::EV_CAMPAIGN_CREATED));
        receipt.get("logs")?.as_array()?.iter().find_map(|log| {
            let address = log.get("address")?.as_str()?;
            let topics = log.get("topics")?.as_array()?;
            if !address.eq_ignore_ascii_case(&self.contract)
                || !topics.first()?.as_str()?.eq_ignore_ascii_case(&topic0)
            {
                return None;
            }
            let id = abi::parse_topic(topics.get(1)?.as_str()?).ok()?;
            Decoder::new(&id).u64(0).ok()
        })
    }

    async fn block_timestamp(&self, number: u64) -> LedgerResult<u64> {
        let block = self
            .provider
            .request("eth_getBlockByNumber", json!([to_quantity(number as u128), false]))
            .await?;
        block
            .get("timestamp")
            .and_then(|t| t.as_str())
            .and_then(parse_quantity)
            .and_then(|t| u64::try_from(t).ok())
            .ok_or_else(|| ProviderError::message(format!("block {} has no timestamp", number)))
    }
}

fn raw_log(entry: &Value) -> RawLog {
    let topics = entry
        .get("topics")
        .and_then(|t| t.as_array())
        .map(|t| t.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    RawLog {
        topics,
        data: entry.get("data").and_then(|d| d.as_str()).unwrap_or("0x").to_string(),
        block_number: entry
            .get("blockNumber")
            .and_then(|n| n.as_str())
            .and_then(parse_quantity)
            .and_then(|n| u64::try_from(n).ok()),
        block_timestamp: None,
        transaction_hash: entry.get("transactionHash").and_then(|h| h.as_str()).map(String::from),
    }
}

#[async_trait(?Send)]
impl LedgerClient for ProviderLedger {
    async fn campaign_count(&self) -> LedgerResult<u64> {
        let data = self.call(None, abi::encode_call(abi::FN_CAMPAIGN_COUNT, &[])).await?;
        Decoder::new(&data).u64(0).map_err(decode_err)
    }

    async fn campaign(&self, id: u64) -> LedgerResult<Option<RawCampaign>> {
        let data = self
            .call(None, abi::encode_call(abi::FN_CAMPAIGNS, &[Token::Uint(id as u128)]))
            .await?;
        if data.is_empty() {
            return Ok(None);
        }
        let campaign = decode_campaign(&data).map_err(decode_err)?;
        if abi::is_zero_address(&campaign.owner) {
            return Ok(None);
        }
        Ok(Some(campaign))
    }

    async fn campaigns(&self, count: u64) -> LedgerResult<Vec<LedgerResult<RawCampaign>>> {
        let reads = (0..count).map(|id| async move {
            match self.campaign(id).await {
                Ok(Some(campaign)) => Ok(campaign),
                Ok(None) => Err(ProviderError::message(format!("campaign {} is empty", id))),
                Err(e) => Err(e),
            }
        });
        Ok(join_all(reads).await)
    }

    async fn donation_logs(&self, campaign_id: u64) -> LedgerResult<Vec<RawLog>> {
        let filter = json!({
            "address": self.contract,
            "topics": [
                [
                    abi::to_hex(&abi::event_topic(abi::EV_DONATION_RECEIVED)),
                    abi::to_hex(&abi::event_topic(abi::EV_DONATION_RECEIVED_WITH_MESSAGE)),
                ],
                abi::uint_topic(campaign_id),
            ],
            "fromBlock": "0x0",
            "toBlock": "latest",
        });
        let result = self.provider.request("eth_getLogs", json!([filter])).await?;
        let entries = result
            .as_array()
            .ok_or_else(|| ProviderError::message("eth_getLogs returned no list"))?;
        let mut logs: Vec<RawLog> = entries.iter().map(raw_log).collect();

        // One block lookup per distinct block
        let blocks: BTreeSet<u64> = logs.iter().filter_map(|l| l.block_number).collect();
        let lookups = blocks
            .into_iter()
            .map(|n| async move { (n, self.block_timestamp(n).await) });
        let mut times = HashMap::new();
        for (number, result) in join_all(lookups).await {
            match result {
                Ok(ts) => {
                    times.insert(number, ts);
                }
                Err(e) => log::warn!("[LEDGER] No timestamp for block {}: {}", number, e),
            }
        }
        for log in &mut logs {
            log.block_timestamp = log.block_number.and_then(|n| times.get(&n).copied());
        }
        Ok(logs)
    }

    async fn create_campaign(&self, from: &str, call: &CreateCampaignCall) -> LedgerResult<u64> {
        let data = abi::encode_call(
            abi::FN_CREATE_CAMPAIGN,
            &[
                Token::String(call.title.clone()),
                Token::String(call.description.clone()),
                Token::Uint(call.goal),
                Token::Uint(call.duration_days as u128),
                Token::String(call.image.clone()),
                Token::Bool(call.auto_complete),
            ],
        );
        let receipt = self.send(from, data, 0).await?;
        if let Some(id) = self.created_id(&receipt) {
            return Ok(id);
        }
        log::warn!("[LEDGER] CampaignCreated log missing from receipt, falling back to count");
        let count = self.campaign_count().await?;
        count
            .checked_sub(1)
            .ok_or_else(|| ProviderError::message("campaign count is zero after create"))
    }

    async fn donate(&self, from: &str, campaign_id: u64, amount: u128, message: Option<&str>) -> LedgerResult<()> {
        // The contract's donate takes only the id; a note stays client side
        if let Some(message) = message {
            log::debug!("[LEDGER] Donation note not sent on chain: {:?}", message);
        }
        let data = abi::encode_call(abi::FN_DONATE, &[Token::Uint(campaign_id as u128)]);
        self.send(from, data, amount).await.map(|_| ())
    }

    async fn complete_campaign(&self, from: &str, campaign_id: u64) -> LedgerResult<()> {
        let data = abi::encode_call(abi::FN_COMPLETE_CAMPAIGN, &[Token::Uint(campaign_id as u128)]);
        self.send(from, data, 0).await.map(|_| ())
    }

    async fn withdraw_funds(&self, from: &str, campaign_id: u64) -> LedgerResult<()> {
        let data = abi::encode_call(abi::FN_WITHDRAW_FUNDS, &[Token::Uint(campaign_id as u128)]);
        self.send(from, data, 0).await.map(|_| ())
    }

    async fn can_withdraw(&self, from: &str, campaign_id: u64) -> LedgerResult<bool> {
        let data = self
            .call(
                Some(from),
                abi::encode_call(abi::FN_CAN_WITHDRAW_FUNDS, &[Token::Uint(campaign_id as u128)]),
            )
            .await?;
        Decoder::new(&data).bool(0).map_err(decode_err)
    }
}
