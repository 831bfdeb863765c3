//! Chain Configuration
//!
//! Ledger address and client tuning. The browser has no runtime environment,
//! so values come from JSON handed over by the deployment or from variables
//! baked in at build time.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::abi;
use crate::campaigns::RetryPolicy;
use crate::error::ClientError;
use crate::ledger::{parse_quantity, ReceiptPolicy};
use crate::wallet::WalletSettings;

pub const SEPOLIA_CHAIN_ID: &str = "0xaa36a7";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(String),
    #[error("contract address is not set")]
    MissingContractAddress,
    #[error("contract address {0} is not a 20-byte hex address")]
    InvalidContractAddress(String),
    #[error("chain id {0} is not a hex quantity")]
    InvalidChainId(String),
    #[error("load_retries must be at least 1")]
    ZeroRetries,
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        ClientError::Validation(err.to_string())
    }
}

fn default_chain_id() -> String {
    SEPOLIA_CHAIN_ID.to_string()
}

fn default_network_name() -> String {
    "Sepolia".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_load_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_receipt_poll_interval_ms() -> u64 {
    1000
}

fn default_receipt_max_polls() -> u32 {
    120
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub contract_address: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
    #[serde(default = "default_network_name")]
    pub network_name: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Account watcher heartbeat when push events are unavailable
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_load_retries")]
    pub load_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_receipt_max_polls")]
    pub receipt_max_polls: u32,
    /// Refuse writes while the wallet is on another chain
    #[serde(default = "default_true")]
    pub enforce_network: bool,
}

impl ChainConfig {
    pub fn new(contract_address: impl Into<String>) -> Self {
        Self {
            contract_address: contract_address.into(),
            chain_id: default_chain_id(),
            network_name: default_network_name(),
            connect_timeout_secs: default_connect_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            load_retries: default_load_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            receipt_max_polls: default_receipt_max_polls(),
            enforce_network: true,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Values baked in at compile time
    pub fn from_build_env() -> Result<Self, ConfigError> {
        let address = option_env!("CROWDFUND_CONTRACT_ADDRESS").ok_or(ConfigError::MissingContractAddress)?;
        let mut config = Self::new(address);
        if let Some(chain_id) = option_env!("CROWDFUND_CHAIN_ID") {
            config.chain_id = chain_id.to_string();
        }
        if let Some(name) = option_env!("CROWDFUND_NETWORK_NAME") {
            config.network_name = name.to_string();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let address = self.contract_address.trim();
        if address.is_empty() {
            return Err(ConfigError::MissingContractAddress);
        }
        if !address.starts_with("0x") || abi::parse_address(address).is_err() {
            return Err(ConfigError::InvalidContractAddress(address.to_string()));
        }
        if !self.chain_id.starts_with("0x") || parse_quantity(&self.chain_id).is_none() {
            return Err(ConfigError::InvalidChainId(self.chain_id.clone()));
        }
        if self.load_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn wallet_settings(&self) -> WalletSettings {
        WalletSettings {
            connect_timeout: self.connect_timeout(),
            expected_chain_id: self.enforce_network.then(|| self.chain_id.clone()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.load_retries,
            backoff: self.retry_backoff(),
        }
    }

    pub fn receipt_policy(&self) -> ReceiptPolicy {
        ReceiptPolicy {
            interval: Duration::from_millis(self.receipt_poll_interval_ms),
            max_polls: self.receipt_max_polls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ChainConfig::from_json(&format!(r#"{{"contract_address": "{}"}}"#, CONTRACT)).unwrap();
        assert_eq!(config, ChainConfig::new(CONTRACT));
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.receipt_policy(), ReceiptPolicy::default());
        assert_eq!(
            config.wallet_settings().expected_chain_id.as_deref(),
            Some(SEPOLIA_CHAIN_ID)
        );
    }

    #[test]
    fn test_from_json_overrides() {
        let json = format!(
            r#"{{"contract_address": "{}", "chain_id": "0x7a69", "enforce_network": false, "load_retries": 5}}"#,
            CONTRACT
        );
        let config = ChainConfig::from_json(&json).unwrap();
        assert_eq!(config.chain_id, "0x7a69");
        assert_eq!(config.retry_policy().retries, 5);
        assert_eq!(config.wallet_settings().expected_chain_id, None);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(ChainConfig::from_json("{}"), Err(ConfigError::Json(_))));
        assert_eq!(ChainConfig::new("").validate(), Err(ConfigError::MissingContractAddress));
        assert!(matches!(
            ChainConfig::new("0x1234").validate(),
            Err(ConfigError::InvalidContractAddress(_))
        ));

        let mut config = ChainConfig::new(CONTRACT);
        config.chain_id = "sepolia".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidChainId(_))));

        let mut config = ChainConfig::new(CONTRACT);
        config.load_retries = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroRetries));
        assert!(matches!(ClientError::from(ConfigError::ZeroRetries), ClientError::Validation(_)));
    }
}
