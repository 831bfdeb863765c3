//! Client Errors
//!
//! Raw provider errors are classified into `ClientError` at the boundary.
//! Every `ClientError` maps to a user notification with a remediation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// EIP-1193: the user rejected the request
pub const CODE_USER_REJECTED: i64 = 4001;
/// MetaMask: a request of the same type is already pending
pub const CODE_REQUEST_PENDING: i64 = -32002;

/// Error as returned by the wallet extension or the chain node
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("provider error ({code:?}): {message}")]
pub struct ProviderError {
    pub code: Option<i64>,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("no wallet extension found")]
    MissingProvider,
    #[error("wallet is not connected")]
    NotConnected,
    #[error("request rejected by the user")]
    UserRejected,
    #[error("a wallet request is already waiting for the user")]
    PendingRequestExists,
    #[error("insufficient funds for this transaction")]
    InsufficientFunds,
    #[error("wrong network: expected {expected}, wallet is on {actual}")]
    WrongNetwork { expected: String, actual: String },
    #[error("campaign {0} not found")]
    NotFound(u64),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("network or contract error: {0}")]
    NetworkOrContract(String),
}

/// Map a raw provider error onto the client taxonomy
pub fn classify(err: &ProviderError) -> ClientError {
    let message = err.message.to_lowercase();
    match err.code {
        Some(CODE_USER_REJECTED) => return ClientError::UserRejected,
        Some(CODE_REQUEST_PENDING) => return ClientError::PendingRequestExists,
        _ => {}
    }
    if message.contains("user rejected") || message.contains("user denied") {
        ClientError::UserRejected
    } else if message.contains("already pending") {
        ClientError::PendingRequestExists
    } else if message.contains("insufficient funds") {
        ClientError::InsufficientFunds
    } else {
        ClientError::NetworkOrContract(err.message.clone())
    }
}

impl From<ProviderError> for ClientError {
    fn from(err: ProviderError) -> Self {
        classify(&err)
    }
}

/// What the user can do about an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Remediation {
    Retry,
    ConnectWallet,
    InstallExtension,
    SwitchNetwork,
    ReduceAmount,
    WaitForPrompt,
    FixInput,
}

impl Remediation {
    pub fn label(&self) -> &'static str {
        match self {
            Remediation::Retry => "Try Again",
            Remediation::ConnectWallet => "Connect Wallet",
            Remediation::InstallExtension => "Download MetaMask",
            Remediation::SwitchNetwork => "Switch Network",
            Remediation::ReduceAmount => "Reduce Amount",
            Remediation::WaitForPrompt => "Open Wallet",
            Remediation::FixInput => "Edit Form",
        }
    }
}

/// User-facing rendering of a `ClientError`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub action: Remediation,
}

impl ClientError {
    pub fn remediation(&self) -> Remediation {
        match self {
            ClientError::MissingProvider => Remediation::InstallExtension,
            ClientError::NotConnected => Remediation::ConnectWallet,
            ClientError::UserRejected => Remediation::Retry,
            ClientError::PendingRequestExists => Remediation::WaitForPrompt,
            ClientError::InsufficientFunds => Remediation::ReduceAmount,
            ClientError::WrongNetwork { .. } => Remediation::SwitchNetwork,
            ClientError::NotFound(_) => Remediation::Retry,
            ClientError::Validation(_) => Remediation::FixInput,
            ClientError::NetworkOrContract(_) => Remediation::Retry,
        }
    }

    pub fn notification(&self) -> Notification {
        let (title, description) = match self {
            ClientError::MissingProvider => (
                "MetaMask Required",
                "To use this application, you need to have MetaMask installed in your browser.".to_string(),
            ),
            ClientError::NotConnected => (
                "Wallet Not Connected",
                "Connect your wallet to load campaigns.".to_string(),
            ),
            ClientError::UserRejected => (
                "Transaction Rejected",
                "You have rejected the request. Please try again if you want to proceed.".to_string(),
            ),
            ClientError::PendingRequestExists => (
                "Request Pending",
                "Your wallet already has a request waiting. Open the extension to finish it.".to_string(),
            ),
            ClientError::InsufficientFunds => (
                "Insufficient Funds",
                "Your balance does not cover this amount plus gas.".to_string(),
            ),
            ClientError::WrongNetwork { expected, .. } => (
                "Wrong Network",
                format!("Please switch your wallet to network {}.", expected),
            ),
            ClientError::NotFound(id) => (
                "Campaign Not Found",
                format!("Campaign #{} is not available yet.", id),
            ),
            ClientError::Validation(msg) => ("Invalid Input", msg.clone()),
            ClientError::NetworkOrContract(_) => (
                "Network Error",
                "Unable to reach the network. Please check your connection.".to_string(),
            ),
        };
        Notification {
            title: title.to_string(),
            description,
            action: self.remediation(),
        }
    }
}
