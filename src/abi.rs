//! Contract ABI Codec
//!
//! Minimal Solidity ABI support for the crowdfunding contract:
//! static words, dynamic strings, selectors, event topics and
//! EIP-55 checksum addresses.

use sha3::{Digest, Keccak256};
use thiserror::Error;

// ========================
// Contract Surface
// ========================

pub const FN_CAMPAIGN_COUNT: &str = "campaignCount()";
pub const FN_CAMPAIGNS: &str = "campaigns(uint256)";
pub const FN_CREATE_CAMPAIGN: &str = "createCampaign(string,string,uint256,uint256,string,bool)";
pub const FN_DONATE: &str = "donate(uint256)";
pub const FN_COMPLETE_CAMPAIGN: &str = "completeCampaign(uint256)";
pub const FN_WITHDRAW_FUNDS: &str = "withdrawFunds(uint256)";
pub const FN_CAN_WITHDRAW_FUNDS: &str = "canWithdrawFunds(uint256)";

pub const EV_CAMPAIGN_CREATED: &str = "CampaignCreated(uint256,address,string,string,string,uint256,uint256)";
pub const EV_DONATION_RECEIVED: &str = "DonationReceived(uint256,address,uint256)";
/// Deployments that record a donor note emit this variant
pub const EV_DONATION_RECEIVED_WITH_MESSAGE: &str = "DonationReceived(uint256,address,uint256,string)";

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("data too short: need {needed} bytes, have {len}")]
    OutOfBounds { needed: usize, len: usize },
    #[error("value does not fit in 128 bits")]
    Overflow,
    #[error("invalid bool word")]
    InvalidBool,
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(u128),
    Bool(bool),
    Address([u8; 20]),
    String(String),
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let digest = Keccak256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

pub fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Topic filter value for an indexed uint256
pub fn uint_topic(value: u64) -> String {
    format!("0x{}", hex::encode(uint_word(value as u128)))
}

pub fn to_hex(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

pub fn decode_hex(input: &str) -> Result<Vec<u8>, AbiError> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(stripped).map_err(|_| AbiError::InvalidHex(input.to_string()))
}

pub fn parse_topic(input: &str) -> Result<[u8; 32], AbiError> {
    let bytes = decode_hex(input)?;
    bytes
        .try_into()
        .map_err(|_| AbiError::InvalidHex(input.to_string()))
}

pub fn parse_address(input: &str) -> Result<[u8; 20], AbiError> {
    let bytes = decode_hex(input)?;
    bytes
        .try_into()
        .map_err(|_| AbiError::InvalidHex(input.to_string()))
}

/// EIP-55 mixed-case address
pub fn checksum_address(bytes: &[u8]) -> String {
    let lower = hex::encode(bytes);
    let hash = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 { hash[i / 2] >> 4 } else { hash[i / 2] & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn address_from_topic(topic: &[u8; 32]) -> String {
    checksum_address(&topic[12..])
}

pub fn is_zero_address(address: &str) -> bool {
    let stripped = address.strip_prefix("0x").unwrap_or(address);
    !stripped.is_empty() && stripped.chars().all(|c| c == '0')
}

// ========================
// Encoding
// ========================

fn padded_len(len: usize) -> usize {
    (len + WORD - 1) / WORD * WORD
}

pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Uint(v) => head.extend_from_slice(&uint_word(*v)),
            Token::Bool(b) => head.extend_from_slice(&uint_word(*b as u128)),
            Token::Address(a) => {
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(a);
                head.extend_from_slice(&word);
            }
            Token::String(s) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
                tail.extend_from_slice(&uint_word(s.len() as u128));
                let start = tail.len();
                tail.extend_from_slice(s.as_bytes());
                tail.resize(start + padded_len(s.len()), 0);
            }
        }
    }

    head.extend_from_slice(&tail);
    head
}

pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode(tokens));
    data
}

// ========================
// Decoding
// ========================

/// Reads ABI words out of return data or log data
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn word_count(&self) -> usize {
        self.data.len() / WORD
    }

    fn word_at(&self, offset: usize) -> Result<&'a [u8], AbiError> {
        let end = offset.checked_add(WORD).ok_or(AbiError::Overflow)?;
        self.data.get(offset..end).ok_or(AbiError::OutOfBounds {
            needed: end,
            len: self.data.len(),
        })
    }

    fn uint_at(&self, offset: usize) -> Result<u128, AbiError> {
        let word = self.word_at(offset)?;
        if word[..16].iter().any(|b| *b != 0) {
            return Err(AbiError::Overflow);
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&word[16..]);
        Ok(u128::from_be_bytes(low))
    }

    pub fn uint(&self, index: usize) -> Result<u128, AbiError> {
        self.uint_at(index * WORD)
    }

    pub fn u64(&self, index: usize) -> Result<u64, AbiError> {
        u64::try_from(self.uint(index)?).map_err(|_| AbiError::Overflow)
    }

    pub fn bool(&self, index: usize) -> Result<bool, AbiError> {
        match self.uint(index) {
            Ok(0) => Ok(false),
            Ok(1) => Ok(true),
            Ok(_) | Err(AbiError::Overflow) => Err(AbiError::InvalidBool),
            Err(e) => Err(e),
        }
    }

    pub fn address(&self, index: usize) -> Result<String, AbiError> {
        let word = self.word_at(index * WORD)?;
        Ok(checksum_address(&word[12..]))
    }

    pub fn string(&self, index: usize) -> Result<String, AbiError> {
        let offset = usize::try_from(self.uint(index)?).map_err(|_| AbiError::Overflow)?;
        let len = usize::try_from(self.uint_at(offset)?).map_err(|_| AbiError::Overflow)?;
        let start = offset + WORD;
        let end = start.checked_add(len).ok_or(AbiError::Overflow)?;
        let bytes = self.data.get(start..end).ok_or(AbiError::OutOfBounds {
            needed: end,
            len: self.data.len(),
        })?;
        String::from_utf8(bytes.to_vec()).map_err(|_| AbiError::InvalidUtf8)
    }
}
