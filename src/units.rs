//! Fixed-Point Units
//!
//! The ledger speaks 18-decimal base units. Everything above the ledger
//! boundary uses human-decimal strings.

use thiserror::Error;

use crate::error::ClientError;

pub const DECIMALS: usize = 18;
const SCALE: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitsError {
    #[error("amount is empty")]
    Empty,
    #[error("'{0}' is not a decimal number")]
    Invalid(String),
    #[error("at most 18 decimal places are supported")]
    TooPrecise,
    #[error("amount is too large")]
    Overflow,
}

impl From<UnitsError> for ClientError {
    fn from(err: UnitsError) -> Self {
        ClientError::Validation(err.to_string())
    }
}

/// Base units to a display string: `1500000000000000000` -> `"1.5"`
pub fn format_units(value: u128) -> String {
    let whole = value / SCALE;
    let frac = value % SCALE;
    let frac = format!("{:0width$}", frac, width = DECIMALS);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{}.0", whole)
    } else {
        format!("{}.{}", whole, frac)
    }
}

/// Display string to base units: `"0.5"` -> `500000000000000000`
pub fn parse_units(input: &str) -> Result<u128, UnitsError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (whole, frac) = match input.split_once('.') {
        Some((w, f)) => (w, f),
        None => (input, ""),
    };
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
        return Err(UnitsError::Invalid(input.to_string()));
    }
    if frac.len() > DECIMALS {
        return Err(UnitsError::TooPrecise);
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| UnitsError::Overflow)?
    };
    let frac: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = DECIMALS);
        padded.parse().map_err(|_| UnitsError::Invalid(input.to_string()))?
    };

    whole
        .checked_mul(SCALE)
        .and_then(|w| w.checked_add(frac))
        .ok_or(UnitsError::Overflow)
}
