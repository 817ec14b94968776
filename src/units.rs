use ethers::{
    types::U256,
    utils::{
        format_ether,
        parse_ether,
    },
};
use thiserror::Error;

const ETHER_DECIMALS: usize = 18;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("enter an amount")]
    Empty,
    #[error("'{0}' is not a valid ether amount")]
    Invalid(String),
    #[error("amount must be greater than zero")]
    Zero,
    #[error("at most {ETHER_DECIMALS} decimal places are supported")]
    TooPrecise,
}

/// Parse a user-entered ether amount (e.g. `1.5`) into wei.
pub fn parse_amount(input: &str) -> Result<U256, AmountError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };
    let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty())
        || !digits_only(whole)
        || !digits_only(fraction)
    {
        return Err(AmountError::Invalid(trimmed.to_string()));
    }
    if fraction.len() > ETHER_DECIMALS {
        return Err(AmountError::TooPrecise);
    }

    let whole = if whole.is_empty() { "0" } else { whole };
    let normalized = if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    };
    let wei =
        parse_ether(&normalized).map_err(|_| AmountError::Invalid(trimmed.to_string()))?;
    if wei.is_zero() {
        return Err(AmountError::Zero);
    }
    Ok(wei)
}

/// Render wei as ether without trailing zeros, keeping one decimal (`3.0`).
pub fn format_amount(wei: U256) -> String {
    let full = format_ether(wei);
    match full.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                format!("{whole}.0")
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => format!("{full}.0"),
    }
}
