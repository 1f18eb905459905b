//! Conversions between human-readable decimal strings and fixed-point amounts.

use super::{Amount, MAX_DECIMALS};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digits in amount: {0:?}")]
    InvalidDigits(String),
    #[error("amount has more than {decimals} fractional digits")]
    TooManyDecimals { decimals: u8 },
    #[error("amount does not fit in 128 bits")]
    Overflow,
}

/// Parses `"12.5"` into `12.5 * 10^decimals` base units.
pub fn parse_units(text: &str, decimals: u8) -> Result<Amount, UnitsError> {
    let text = text.trim();
    let (whole, frac) = text.split_once('.').unwrap_or((text, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::Empty);
    }
    if decimals > MAX_DECIMALS {
        return Err(UnitsError::Overflow);
    }
    if frac.len() > usize::from(decimals) {
        return Err(UnitsError::TooManyDecimals { decimals });
    }

    let scale = 10u128.pow(u32::from(decimals));
    let whole = parse_digits(whole)?;
    let frac_scale = 10u128.pow((usize::from(decimals) - frac.len()) as u32);
    let frac = parse_digits(frac)?
        .checked_mul(frac_scale)
        .ok_or(UnitsError::Overflow)?;

    whole
        .checked_mul(scale)
        .and_then(|value| value.checked_add(frac))
        .ok_or(UnitsError::Overflow)
}

/// Renders base units as a decimal string without trailing fractional zeros.
pub fn format_units(amount: Amount, decimals: u8) -> String {
    let (whole, frac) = match 10u128.checked_pow(u32::from(decimals)) {
        Some(scale) => (amount / scale, amount % scale),
        None => (0, amount),
    };
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{frac:0width$}", width = usize::from(decimals));
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

fn parse_digits(digits: &str) -> Result<Amount, UnitsError> {
    if digits.is_empty() {
        return Ok(0);
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UnitsError::InvalidDigits(digits.to_string()));
    }
    digits.parse().map_err(|_| UnitsError::Overflow)
}
