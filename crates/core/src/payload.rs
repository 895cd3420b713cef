//! Deposit payload decoding.
//!
//! A fungible deposit payload is ABI laid out as
//! `amount (32 bytes) | recipient length (32 bytes) | recipient bytes`.
//! Amounts are rendered with a fixed 18 decimal convention regardless of
//! the resource's own decimals.

use primitive_types::U256;

use crate::error::{DomainError, DomainResult};

/// Decimals used to render deposit amounts.
pub const DEPOSIT_AMOUNT_DECIMALS: u8 = 18;

/// Decode the amount from the first 32 bytes of a deposit payload.
///
/// `1000000000000000000` renders as `"1.0"`.
pub fn decode_amount(deposit_data: &[u8]) -> DomainResult<String> {
    let word = deposit_data.get(..32).ok_or_else(|| {
        DomainError::DecodingError(format!(
            "deposit payload too short for amount: {} bytes",
            deposit_data.len()
        ))
    })?;
    format_units(U256::from_big_endian(word), DEPOSIT_AMOUNT_DECIMALS)
}

/// Recipient address carried after the amount and length words.
///
/// Returns `"0x"` followed by every payload byte from offset 64 on.
pub fn destination_address(deposit_data: &[u8]) -> String {
    let tail = deposit_data.get(64..).unwrap_or_default();
    format!("0x{}", hex::encode(tail))
}

/// Parse a deposit nonce, stripping thousands separators (`"1,024"`).
pub fn normalize_nonce(raw: &str) -> DomainResult<u64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '_') && !c.is_whitespace())
        .collect();
    cleaned
        .parse()
        .map_err(|_| DomainError::DecodingError(format!("invalid deposit nonce: {raw}")))
}

/// Render an integer amount with `decimals` fractional digits.
///
/// Trailing zeros are trimmed but one fractional digit is always kept.
pub fn format_units(value: U256, decimals: u8) -> DomainResult<String> {
    let base = U256::from(10u8)
        .checked_pow(U256::from(decimals))
        .ok_or_else(|| DomainError::ValidationError(format!("decimals too large: {decimals}")))?;
    let (integer, fraction) = value.div_mod(base);

    if decimals == 0 {
        return Ok(format!("{integer}.0"));
    }

    let fraction = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    let fraction = fraction.trim_end_matches('0');
    let fraction = if fraction.is_empty() { "0" } else { fraction };
    Ok(format!("{integer}.{fraction}"))
}

/// Render a revert reason as text when it is printable ASCII, as hex otherwise.
pub fn error_message(bytes: &[u8]) -> String {
    let printable = bytes
        .iter()
        .all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace());
    if printable {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        format!("0x{}", hex::encode(bytes))
    }
}
