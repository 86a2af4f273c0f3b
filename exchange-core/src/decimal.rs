//! Fixed-point decimal helpers. Every monetary value that can affect a
//! balance or fee is a `rust_decimal::Decimal` quantized to 8 fractional
//! digits; binary floating point never enters a computation that touches a
//! balance.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::ExchangeError;

pub const SCALE: u32 = 8;
pub const MIN_WITHDRAWAL_AMOUNT: Decimal = dec!(0.00000001);
pub const MAX_WITHDRAWAL_AMOUNT: Decimal = dec!(1000000);
pub const DEFAULT_FEE_RATE: Decimal = dec!(0.001);

/// Quantize to the canonical 8 fractional digits used throughout the ledger.
pub fn quantize(amount: Decimal) -> Decimal {
    amount.round_dp(SCALE)
}

/// Parse a decimal wire value, validating it quantizes cleanly (no more than
/// 8 fractional digits after rounding-trip) and is non-negative.
pub fn parse_amount(raw: &str) -> Result<Decimal, ExchangeError> {
    let parsed: Decimal = raw
        .parse()
        .map_err(|_| ExchangeError::Validation(format!("invalid decimal amount: {raw}")))?;

    if parsed.is_sign_negative() {
        return Err(ExchangeError::Validation(
            "amount must be non-negative".to_string(),
        ));
    }

    Ok(quantize(parsed))
}

/// Parse and validate a withdrawal amount is within `[10^-8, 10^6]` and
/// quantized to 8 fractional digits, per the withdrawal coordinator's
/// preconditions.
pub fn parse_withdrawal_amount(raw: &str) -> Result<Decimal, ExchangeError> {
    let amount = parse_amount(raw)?;

    if amount < MIN_WITHDRAWAL_AMOUNT || amount > MAX_WITHDRAWAL_AMOUNT {
        return Err(ExchangeError::Validation(format!(
            "amount {amount} outside of allowed range [{MIN_WITHDRAWAL_AMOUNT}, {MAX_WITHDRAWAL_AMOUNT}]"
        )));
    }

    Ok(amount)
}

/// Coin symbols are 1-10 uppercase alphanumeric characters.
pub fn validate_coin_symbol(symbol: &str) -> Result<(), ExchangeError> {
    let valid = !symbol.is_empty()
        && symbol.len() <= 10
        && symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(ExchangeError::Validation(format!(
            "invalid coin symbol: {symbol}"
        )))
    }
}

/// Syntactic check for a withdrawal destination address: 20-100 characters,
/// restricted to the charset real addresses (base58, bech32, base64-ish
/// integrated addresses) are drawn from. Not coin-specific checksum
/// validation, just enough to reject garbage before it reaches the node.
pub fn validate_withdrawal_address(address: &str) -> Result<(), ExchangeError> {
    let len = address.len();
    let valid = (20..=100).contains(&len)
        && address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(ExchangeError::Validation(
            "destination address must be 20-100 characters from [a-zA-Z0-9+/=_-]".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantizes_to_eight_digits() {
        let amount: Decimal = "1.123456789".parse().unwrap();
        assert_eq!(quantize(amount).to_string(), "1.12345679");
    }

    #[test]
    fn rejects_negative_amounts() {
        assert!(parse_amount("-1").is_err());
    }

    #[test]
    fn rejects_out_of_range_withdrawal() {
        assert!(parse_withdrawal_amount("0").is_err());
        assert!(parse_withdrawal_amount("1000001").is_err());
        assert!(parse_withdrawal_amount("10").is_ok());
    }

    #[test]
    fn validates_coin_symbols() {
        assert!(validate_coin_symbol("BTC").is_ok());
        assert!(validate_coin_symbol("USDT2").is_ok());
        assert!(validate_coin_symbol("").is_err());
        assert!(validate_coin_symbol("btc").is_err());
        assert!(validate_coin_symbol("TOOLONGSYMBOL1").is_err());
    }

    #[test]
    fn validates_withdrawal_addresses() {
        assert!(validate_withdrawal_address("bc1qexampleaddressxxxxxxxxx").is_ok());
        assert!(validate_withdrawal_address("too-short").is_err());
        assert!(validate_withdrawal_address(&"a".repeat(101)).is_err());
        assert!(validate_withdrawal_address(&format!("{}!", "a".repeat(20))).is_err());
    }
}
