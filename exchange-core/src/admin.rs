//! Admin operations: market creation, fee-pool withdrawal, and coin-node
//! configuration lifecycle.
//!
//! Grounded on `examples/original_source/services/coin_node_service.py` for
//! the coin-node CRUD/enable/disable/test-connect shape, and on
//! `matcher.py`'s `market.fee_rate or Decimal("0.001")` fallback for the
//! default fee rate applied by `create_market` (spec.md §9 Open Question
//! (c): `fee_rate` is an accepted, optional request field).

use coin_node::{CoinNodeAdapter, CoinNodeKind};
use rust_decimal::Decimal;

use crate::decimal::{validate_coin_symbol, DEFAULT_FEE_RATE};
use crate::error::ExchangeError;
use crate::ledger::Ledger;
use crate::models::{CoinNodeConfig, Market};

/// Create a market, defaulting `fee_rate` to `DEFAULT_FEE_RATE` when the
/// caller omits one. Rejects `base == quote` and duplicate pairs.
pub async fn create_market(
    ledger: &Ledger,
    base: &str,
    quote: &str,
    fee_rate: Option<Decimal>,
) -> Result<Market, ExchangeError> {
    validate_coin_symbol(base)?;
    validate_coin_symbol(quote)?;
    if base == quote {
        return Err(ExchangeError::Validation(
            "base and quote coin must differ".to_string(),
        ));
    }

    let fee_rate = fee_rate.unwrap_or(DEFAULT_FEE_RATE);
    if fee_rate.is_sign_negative() {
        return Err(ExchangeError::Validation(
            "fee_rate must be non-negative".to_string(),
        ));
    }

    ledger.create_market(base, quote, fee_rate).await
}

/// Withdraw from the per-coin fee pool. Row-locked via the same
/// `BalanceLocks`-style per-coin exclusion the ledger uses for user
/// balances, keyed under a reserved user id of `0` (no user owns the fee
/// pool) so fee-pool withdrawals serialize against each other without a
/// dedicated lock map.
pub async fn withdraw_fee_pool(
    ledger: &Ledger,
    coin: &str,
    amount: Decimal,
) -> Result<Decimal, ExchangeError> {
    validate_coin_symbol(coin)?;
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(ExchangeError::Validation(
            "withdrawal amount must be positive".to_string(),
        ));
    }

    let _guard = ledger
        .balance_locks
        .acquire(vec![(0, format!("fee_pool:{coin}"))])
        .await;

    let mut tx = ledger.begin_write().await?;
    Ledger::debit_fee_pool_tx(&mut tx, coin, amount).await?;
    tx.commit().await?;

    ledger.get_fee_pool(coin).await
}

/// Create or replace a coin-node configuration and invalidate any cached
/// adapter for that coin so the next lookup rebuilds it with fresh
/// credentials.
pub async fn upsert_coin_node(
    ledger: &Ledger,
    cache: &coin_node::AdapterCache,
    coin: &str,
    kind: CoinNodeKind,
    rpc_url: &str,
    rpc_user: Option<&str>,
    rpc_password: Option<&str>,
) -> Result<CoinNodeConfig, ExchangeError> {
    validate_coin_symbol(coin)?;
    let config = ledger
        .upsert_coin_node_config(coin, kind.as_str(), rpc_url, rpc_user, rpc_password, true)
        .await?;
    cache.invalidate(coin).await;
    Ok(config)
}

pub async fn set_coin_node_enabled(
    ledger: &Ledger,
    cache: &coin_node::AdapterCache,
    coin: &str,
    enabled: bool,
) -> Result<(), ExchangeError> {
    ledger.set_coin_node_enabled(coin, enabled).await?;
    cache.invalidate(coin).await;
    Ok(())
}

pub async fn delete_coin_node(
    ledger: &Ledger,
    cache: &coin_node::AdapterCache,
    coin: &str,
) -> Result<(), ExchangeError> {
    ledger.delete_coin_node_config(coin).await?;
    cache.invalidate(coin).await;
    Ok(())
}

/// Exercise the configured adapter with a read-only capability
/// (`block_height`) to confirm the node is reachable without mutating any
/// state.
pub async fn test_connect(adapter: &CoinNodeAdapter) -> Result<u64, ExchangeError> {
    adapter.block_height().await.map_err(ExchangeError::External)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn create_market_defaults_fee_rate() {
        let ledger = Ledger::connect_in_memory().await.unwrap();
        let market = create_market(&ledger, "BTC", "USDT", None).await.unwrap();
        assert_eq!(market.fee_rate, DEFAULT_FEE_RATE);
    }

    #[tokio::test]
    async fn create_market_rejects_duplicate_pair() {
        let ledger = Ledger::connect_in_memory().await.unwrap();
        create_market(&ledger, "BTC", "USDT", None).await.unwrap();
        let result = create_market(&ledger, "BTC", "USDT", Some(dec!(0.002))).await;
        assert!(matches!(result, Err(ExchangeError::Conflict(_))));
    }

    #[tokio::test]
    async fn create_market_rejects_same_base_and_quote() {
        let ledger = Ledger::connect_in_memory().await.unwrap();
        let result = create_market(&ledger, "BTC", "BTC", None).await;
        assert!(matches!(result, Err(ExchangeError::Validation(_))));
    }

    #[tokio::test]
    async fn fee_pool_withdrawal_rejects_insufficient_balance() {
        let ledger = Ledger::connect_in_memory().await.unwrap();
        let result = withdraw_fee_pool(&ledger, "BTC", dec!(1)).await;
        assert!(matches!(result, Err(ExchangeError::InsufficientFunds)));
    }
}
