//! Withdrawal coordinator: debit-then-dispatch-then-record, with a
//! compensating refund if the coin-node adapter fails.
//!
//! Grounded on `examples/original_source/services/withdrawal_service.py`:
//! validate inputs, row-lock the balance, deduct before calling out to the
//! node (never the other order — an observer must never see funds leave
//! the ledger's belief of custody before the chain accepts them, and the
//! converse is recoverable), then commit with the returned txid or refund
//! and roll back.

use coin_node::CoinNodeAdapter;
use rust_decimal::Decimal;

use crate::decimal::{parse_withdrawal_amount, validate_coin_symbol, validate_withdrawal_address};
use crate::error::ExchangeError;
use crate::ledger::Ledger;
use crate::models::TxDirection;

/// Outcome of a successful withdrawal, mirroring spec.md §6's
/// `{txid, amount, coin, status: success}`.
#[derive(Debug, Clone)]
pub struct WithdrawalReceipt {
    pub txid: String,
    pub amount: Decimal,
    pub coin: String,
}

/// Validate, deduct, dispatch, and record a withdrawal. `amount` is parsed
/// and range-checked by the caller's transport layer via
/// `parse_withdrawal_amount`, but this function re-validates defensively
/// since it is also the library entry point for non-HTTP callers.
pub async fn withdraw(
    ledger: &Ledger,
    adapter: &CoinNodeAdapter,
    user_id: i64,
    coin: &str,
    to_address: &str,
    amount_raw: &str,
) -> Result<WithdrawalReceipt, ExchangeError> {
    validate_coin_symbol(coin)?;
    validate_withdrawal_address(to_address)?;
    let amount = parse_withdrawal_amount(amount_raw)?;

    let _guard = ledger
        .balance_locks
        .acquire(vec![(user_id, coin.to_string())])
        .await;

    let mut tx = ledger.begin_write().await?;

    let mut balance = Ledger::get_or_create_balance_tx(&mut tx, user_id, coin).await?;
    if balance.available < amount {
        tracing::warn!(
            security_event = true,
            user_id,
            coin,
            requested = %amount,
            available = %balance.available,
            "insufficient_balance_withdrawal"
        );
        return Err(ExchangeError::InsufficientFunds);
    }

    balance.available -= amount;
    balance.total -= amount;
    Ledger::save_balance_tx(&mut tx, &balance).await?;

    match adapter.send(to_address, amount).await {
        Ok(result) => {
            Ledger::insert_chain_transaction_tx(
                &mut tx,
                user_id,
                coin,
                TxDirection::Sent,
                &result.txid,
                amount,
                chrono::Utc::now(),
            )
            .await?;
            tx.commit().await?;

            tracing::info!(
                security_event = true,
                user_id,
                coin,
                amount = %amount,
                txid = %result.txid,
                "withdrawal_completed"
            );

            Ok(WithdrawalReceipt {
                txid: result.txid,
                amount,
                coin: coin.to_string(),
            })
        }
        Err(node_error) => {
            // Compensate before the rollback takes effect, matching the
            // teacher's pattern of leaving no window where the in-memory
            // balance and the about-to-be-discarded transaction disagree.
            balance.available += amount;
            balance.total += amount;
            Ledger::save_balance_tx(&mut tx, &balance).await?;
            tx.rollback().await?;

            tracing::warn!(
                security_event = true,
                user_id,
                coin,
                amount = %amount,
                error = %node_error,
                "withdrawal_failed"
            );

            Err(ExchangeError::External(node_error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coin_node::BitcoinRpcClient;

    #[tokio::test]
    async fn insufficient_balance_rejected_without_ledger_effect() {
        let ledger = Ledger::connect_in_memory().await.unwrap();
        let user = ledger.create_user("hash").await.unwrap();
        let adapter = CoinNodeAdapter::BitcoinFamily(BitcoinRpcClient::new(
            "http://localhost:8332",
            "u",
            "p",
        ));

        let result = withdraw(&ledger, &adapter, user.id, "BTC", "bc1qexampleaddressxxxxxxxxx", "1").await;
        assert!(matches!(result, Err(ExchangeError::InsufficientFunds)));

        let balance = ledger.get_balance(user.id, "BTC").await.unwrap();
        assert!(balance.is_none());
    }

    #[tokio::test]
    async fn rejects_out_of_range_amount() {
        let ledger = Ledger::connect_in_memory().await.unwrap();
        let user = ledger.create_user("hash").await.unwrap();
        let adapter = CoinNodeAdapter::BitcoinFamily(BitcoinRpcClient::new(
            "http://localhost:8332",
            "u",
            "p",
        ));

        let result = withdraw(&ledger, &adapter, user.id, "BTC", "bc1qexampleaddressxxxxxxxxx", "0").await;
        assert!(matches!(result, Err(ExchangeError::Validation(_))));
    }

    #[tokio::test]
    async fn rejects_malformed_destination_address() {
        let ledger = Ledger::connect_in_memory().await.unwrap();
        let user = ledger.create_user("hash").await.unwrap();
        let adapter = CoinNodeAdapter::BitcoinFamily(BitcoinRpcClient::new(
            "http://localhost:8332",
            "u",
            "p",
        ));

        let result = withdraw(&ledger, &adapter, user.id, "BTC", "too-short", "1").await;
        assert!(matches!(result, Err(ExchangeError::Validation(_))));
    }
}
