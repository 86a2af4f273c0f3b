use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, Sqlite, Transaction};

use crate::error::ExchangeError;
use crate::models::{ChainTransaction, TxDirection};

use super::Ledger;

impl Ledger {
    /// Insert an on-chain transaction row. Returns `Ok(None)` (not an
    /// error) if the txid already exists — the deposit sync loop's
    /// idempotent-dedup case from spec.md §4.5/§4.9.
    pub async fn insert_chain_transaction_tx(
        tx: &mut Transaction<'_, Sqlite>,
        user_id: i64,
        coin: &str,
        direction: TxDirection,
        txid: &str,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<ChainTransaction>, ExchangeError> {
        if Self::chain_transaction_exists_tx(tx, txid).await? {
            return Ok(None);
        }

        let id: i64 = sqlx::query(
            r#"
            INSERT INTO chain_transactions (user_id, coin, direction, txid, amount, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(coin)
        .bind(direction.as_str())
        .bind(txid)
        .bind(amount.to_string())
        .bind(timestamp.to_rfc3339())
        .fetch_one(&mut **tx)
        .await?
        .try_get("id")?;

        Ok(Some(ChainTransaction {
            id,
            user_id,
            coin: coin.to_string(),
            direction,
            txid: txid.to_string(),
            amount,
            timestamp,
        }))
    }

    pub async fn chain_transaction_exists_tx(
        tx: &mut Transaction<'_, Sqlite>,
        txid: &str,
    ) -> Result<bool, ExchangeError> {
        let row = sqlx::query("SELECT 1 as present FROM chain_transactions WHERE txid = ?")
            .bind(txid)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.is_some())
    }
}
