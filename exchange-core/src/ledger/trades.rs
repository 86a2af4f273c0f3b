use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{Row, Sqlite, Transaction};

use crate::error::ExchangeError;
use crate::models::Trade;

use super::Ledger;

impl Ledger {
    pub async fn insert_trade_tx(
        tx: &mut Transaction<'_, Sqlite>,
        buy_order_id: i64,
        sell_order_id: i64,
        market_id: i64,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Trade, ExchangeError> {
        let now = Utc::now();
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO trades (buy_order_id, sell_order_id, market_id, price, amount, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(buy_order_id)
        .bind(sell_order_id)
        .bind(market_id)
        .bind(price.to_string())
        .bind(amount.to_string())
        .bind(now.to_rfc3339())
        .fetch_one(&mut **tx)
        .await?
        .try_get("id")?;

        Ok(Trade {
            id,
            buy_order_id,
            sell_order_id,
            market_id,
            price,
            amount,
            timestamp: now,
        })
    }

    pub async fn insert_fee_tx(
        tx: &mut Transaction<'_, Sqlite>,
        trade_id: i64,
        coin: &str,
        amount: Decimal,
    ) -> Result<(), ExchangeError> {
        sqlx::query("INSERT INTO fees (trade_id, coin, amount) VALUES (?, ?, ?)")
            .bind(trade_id)
            .bind(coin)
            .bind(amount.to_string())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Monotonically increases the per-coin fee pool. Only
    /// `admin::withdraw_fee_pool` may decrease it. The running total is
    /// read and re-added in Rust `Decimal` arithmetic rather than SQL, so a
    /// binary-float round trip through SQLite's arithmetic never touches a
    /// balance-affecting value.
    pub async fn credit_fee_pool_tx(
        tx: &mut Transaction<'_, Sqlite>,
        coin: &str,
        amount: Decimal,
    ) -> Result<(), ExchangeError> {
        let current = Self::get_fee_pool_tx(tx, coin).await?.unwrap_or(Decimal::ZERO);
        let updated = current + amount;

        sqlx::query(
            r#"
            INSERT INTO fee_pool (coin, amount) VALUES (?, ?)
            ON CONFLICT(coin) DO UPDATE SET amount = excluded.amount
            "#,
        )
        .bind(coin)
        .bind(updated.to_string())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Row-locked (within the caller's transaction) debit of the fee pool
    /// for admin fee withdrawal. Fails if insufficient.
    pub async fn debit_fee_pool_tx(
        tx: &mut Transaction<'_, Sqlite>,
        coin: &str,
        amount: Decimal,
    ) -> Result<(), ExchangeError> {
        let current = Self::get_fee_pool_tx(tx, coin).await?.unwrap_or(Decimal::ZERO);
        if current < amount {
            return Err(ExchangeError::InsufficientFunds);
        }

        let updated = current - amount;
        sqlx::query("UPDATE fee_pool SET amount = ? WHERE coin = ?")
            .bind(updated.to_string())
            .bind(coin)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    pub async fn get_fee_pool_tx(
        tx: &mut Transaction<'_, Sqlite>,
        coin: &str,
    ) -> Result<Option<Decimal>, ExchangeError> {
        let row = sqlx::query("SELECT amount FROM fee_pool WHERE coin = ?")
            .bind(coin)
            .fetch_optional(&mut **tx)
            .await?;

        row.map(|row| {
            let amount: String = row.try_get("amount")?;
            amount
                .parse()
                .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt fee_pool amount: {e}")))
        })
        .transpose()
    }

    pub async fn get_fee_pool(&self, coin: &str) -> Result<Decimal, ExchangeError> {
        let row = sqlx::query("SELECT amount FROM fee_pool WHERE coin = ?")
            .bind(coin)
            .fetch_optional(&self.read_pool)
            .await?;

        match row {
            Some(row) => {
                let amount: String = row.try_get("amount")?;
                amount
                    .parse()
                    .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt fee_pool amount: {e}")))
            }
            None => Ok(Decimal::ZERO),
        }
    }
}
