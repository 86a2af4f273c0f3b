use rust_decimal::Decimal;
use sqlx::{Row, Sqlite, Transaction};

use crate::error::ExchangeError;
use crate::models::Balance;

use super::Ledger;

impl Ledger {
    /// Fetch a balance without creating it. Used for read-only queries
    /// (`get-balances`) that must not have the side effect of materializing
    /// a zero row.
    pub async fn get_balance(
        &self,
        user_id: i64,
        coin: &str,
    ) -> Result<Option<Balance>, ExchangeError> {
        let row = sqlx::query("SELECT user_id, coin, total, available, locked FROM balances WHERE user_id = ? AND coin = ?")
            .bind(user_id)
            .bind(coin)
            .fetch_optional(&self.read_pool)
            .await?;

        Ok(match row {
            Some(row) => Some(row_to_balance(row)?),
            None => None,
        })
    }

    pub async fn list_balances(&self, user_id: i64) -> Result<Vec<Balance>, ExchangeError> {
        let rows = sqlx::query(
            "SELECT user_id, coin, total, available, locked FROM balances WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.read_pool)
        .await?;

        rows.into_iter().map(row_to_balance).collect()
    }

    /// Fetch-or-create the (user, coin) balance row inside an open write
    /// transaction. The caller must already hold the `BalanceLocks` guard
    /// for this key before calling.
    pub async fn get_or_create_balance_tx(
        tx: &mut Transaction<'_, Sqlite>,
        user_id: i64,
        coin: &str,
    ) -> Result<Balance, ExchangeError> {
        let row = sqlx::query(
            "SELECT user_id, coin, total, available, locked FROM balances WHERE user_id = ? AND coin = ?",
        )
        .bind(user_id)
        .bind(coin)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(row) = row {
            return row_to_balance(row);
        }

        sqlx::query(
            "INSERT INTO balances (user_id, coin, total, available, locked) VALUES (?, ?, '0', '0', '0')",
        )
        .bind(user_id)
        .bind(coin)
        .execute(&mut **tx)
        .await?;

        Ok(Balance {
            user_id,
            coin: coin.to_string(),
            total: Decimal::ZERO,
            available: Decimal::ZERO,
            locked: Decimal::ZERO,
        })
    }

    /// Persist a balance inside an open write transaction, re-validating
    /// the invariant immediately before the write. A violation aborts the
    /// transaction with `ExchangeError::Integrity`; it is never silently
    /// corrected.
    pub async fn save_balance_tx(
        tx: &mut Transaction<'_, Sqlite>,
        balance: &Balance,
    ) -> Result<(), ExchangeError> {
        if !balance.is_consistent() {
            return Err(ExchangeError::Integrity {
                user_id: balance.user_id,
                coin: balance.coin.clone(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO balances (user_id, coin, total, available, locked)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, coin) DO UPDATE SET
                total = excluded.total,
                available = excluded.available,
                locked = excluded.locked
            "#,
        )
        .bind(balance.user_id)
        .bind(&balance.coin)
        .bind(balance.total.to_string())
        .bind(balance.available.to_string())
        .bind(balance.locked.to_string())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

fn row_to_balance(row: sqlx::sqlite::SqliteRow) -> Result<Balance, ExchangeError> {
    let total: String = row.try_get("total")?;
    let available: String = row.try_get("available")?;
    let locked: String = row.try_get("locked")?;

    Ok(Balance {
        user_id: row.try_get("user_id")?,
        coin: row.try_get("coin")?,
        total: total
            .parse()
            .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt total decimal: {e}")))?,
        available: available
            .parse()
            .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt available decimal: {e}")))?,
        locked: locked
            .parse()
            .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt locked decimal: {e}")))?,
    })
}
