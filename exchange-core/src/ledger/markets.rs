use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, Sqlite, Transaction};

use crate::error::ExchangeError;
use crate::models::Market;

use super::Ledger;

fn row_to_market(row: sqlx::sqlite::SqliteRow) -> Result<Market, ExchangeError> {
    let fee_rate: String = row.try_get("fee_rate")?;
    let active: i64 = row.try_get("active")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Market {
        id: row.try_get("id")?,
        base_coin: row.try_get("base_coin")?,
        quote_coin: row.try_get("quote_coin")?,
        fee_rate: fee_rate
            .parse()
            .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt fee_rate: {e}")))?,
        active: active != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt timestamp: {e}")))?,
    })
}

impl Ledger {
    pub async fn get_market(&self, market_id: i64) -> Result<Option<Market>, ExchangeError> {
        let row = sqlx::query(
            "SELECT id, base_coin, quote_coin, fee_rate, active, created_at FROM markets WHERE id = ?",
        )
        .bind(market_id)
        .fetch_optional(&self.read_pool)
        .await?;

        row.map(row_to_market).transpose()
    }

    pub async fn get_market_by_pair(
        &self,
        base: &str,
        quote: &str,
    ) -> Result<Option<Market>, ExchangeError> {
        let row = sqlx::query(
            "SELECT id, base_coin, quote_coin, fee_rate, active, created_at FROM markets WHERE base_coin = ? AND quote_coin = ?",
        )
        .bind(base)
        .bind(quote)
        .fetch_optional(&self.read_pool)
        .await?;

        row.map(row_to_market).transpose()
    }

    pub async fn get_market_tx(
        tx: &mut Transaction<'_, Sqlite>,
        market_id: i64,
    ) -> Result<Option<Market>, ExchangeError> {
        let row = sqlx::query(
            "SELECT id, base_coin, quote_coin, fee_rate, active, created_at FROM markets WHERE id = ?",
        )
        .bind(market_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(row_to_market).transpose()
    }

    /// Returns `Err(Conflict)` carrying the existing market id if (base,
    /// quote) already exists, per spec.md §4.6.
    pub async fn create_market(
        &self,
        base: &str,
        quote: &str,
        fee_rate: Decimal,
    ) -> Result<Market, ExchangeError> {
        if let Some(existing) = self.get_market_by_pair(base, quote).await? {
            return Err(ExchangeError::Conflict(format!(
                "market already exists with id {}",
                existing.id
            )));
        }

        let now = Utc::now();
        let mut conn = self.write_pool.acquire().await?;
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO markets (base_coin, quote_coin, fee_rate, active, created_at)
            VALUES (?, ?, ?, 1, ?)
            RETURNING id
            "#,
        )
        .bind(base)
        .bind(quote)
        .bind(fee_rate.to_string())
        .bind(now.to_rfc3339())
        .fetch_one(&mut *conn)
        .await?
        .try_get("id")?;

        Ok(Market {
            id,
            base_coin: base.to_string(),
            quote_coin: quote.to_string(),
            fee_rate,
            active: true,
            created_at: now,
        })
    }
}
