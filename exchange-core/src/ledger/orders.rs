use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, Sqlite, Transaction};

use crate::error::ExchangeError;
use crate::models::{Order, OrderSide, OrderStatus};

use super::Ledger;

fn row_to_order(row: sqlx::sqlite::SqliteRow) -> Result<Order, ExchangeError> {
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;
    let price: String = row.try_get("price")?;
    let amount: String = row.try_get("amount")?;
    let remaining: String = row.try_get("remaining")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Order {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        market_id: row.try_get("market_id")?,
        side: OrderSide::parse(&side)
            .ok_or_else(|| ExchangeError::Internal(anyhow::anyhow!("corrupt order side: {side}")))?,
        price: price
            .parse()
            .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt order price: {e}")))?,
        amount: amount
            .parse()
            .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt order amount: {e}")))?,
        remaining: remaining
            .parse()
            .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt order remaining: {e}")))?,
        status: OrderStatus::parse(&status).ok_or_else(|| {
            ExchangeError::Internal(anyhow::anyhow!("corrupt order status: {status}"))
        })?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ExchangeError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt timestamp: {e}")))
}

impl Ledger {
    pub async fn insert_order_tx(
        tx: &mut Transaction<'_, Sqlite>,
        user_id: i64,
        market_id: i64,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Order, ExchangeError> {
        let now = Utc::now();
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO orders (user_id, market_id, side, price, amount, remaining, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'open', ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(market_id)
        .bind(side.as_str())
        .bind(price.to_string())
        .bind(amount.to_string())
        .bind(amount.to_string())
        .bind(now.to_rfc3339())
        .fetch_one(&mut **tx)
        .await?
        .try_get("id")?;

        Ok(Order {
            id,
            user_id,
            market_id,
            side,
            price,
            amount,
            remaining: amount,
            status: OrderStatus::Open,
            created_at: now,
        })
    }

    pub async fn get_order(&self, order_id: i64) -> Result<Option<Order>, ExchangeError> {
        let row = sqlx::query(
            "SELECT id, user_id, market_id, side, price, amount, remaining, status, created_at FROM orders WHERE id = ?",
        )
        .bind(order_id)
        .fetch_optional(&self.read_pool)
        .await?;

        row.map(row_to_order).transpose()
    }

    pub async fn get_order_tx(
        tx: &mut Transaction<'_, Sqlite>,
        order_id: i64,
    ) -> Result<Option<Order>, ExchangeError> {
        let row = sqlx::query(
            "SELECT id, user_id, market_id, side, price, amount, remaining, status, created_at FROM orders WHERE id = ?",
        )
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(row_to_order).transpose()
    }

    /// Read-only variant of `open_buy_orders_tx` for callers (the public
    /// orderbook endpoint) that don't need a write transaction.
    pub async fn open_buy_orders(&self, market_id: i64) -> Result<Vec<Order>, ExchangeError> {
        // CAST(... AS REAL) is a sort key only, never arithmetic: every
        // stored price is quantize()d to a fixed 8-digit scale first, so
        // two textually-distinct prices can't collide after the cast.
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, market_id, side, price, amount, remaining, status, created_at
            FROM orders
            WHERE market_id = ? AND side = 'buy' AND status IN ('open', 'partially_filled')
            ORDER BY CAST(price AS REAL) DESC, created_at ASC, id ASC
            "#,
        )
        .bind(market_id)
        .fetch_all(&self.read_pool)
        .await?;

        rows.into_iter().map(row_to_order).collect()
    }

    /// Read-only variant of `open_sell_orders_tx`.
    pub async fn open_sell_orders(&self, market_id: i64) -> Result<Vec<Order>, ExchangeError> {
        // See the comment in `open_buy_orders`: the cast is a sort key only.
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, market_id, side, price, amount, remaining, status, created_at
            FROM orders
            WHERE market_id = ? AND side = 'sell' AND status IN ('open', 'partially_filled')
            ORDER BY CAST(price AS REAL) ASC, created_at ASC, id ASC
            "#,
        )
        .bind(market_id)
        .fetch_all(&self.read_pool)
        .await?;

        rows.into_iter().map(row_to_order).collect()
    }

    /// Buy orders sorted by (price desc, creation asc); ties broken by id
    /// ascending for determinism, as spec.md §4.3 requires.
    pub async fn open_buy_orders_tx(
        tx: &mut Transaction<'_, Sqlite>,
        market_id: i64,
    ) -> Result<Vec<Order>, ExchangeError> {
        // See the comment in `open_buy_orders`: the cast is a sort key only.
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, market_id, side, price, amount, remaining, status, created_at
            FROM orders
            WHERE market_id = ? AND side = 'buy' AND status IN ('open', 'partially_filled')
            ORDER BY CAST(price AS REAL) DESC, created_at ASC, id ASC
            "#,
        )
        .bind(market_id)
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter().map(row_to_order).collect()
    }

    /// Sell orders sorted by (price asc, creation asc); ties broken by id
    /// ascending.
    pub async fn open_sell_orders_tx(
        tx: &mut Transaction<'_, Sqlite>,
        market_id: i64,
    ) -> Result<Vec<Order>, ExchangeError> {
        // See the comment in `open_buy_orders`: the cast is a sort key only.
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, market_id, side, price, amount, remaining, status, created_at
            FROM orders
            WHERE market_id = ? AND side = 'sell' AND status IN ('open', 'partially_filled')
            ORDER BY CAST(price AS REAL) ASC, created_at ASC, id ASC
            "#,
        )
        .bind(market_id)
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter().map(row_to_order).collect()
    }

    pub async fn update_order_progress_tx(
        tx: &mut Transaction<'_, Sqlite>,
        order_id: i64,
        remaining: Decimal,
        status: OrderStatus,
    ) -> Result<(), ExchangeError> {
        sqlx::query("UPDATE orders SET remaining = ?, status = ? WHERE id = ?")
            .bind(remaining.to_string())
            .bind(status.as_str())
            .bind(order_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn cancel_order_tx(
        tx: &mut Transaction<'_, Sqlite>,
        order_id: i64,
    ) -> Result<(), ExchangeError> {
        sqlx::query("UPDATE orders SET status = 'cancelled' WHERE id = ?")
            .bind(order_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}
