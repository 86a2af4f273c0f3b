use sqlx::Row;

use crate::error::ExchangeError;

use super::Ledger;

impl Ledger {
    pub async fn get_sync_cursor(&self, coin: &str) -> Result<Option<String>, ExchangeError> {
        let row = sqlx::query("SELECT cursor FROM sync_state WHERE coin = ?")
            .bind(coin)
            .fetch_optional(&self.read_pool)
            .await?;

        row.map(|row| row.try_get("cursor").map_err(ExchangeError::from))
            .transpose()
    }

    pub async fn set_sync_cursor(&self, coin: &str, cursor: &str) -> Result<(), ExchangeError> {
        let mut conn = self.write_pool.acquire().await?;
        sqlx::query(
            r#"
            INSERT INTO sync_state (coin, cursor) VALUES (?, ?)
            ON CONFLICT(coin) DO UPDATE SET cursor = excluded.cursor
            "#,
        )
        .bind(coin)
        .bind(cursor)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
