use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::error::ExchangeError;
use crate::models::CoinNodeConfig;

use super::Ledger;

fn row_to_config(row: sqlx::sqlite::SqliteRow) -> Result<CoinNodeConfig, ExchangeError> {
    let enabled: i64 = row.try_get("enabled")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(CoinNodeConfig {
        coin: row.try_get("coin")?,
        kind: row.try_get("kind")?,
        rpc_url: row.try_get("rpc_url")?,
        rpc_user: row.try_get("rpc_user")?,
        rpc_password: row.try_get("rpc_password")?,
        enabled: enabled != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt timestamp: {e}")))?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt timestamp: {e}")))?,
    })
}

impl Ledger {
    pub async fn get_coin_node_config(
        &self,
        coin: &str,
    ) -> Result<Option<CoinNodeConfig>, ExchangeError> {
        let row = sqlx::query(
            "SELECT coin, kind, rpc_url, rpc_user, rpc_password, enabled, created_at, updated_at FROM coin_node_configs WHERE coin = ?",
        )
        .bind(coin)
        .fetch_optional(&self.read_pool)
        .await?;

        row.map(row_to_config).transpose()
    }

    pub async fn list_coin_node_configs(&self) -> Result<Vec<CoinNodeConfig>, ExchangeError> {
        let rows = sqlx::query(
            "SELECT coin, kind, rpc_url, rpc_user, rpc_password, enabled, created_at, updated_at FROM coin_node_configs ORDER BY coin ASC",
        )
        .fetch_all(&self.read_pool)
        .await?;

        rows.into_iter().map(row_to_config).collect()
    }

    pub async fn upsert_coin_node_config(
        &self,
        coin: &str,
        kind: &str,
        rpc_url: &str,
        rpc_user: Option<&str>,
        rpc_password: Option<&str>,
        enabled: bool,
    ) -> Result<CoinNodeConfig, ExchangeError> {
        let now = Utc::now();
        let mut conn = self.write_pool.acquire().await?;
        sqlx::query(
            r#"
            INSERT INTO coin_node_configs (coin, kind, rpc_url, rpc_user, rpc_password, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(coin) DO UPDATE SET
                kind = excluded.kind,
                rpc_url = excluded.rpc_url,
                rpc_user = excluded.rpc_user,
                rpc_password = excluded.rpc_password,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(coin)
        .bind(kind)
        .bind(rpc_url)
        .bind(rpc_user)
        .bind(rpc_password)
        .bind(enabled as i64)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *conn)
        .await?;

        Ok(CoinNodeConfig {
            coin: coin.to_string(),
            kind: kind.to_string(),
            rpc_url: rpc_url.to_string(),
            rpc_user: rpc_user.map(str::to_string),
            rpc_password: rpc_password.map(str::to_string),
            enabled,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn set_coin_node_enabled(
        &self,
        coin: &str,
        enabled: bool,
    ) -> Result<(), ExchangeError> {
        let now = Utc::now();
        let mut conn = self.write_pool.acquire().await?;
        let rows_affected = sqlx::query(
            "UPDATE coin_node_configs SET enabled = ?, updated_at = ? WHERE coin = ?",
        )
        .bind(enabled as i64)
        .bind(now.to_rfc3339())
        .bind(coin)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(ExchangeError::Precondition(format!(
                "no coin-node configured for {coin}"
            )));
        }
        Ok(())
    }

    pub async fn delete_coin_node_config(&self, coin: &str) -> Result<(), ExchangeError> {
        let mut conn = self.write_pool.acquire().await?;
        sqlx::query("DELETE FROM coin_node_configs WHERE coin = ?")
            .bind(coin)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
