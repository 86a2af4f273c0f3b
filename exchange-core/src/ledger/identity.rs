use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::error::ExchangeError;
use crate::models::User;

use super::Ledger;

impl Ledger {
    pub async fn create_user(&self, api_key_hash: &str) -> Result<User, ExchangeError> {
        let now = Utc::now();
        let mut conn = self.write_pool.acquire().await?;
        let id: i64 = sqlx::query(
            "INSERT INTO users (api_key_hash, created_at) VALUES (?, ?) RETURNING id",
        )
        .bind(api_key_hash)
        .bind(now.to_rfc3339())
        .fetch_one(&mut *conn)
        .await?
        .try_get("id")?;

        Ok(User {
            id,
            api_key_hash: api_key_hash.to_string(),
            created_at: now,
        })
    }

    pub async fn get_user_by_key_hash(
        &self,
        api_key_hash: &str,
    ) -> Result<Option<User>, ExchangeError> {
        let row = sqlx::query("SELECT id, api_key_hash, created_at FROM users WHERE api_key_hash = ?")
            .bind(api_key_hash)
            .fetch_optional(&self.read_pool)
            .await?;

        row.map(|row| {
            let created_at: String = row.try_get("created_at")?;
            Ok(User {
                id: row.try_get("id")?,
                api_key_hash: row.try_get("api_key_hash")?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| ExchangeError::Internal(anyhow::anyhow!("corrupt timestamp: {e}")))?,
            })
        })
        .transpose()
    }

    pub async fn insert_address(
        &self,
        user_id: i64,
        coin: &str,
        address: &str,
        subaddress_index: Option<i64>,
    ) -> Result<crate::models::Address, ExchangeError> {
        let now = Utc::now();
        let mut conn = self.write_pool.acquire().await?;
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO addresses (user_id, coin, address, subaddress_index, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(coin)
        .bind(address)
        .bind(subaddress_index)
        .bind(now.to_rfc3339())
        .fetch_one(&mut *conn)
        .await?
        .try_get("id")?;

        Ok(crate::models::Address {
            id,
            user_id,
            coin: coin.to_string(),
            address: address.to_string(),
            subaddress_index,
            created_at: now,
        })
    }

    pub async fn list_addresses(
        &self,
        user_id: i64,
        coin: Option<&str>,
    ) -> Result<Vec<crate::models::Address>, ExchangeError> {
        let rows = if let Some(coin) = coin {
            sqlx::query(
                "SELECT id, user_id, coin, address, subaddress_index, created_at FROM addresses WHERE user_id = ? AND coin = ? ORDER BY id ASC LIMIT 100",
            )
            .bind(user_id)
            .bind(coin)
            .fetch_all(&self.read_pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, user_id, coin, address, subaddress_index, created_at FROM addresses WHERE user_id = ? ORDER BY id ASC LIMIT 100",
            )
            .bind(user_id)
            .fetch_all(&self.read_pool)
            .await?
        };

        rows.into_iter()
            .map(|row| {
                let created_at: String = row.try_get("created_at")?;
                Ok(crate::models::Address {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    coin: row.try_get("coin")?,
                    address: row.try_get("address")?,
                    subaddress_index: row.try_get("subaddress_index")?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| {
                            ExchangeError::Internal(anyhow::anyhow!("corrupt timestamp: {e}"))
                        })?,
                })
            })
            .collect()
    }

    /// Resolve the owning user of a Bitcoin-family deposit by address.
    pub async fn find_user_by_address(
        &self,
        coin: &str,
        address: &str,
    ) -> Result<Option<i64>, ExchangeError> {
        let row = sqlx::query("SELECT user_id FROM addresses WHERE coin = ? AND address = ?")
            .bind(coin)
            .bind(address)
            .fetch_optional(&self.read_pool)
            .await?;
        row.map(|row| row.try_get("user_id").map_err(ExchangeError::from))
            .transpose()
    }

    /// Resolve the owning user of a Monero deposit by subaddress index
    /// within account 0.
    pub async fn find_user_by_subaddress_index(
        &self,
        coin: &str,
        subaddress_index: i64,
    ) -> Result<Option<i64>, ExchangeError> {
        let row = sqlx::query(
            "SELECT user_id FROM addresses WHERE coin = ? AND subaddress_index = ?",
        )
        .bind(coin)
        .bind(subaddress_index)
        .fetch_optional(&self.read_pool)
        .await?;
        row.map(|row| row.try_get("user_id").map_err(ExchangeError::from))
            .transpose()
    }
}
