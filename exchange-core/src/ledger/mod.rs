//! Durable store of balances, orders, trades, transactions, the fee pool,
//! and addresses. Owns the row-lock and transactional-isolation machinery
//! every other `exchange-core` module builds on.
//!
//! Grounded on the teacher's `monero-rpc-pool::database::Database`: a
//! `SqlitePool` wrapped in a struct whose constructor runs an embedded
//! `CREATE TABLE IF NOT EXISTS` migration, with one inherent method per
//! query. SQLite has no `SELECT ... FOR UPDATE`; row-level exclusivity is
//! instead provided by a single-connection write pool plus `BEGIN
//! IMMEDIATE` transactions (see `Ledger::begin_write`), and
//! same-process callers additionally serialize per-key through
//! `BalanceLocks`/`MarketLeases` below.

pub mod balances;
pub mod coin_nodes;
pub mod identity;
pub mod markets;
pub mod orders;
pub mod sync_state;
pub mod trades;
pub mod transactions;

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::ExchangeError;

/// Canonical per-(user, coin) exclusive lock, acquired before any balance
/// arithmetic. A request that touches multiple balances (buyer + seller,
/// two coins) must acquire these in `(user_id, coin)` lexicographic order
/// to prevent deadlocks, exactly as spec.md §5 requires.
#[derive(Clone, Default)]
pub struct BalanceLocks {
    inner: Arc<Mutex<HashMap<(i64, String), Arc<Mutex<()>>>>>,
}

impl BalanceLocks {
    fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, user_id: i64, coin: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().await;
        map.entry((user_id, coin.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire exclusive guards for every `(user_id, coin)` key, sorted into
    /// canonical order first so concurrent callers touching overlapping key
    /// sets never deadlock against each other.
    pub async fn acquire(&self, mut keys: Vec<(i64, String)>) -> Vec<OwnedMutexGuard<()>> {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for (user_id, coin) in keys {
            let lock = self.lock_for(user_id, &coin).await;
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}

/// Per-market exclusive lease for the matching engine. Acquired before the
/// matching pass begins and released by dropping the guard when the
/// transaction ends — there is no other release path, per spec.md §9.
#[derive(Clone, Default)]
pub struct MarketLeases {
    inner: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl MarketLeases {
    fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, market_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(market_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct Ledger {
    /// Single-connection pool used for every balance-mutating transaction,
    /// standing in for row-level locking: at most one write transaction is
    /// ever in flight, serialized by the pool itself.
    write_pool: SqlitePool,
    /// Unbounded read pool for queries that don't mutate state.
    read_pool: SqlitePool,
    pub balance_locks: BalanceLocks,
    pub market_leases: MarketLeases,
}

impl Ledger {
    pub async fn connect(database_url: &str) -> Result<Self, ExchangeError> {
        let options: SqliteConnectOptions = database_url
            .parse::<SqliteConnectOptions>()
            .map_err(|e| ExchangeError::Internal(anyhow::anyhow!(e)))?
            .create_if_missing(true);

        let write_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        let read_pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let ledger = Self {
            write_pool,
            read_pool,
            balance_locks: BalanceLocks::new(),
            market_leases: MarketLeases::new(),
        };
        ledger.migrate().await?;
        Ok(ledger)
    }

    pub async fn connect_in_memory() -> Result<Self, ExchangeError> {
        Self::connect("sqlite::memory:").await
    }

    pub fn read_pool(&self) -> &SqlitePool {
        &self.read_pool
    }

    /// Begin a write transaction. SQLite upgrades the underlying connection
    /// lock to a write lock at the first write statement; `BEGIN IMMEDIATE`
    /// takes it up front instead, the SQLite analogue of starting at
    /// `REPEATABLE READ` rather than racing to upgrade from a read lock.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, ExchangeError> {
        let mut tx = self.write_pool.begin().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *tx).await.ok();
        Ok(tx)
    }

    async fn migrate(&self) -> Result<(), ExchangeError> {
        let mut conn = self.write_pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                api_key_hash TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS addresses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                coin TEXT NOT NULL,
                address TEXT NOT NULL UNIQUE,
                subaddress_index INTEGER,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_addresses_user ON addresses(user_id, coin)")
            .execute(&mut *conn)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balances (
                user_id INTEGER NOT NULL REFERENCES users(id),
                coin TEXT NOT NULL,
                total TEXT NOT NULL,
                available TEXT NOT NULL,
                locked TEXT NOT NULL,
                PRIMARY KEY (user_id, coin),
                CHECK (CAST(total AS REAL) >= 0),
                CHECK (CAST(available AS REAL) >= 0),
                CHECK (CAST(locked AS REAL) >= 0)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS markets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                base_coin TEXT NOT NULL,
                quote_coin TEXT NOT NULL,
                fee_rate TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (base_coin, quote_coin)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                market_id INTEGER NOT NULL REFERENCES markets(id),
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                amount TEXT NOT NULL,
                remaining TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_orders_market_side_status ON orders(market_id, side, status)",
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                buy_order_id INTEGER NOT NULL REFERENCES orders(id),
                sell_order_id INTEGER NOT NULL REFERENCES orders(id),
                market_id INTEGER NOT NULL REFERENCES markets(id),
                price TEXT NOT NULL,
                amount TEXT NOT NULL,
                timestamp TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fees (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id INTEGER NOT NULL REFERENCES trades(id),
                coin TEXT NOT NULL,
                amount TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fee_pool (
                coin TEXT PRIMARY KEY,
                amount TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chain_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                coin TEXT NOT NULL,
                direction TEXT NOT NULL,
                txid TEXT NOT NULL UNIQUE,
                amount TEXT NOT NULL,
                timestamp TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                coin TEXT PRIMARY KEY,
                cursor TEXT
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS coin_node_configs (
                coin TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                rpc_url TEXT NOT NULL,
                rpc_user TEXT,
                rpc_password TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        tracing::info!("ledger migration completed");
        Ok(())
    }
}
