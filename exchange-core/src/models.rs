//! Entity types shared across the ledger, matching engine, withdrawal
//! coordinator, and deposit sync loop.
//!
//! Enum-valued columns are stored as `TEXT` in SQLite and converted at the
//! ledger boundary (see `ledger::rows`), the same `DbRow -> DomainType`
//! split the teacher uses for `DbNodeRow -> NodeRecord`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub api_key_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: i64,
    pub user_id: i64,
    pub coin: String,
    pub address: String,
    /// Monero: the subaddress index within account 0. `None` for
    /// Bitcoin-family coins.
    pub subaddress_index: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Balance {
    pub user_id: i64,
    pub coin: String,
    pub total: Decimal,
    pub available: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn is_consistent(&self) -> bool {
        self.total == self.available + self.locked
            && self.total >= Decimal::ZERO
            && self.available >= Decimal::ZERO
            && self.locked >= Decimal::ZERO
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Market {
    pub id: i64,
    pub base_coin: String,
    pub quote_coin: String,
    pub fee_rate: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(OrderSide::Buy),
            "sell" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(OrderStatus::Open),
            "partially_filled" => Some(OrderStatus::PartiallyFilled),
            "filled" => Some(OrderStatus::Filled),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    /// The declared transition DAG from spec.md §4.8.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Open, PartiallyFilled) | (Open, Filled) | (Open, Cancelled)
                | (PartiallyFilled, Filled) | (PartiallyFilled, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub market_id: i64,
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub remaining: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub buy_order_id: i64,
    pub sell_order_id: i64,
    pub market_id: i64,
    pub price: Decimal,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Fee {
    pub id: i64,
    pub trade_id: i64,
    pub coin: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FeePool {
    pub coin: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxDirection {
    Received,
    Sent,
}

impl TxDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxDirection::Received => "received",
            TxDirection::Sent => "sent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(TxDirection::Received),
            "sent" => Some(TxDirection::Sent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub id: i64,
    pub user_id: i64,
    pub coin: String,
    pub direction: TxDirection,
    pub txid: String,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncState {
    pub coin: String,
    /// Last observed block hash (Bitcoin-family) or ISO-8601 timestamp
    /// (Monero), whichever the coin's backend uses as its cursor.
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CoinNodeConfig {
    pub coin: String,
    pub kind: String,
    pub rpc_url: String,
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One matching event, returned from `place_order` for the caller's
/// immediate response (`trades:[{price, amount, timestamp}]` in spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSummary {
    pub price: Decimal,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}
