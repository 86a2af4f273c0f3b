use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One piconero per `ATOMIC_UNITS_PER_XMR`-th of an XMR.
pub const ATOMIC_UNITS_PER_XMR: i128 = 1_000_000_000_000;

/// A freshly issued receive address, bound to one user by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAddress {
    pub address: String,
    /// Monero only: the subaddress index within account 0. `None` for
    /// Bitcoin-family coins, whose addresses need no extra lookup key.
    pub subaddress_index: Option<u32>,
}

/// The outcome of a successful broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub txid: String,
}

/// One inbound transfer as reported by a node, normalized across backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// On-chain transaction id.
    pub txid: String,
    /// Amount in the coin's canonical decimal representation (already
    /// converted out of atomic units for Monero).
    pub amount: Decimal,
    pub confirmations: u32,
    /// Bitcoin-family: the receiving address string. Monero: absent, use
    /// `subaddress_index` instead.
    pub address: Option<String>,
    /// Monero only: the minor (subaddress) index within account 0.
    pub subaddress_index: Option<u32>,
    /// Bitcoin-family: the block hash the transfer was confirmed in, used to
    /// advance the sync cursor. Monero has no equivalent; the cursor there is
    /// the transfer timestamp.
    pub block_hash: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Cursor for the deposit sync loop, persisted by the caller between passes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum SyncCursor {
    #[default]
    None,
    BlockHash(String),
    Timestamp(chrono::DateTime<chrono::Utc>),
}
