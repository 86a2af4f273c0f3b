//! Uniform adapter over coin-specific node RPC backends.
//!
//! The capability set (`new_receive_address`, `send`, `list_recent_receipts`,
//! `block_height`) is represented as a tagged enum over two concrete clients,
//! not a trait-object hierarchy: the variant set is closed and the two
//! backends disagree on amount representation (decimal vs. atomic integer),
//! which is converted at the boundary here and never leaked inward.

pub mod bitcoin_rpc;
pub mod error;
pub mod monero_rpc;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::RwLock;

pub use bitcoin_rpc::BitcoinRpcClient;
pub use error::CoinNodeError;
pub use monero_rpc::MoneroRpcClient;
pub use types::{NewAddress, Receipt, SendResult};

/// Which wire protocol a coin's node speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoinNodeKind {
    BitcoinFamily,
    Monero,
}

impl CoinNodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoinNodeKind::BitcoinFamily => "bitcoin_family",
            CoinNodeKind::Monero => "monero",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bitcoin_family" => Some(CoinNodeKind::BitcoinFamily),
            "monero" => Some(CoinNodeKind::Monero),
            _ => None,
        }
    }
}

/// A coin-node adapter, one variant per backend protocol.
#[derive(Clone)]
pub enum CoinNodeAdapter {
    BitcoinFamily(BitcoinRpcClient),
    Monero(MoneroRpcClient),
}

impl CoinNodeAdapter {
    pub fn kind(&self) -> CoinNodeKind {
        match self {
            CoinNodeAdapter::BitcoinFamily(_) => CoinNodeKind::BitcoinFamily,
            CoinNodeAdapter::Monero(_) => CoinNodeKind::Monero,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        match self {
            CoinNodeAdapter::BitcoinFamily(c) => CoinNodeAdapter::BitcoinFamily(c.with_timeout(timeout)),
            CoinNodeAdapter::Monero(c) => CoinNodeAdapter::Monero(c.with_timeout(timeout)),
        }
    }

    pub async fn new_receive_address(&self, label: &str) -> Result<NewAddress, CoinNodeError> {
        match self {
            CoinNodeAdapter::BitcoinFamily(c) => c.new_receive_address().await,
            CoinNodeAdapter::Monero(c) => c.create_subaddress(label).await,
        }
    }

    /// `amount` is always the coin's canonical decimal representation,
    /// quantized to 8 fractional digits; atomic conversion for Monero
    /// happens inside this call.
    pub async fn send(&self, address: &str, amount: Decimal) -> Result<SendResult, CoinNodeError> {
        match self {
            CoinNodeAdapter::BitcoinFamily(c) => c.send(address, amount).await,
            CoinNodeAdapter::Monero(c) => c.send(address, amount).await,
        }
    }

    pub async fn list_recent_receipts(
        &self,
        since_cursor: Option<&str>,
    ) -> Result<Vec<Receipt>, CoinNodeError> {
        match self {
            CoinNodeAdapter::BitcoinFamily(c) => c.list_recent_receipts(since_cursor).await,
            CoinNodeAdapter::Monero(c) => c.list_incoming_transfers().await,
        }
    }

    pub async fn block_height(&self) -> Result<u64, CoinNodeError> {
        match self {
            CoinNodeAdapter::BitcoinFamily(c) => c.block_height().await,
            CoinNodeAdapter::Monero(c) => c.block_height().await,
        }
    }
}

/// Per-coin adapter cache. Populated lazily from coin-node configuration
/// records; invalidated in full whenever admin mutates a coin-node config so
/// the next lookup rebuilds the client with fresh credentials.
#[derive(Clone, Default)]
pub struct AdapterCache {
    inner: Arc<RwLock<HashMap<String, Arc<CoinNodeAdapter>>>>,
}

impl AdapterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, coin: &str) -> Option<Arc<CoinNodeAdapter>> {
        self.inner.read().await.get(coin).cloned()
    }

    pub async fn insert(&self, coin: String, adapter: CoinNodeAdapter) -> Arc<CoinNodeAdapter> {
        let adapter = Arc::new(adapter);
        self.inner.write().await.insert(coin, adapter.clone());
        adapter
    }

    /// Invalidate the cached adapter for one coin, e.g. after an admin
    /// mutates that coin's node configuration.
    pub async fn invalidate(&self, coin: &str) {
        self.inner.write().await.remove(coin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn atomic_roundtrip() {
        let amount = dec!(1.23456789);
        let atomic = MoneroRpcClient::to_atomic(amount);
        assert_eq!(atomic, 1_234_567_890_000i128);
        let back = MoneroRpcClient::from_atomic(atomic);
        assert_eq!(back, amount);
    }

    #[tokio::test]
    async fn cache_invalidation_removes_entry() {
        let cache = AdapterCache::new();
        let client = BitcoinRpcClient::new("http://localhost:8332", "u", "p");
        cache
            .insert("BTC".to_string(), CoinNodeAdapter::BitcoinFamily(client))
            .await;
        assert!(cache.get("BTC").await.is_some());
        cache.invalidate("BTC").await;
        assert!(cache.get("BTC").await.is_none());
    }
}
