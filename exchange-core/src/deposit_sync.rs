//! Periodic ingestion of confirmed on-chain transfers into balances.
//!
//! Grounded on `examples/original_source/syncBals.py`: one pass per coin,
//! resolving Bitcoin-family receipts by receiving address and Monero
//! receipts by subaddress index, gated on a minimum confirmation depth,
//! deduplicated by the chain transaction table's unique txid constraint,
//! and advancing a per-coin cursor (latest blockhash or latest transfer
//! timestamp) that is persisted in the ledger rather than kept in process
//! memory, per spec.md §9.

use std::time::Duration;

use coin_node::{AdapterCache, CoinNodeKind, Receipt};

use crate::error::ExchangeError;
use crate::ledger::Ledger;
use crate::models::TxDirection;

/// Receipts below this confirmation depth are ignored by the sync loop.
pub const DEFAULT_MIN_CONFIRMATIONS: u32 = 2;

/// Default spacing between sync passes for one coin. Deposit scanning is
/// bounded by block time rather than node health, so it can run less
/// often than a health-check loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Result of one sync pass over a single coin, for logging/metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncOutcome {
    pub credited: usize,
    pub ignored_low_confirmation: usize,
    pub ignored_duplicate: usize,
}

/// Run one ingestion pass for `coin`. The coin-node adapter is looked up
/// (and lazily populated) via `cache`; `min_confirmations` gates which
/// receipts are eligible to credit a balance.
pub async fn sync_coin(
    ledger: &Ledger,
    cache: &AdapterCache,
    coin: &str,
    min_confirmations: u32,
) -> Result<SyncOutcome, ExchangeError> {
    let adapter = cache.get(coin).await.ok_or_else(|| {
        ExchangeError::Precondition(format!("no coin-node adapter configured for {coin}"))
    })?;

    let cursor = ledger.get_sync_cursor(coin).await?;
    let receipts = adapter
        .list_recent_receipts(cursor.as_deref())
        .await
        .map_err(ExchangeError::External)?;

    let mut outcome = SyncOutcome::default();
    let mut advanced_block_hash: Option<String> = None;
    let mut advanced_timestamp = None;

    for receipt in &receipts {
        if receipt.confirmations < min_confirmations {
            outcome.ignored_low_confirmation += 1;
            continue;
        }

        let Some(user_id) = resolve_user(ledger, adapter.kind(), coin, receipt).await? else {
            continue;
        };

        let credited = credit_receipt(ledger, user_id, coin, receipt).await?;
        if credited {
            outcome.credited += 1;
            match adapter.kind() {
                CoinNodeKind::BitcoinFamily => {
                    if let Some(hash) = &receipt.block_hash {
                        advanced_block_hash = Some(hash.clone());
                    }
                }
                CoinNodeKind::Monero => {
                    advanced_timestamp = Some(match advanced_timestamp {
                        Some(current) if current >= receipt.timestamp => current,
                        _ => receipt.timestamp,
                    });
                }
            }
        } else {
            outcome.ignored_duplicate += 1;
        }
    }

    match adapter.kind() {
        CoinNodeKind::BitcoinFamily => {
            if let Some(hash) = advanced_block_hash {
                ledger.set_sync_cursor(coin, &hash).await?;
            }
        }
        CoinNodeKind::Monero => {
            if let Some(ts) = advanced_timestamp {
                ledger.set_sync_cursor(coin, &ts.to_rfc3339()).await?;
            }
        }
    }

    Ok(outcome)
}

async fn resolve_user(
    ledger: &Ledger,
    kind: CoinNodeKind,
    coin: &str,
    receipt: &Receipt,
) -> Result<Option<i64>, ExchangeError> {
    match kind {
        CoinNodeKind::BitcoinFamily => match &receipt.address {
            Some(address) => ledger.find_user_by_address(coin, address).await,
            None => Ok(None),
        },
        CoinNodeKind::Monero => match receipt.subaddress_index {
            Some(index) => {
                ledger
                    .find_user_by_subaddress_index(coin, index as i64)
                    .await
            }
            None => Ok(None),
        },
    }
}

/// Credit one receipt inside its own transaction. Returns `false` (not an
/// error) if the txid was already ingested — spec.md §4.9's
/// "unique-constraint conflicts are already-processed, not errors".
async fn credit_receipt(
    ledger: &Ledger,
    user_id: i64,
    coin: &str,
    receipt: &Receipt,
) -> Result<bool, ExchangeError> {
    let _guard = ledger
        .balance_locks
        .acquire(vec![(user_id, coin.to_string())])
        .await;

    let mut tx = ledger.begin_write().await?;

    let inserted = Ledger::insert_chain_transaction_tx(
        &mut tx,
        user_id,
        coin,
        TxDirection::Received,
        &receipt.txid,
        receipt.amount,
        receipt.timestamp,
    )
    .await?;

    let Some(_chain_tx) = inserted else {
        tx.rollback().await?;
        return Ok(false);
    };

    let mut balance = Ledger::get_or_create_balance_tx(&mut tx, user_id, coin).await?;
    balance.total += receipt.amount;
    balance.available += receipt.amount;
    Ledger::save_balance_tx(&mut tx, &balance).await?;

    tx.commit().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coin_node::{BitcoinRpcClient, CoinNodeAdapter};
    use rust_decimal_macros::dec;

    async fn seeded() -> (Ledger, AdapterCache, i64) {
        let ledger = Ledger::connect_in_memory().await.unwrap();
        let user = ledger.create_user("hash").await.unwrap();
        ledger
            .insert_address(user.id, "BTC", "bc1qexample", None)
            .await
            .unwrap();

        let cache = AdapterCache::new();
        cache
            .insert(
                "BTC".to_string(),
                CoinNodeAdapter::BitcoinFamily(BitcoinRpcClient::new(
                    "http://localhost:8332",
                    "u",
                    "p",
                )),
            )
            .await;

        (ledger, cache, user.id)
    }

    #[tokio::test]
    async fn crediting_the_same_txid_twice_is_a_no_op_second_time() {
        let (ledger, _cache, user_id) = seeded().await;
        let receipt = Receipt {
            txid: "txid-1".to_string(),
            amount: dec!(0.5),
            confirmations: 6,
            address: Some("bc1qexample".to_string()),
            subaddress_index: None,
            block_hash: Some("block-1".to_string()),
            timestamp: Utc::now(),
        };

        let first = credit_receipt(&ledger, user_id, "BTC", &receipt).await.unwrap();
        assert!(first);
        let second = credit_receipt(&ledger, user_id, "BTC", &receipt).await.unwrap();
        assert!(!second);

        let balance = ledger.get_balance(user_id, "BTC").await.unwrap().unwrap();
        assert_eq!(balance.total, dec!(0.5));
        assert_eq!(balance.available, dec!(0.5));
    }

    #[tokio::test]
    async fn unresolvable_address_is_skipped() {
        let (ledger, _cache, _user_id) = seeded().await;
        let resolved = resolve_user(
            &ledger,
            CoinNodeKind::BitcoinFamily,
            "BTC",
            &Receipt {
                txid: "txid-2".to_string(),
                amount: dec!(1),
                confirmations: 6,
                address: Some("bc1qunknown".to_string()),
                subaddress_index: None,
                block_hash: None,
                timestamp: Utc::now(),
            },
        )
        .await
        .unwrap();
        assert!(resolved.is_none());
    }
}
