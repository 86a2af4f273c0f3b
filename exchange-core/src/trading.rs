//! Order placement and cancellation: the service layer that locks funds,
//! inserts the order, and triggers the matching engine inside one
//! transaction, per spec.md §2's data-flow description and §4.1's
//! transaction-boundary rule (every public operation owns its transaction;
//! nested operations never open their own).

use rust_decimal::Decimal;

use crate::decimal::parse_amount;
use crate::error::ExchangeError;
use crate::ledger::Ledger;
use crate::matching::{self, MatchReport};
use crate::models::{Order, OrderSide, OrderStatus};

/// Everything the caller needs to answer spec.md §6's `place-order`
/// response shape.
#[derive(Debug, Clone)]
pub struct PlaceOrderResult {
    pub order: Order,
    pub report: MatchReport,
}

/// Validate, lock the taker's funds, insert the order, and run one
/// matching pass — all inside a single write transaction guarded by the
/// market's exclusive lease.
pub async fn place_order(
    ledger: &Ledger,
    user_id: i64,
    market_id: i64,
    side: OrderSide,
    price_raw: &str,
    amount_raw: &str,
) -> Result<PlaceOrderResult, ExchangeError> {
    let price = parse_amount(price_raw)?;
    let amount = parse_amount(amount_raw)?;
    if price.is_zero() || amount.is_zero() {
        return Err(ExchangeError::Validation(
            "price and amount must be positive".to_string(),
        ));
    }

    let market = ledger
        .get_market(market_id)
        .await?
        .ok_or_else(|| ExchangeError::Precondition("market not found".to_string()))?;
    if !market.active {
        return Err(ExchangeError::Precondition("market is not active".to_string()));
    }

    let (lock_coin, lock_amount): (&str, Decimal) = match side {
        OrderSide::Buy => (&market.quote_coin, price * amount),
        OrderSide::Sell => (&market.base_coin, amount),
    };

    // The market lease must be held before the counterparty scan below, or
    // the resting-order snapshot it takes could go stale before the match
    // that consumes it runs.
    let _market_guard = ledger.market_leases.acquire(market_id).await;

    // A match can credit/debit both coins of every resting order it
    // crosses, not just the taker's lock coin, so every counterparty on the
    // opposite side of the book has to be locked too before the
    // transaction opens. Nothing else can insert or match against this
    // market while `_market_guard` is held, so this snapshot can't go stale.
    let counterparties = match side {
        OrderSide::Buy => ledger.open_sell_orders(market_id).await?,
        OrderSide::Sell => ledger.open_buy_orders(market_id).await?,
    };
    let mut lock_keys = vec![(user_id, lock_coin.to_string())];
    for counterparty in &counterparties {
        lock_keys.push((counterparty.user_id, market.base_coin.clone()));
        lock_keys.push((counterparty.user_id, market.quote_coin.clone()));
    }
    let _balance_guard = ledger.balance_locks.acquire(lock_keys).await;

    let mut tx = ledger.begin_write().await?;

    let mut balance = Ledger::get_or_create_balance_tx(&mut tx, user_id, lock_coin).await?;
    if balance.available < lock_amount {
        return Err(ExchangeError::InsufficientFunds);
    }
    balance.available -= lock_amount;
    balance.locked += lock_amount;
    Ledger::save_balance_tx(&mut tx, &balance).await?;

    let order = Ledger::insert_order_tx(&mut tx, user_id, market_id, side, price, amount).await?;

    let report = matching::run_match(&mut tx, &market).await?;

    tx.commit().await?;

    let order = ledger.get_order(order.id).await?.unwrap_or(order);

    Ok(PlaceOrderResult { order, report })
}

/// Cancel an open or partially-filled order, refunding whatever remains
/// locked against it back to `available`.
pub async fn cancel_order(
    ledger: &Ledger,
    user_id: i64,
    order_id: i64,
) -> Result<Order, ExchangeError> {
    // `side` and `market_id` are immutable once an order is created, so a
    // pre-transaction read of them is safe to use for lock-key purposes;
    // everything else is re-checked against the transactional view below.
    let pre_read = ledger
        .get_order(order_id)
        .await?
        .ok_or_else(|| ExchangeError::Precondition("order not found".to_string()))?;
    let pre_market = ledger
        .get_market(pre_read.market_id)
        .await?
        .ok_or_else(|| ExchangeError::Internal(anyhow::anyhow!("order references missing market")))?;
    let lock_coin = match pre_read.side {
        OrderSide::Buy => pre_market.quote_coin.clone(),
        OrderSide::Sell => pre_market.base_coin.clone(),
    };

    let _balance_guard = ledger
        .balance_locks
        .acquire(vec![(user_id, lock_coin.clone())])
        .await;

    let mut tx = ledger.begin_write().await?;

    let order = Ledger::get_order_tx(&mut tx, order_id)
        .await?
        .ok_or_else(|| ExchangeError::Precondition("order not found".to_string()))?;

    if order.user_id != user_id {
        return Err(ExchangeError::Authorization);
    }
    if order.status.is_terminal() {
        return Err(ExchangeError::Precondition(
            "order is already in a terminal state".to_string(),
        ));
    }

    let market = Ledger::get_market_tx(&mut tx, order.market_id)
        .await?
        .ok_or_else(|| ExchangeError::Internal(anyhow::anyhow!("order references missing market")))?;

    let (refund_coin, refund_amount): (&str, Decimal) = match order.side {
        OrderSide::Buy => (&market.quote_coin, order.price * order.remaining),
        OrderSide::Sell => (&market.base_coin, order.remaining),
    };
    debug_assert_eq!(refund_coin, &lock_coin);

    let mut balance = Ledger::get_or_create_balance_tx(&mut tx, user_id, refund_coin).await?;
    balance.locked -= refund_amount;
    balance.available += refund_amount;
    Ledger::save_balance_tx(&mut tx, &balance).await?;

    Ledger::cancel_order_tx(&mut tx, order_id).await?;

    tx.commit().await?;

    Ok(Order {
        status: OrderStatus::Cancelled,
        ..order
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn cancel_refunds_locked_quote() {
        let ledger = Ledger::connect_in_memory().await.unwrap();
        let market = admin::create_market(&ledger, "BASE", "QUOTE", None)
            .await
            .unwrap();
        let buyer = ledger.create_user("buyer-hash").await.unwrap();

        {
            let mut tx = ledger.begin_write().await.unwrap();
            let mut balance =
                Ledger::get_or_create_balance_tx(&mut tx, buyer.id, "QUOTE").await.unwrap();
            balance.total = dec!(1000);
            balance.available = dec!(1000);
            Ledger::save_balance_tx(&mut tx, &balance).await.unwrap();
            tx.commit().await.unwrap();
        }

        let placed = place_order(&ledger, buyer.id, market.id, OrderSide::Buy, "1", "10")
            .await
            .unwrap();
        assert!(placed.report.trades.is_empty());

        let before_cancel = ledger.get_balance(buyer.id, "QUOTE").await.unwrap().unwrap();
        assert_eq!(before_cancel.available, dec!(990));
        assert_eq!(before_cancel.locked, dec!(10));

        cancel_order(&ledger, buyer.id, placed.order.id).await.unwrap();

        let after_cancel = ledger.get_balance(buyer.id, "QUOTE").await.unwrap().unwrap();
        assert_eq!(after_cancel.available, dec!(1000));
        assert_eq!(after_cancel.locked, dec!(0));
    }

    #[tokio::test]
    async fn place_order_rejects_insufficient_balance() {
        let ledger = Ledger::connect_in_memory().await.unwrap();
        let market = admin::create_market(&ledger, "BASE", "QUOTE", None)
            .await
            .unwrap();
        let buyer = ledger.create_user("buyer-hash").await.unwrap();

        let result = place_order(&ledger, buyer.id, market.id, OrderSide::Buy, "1", "10").await;
        assert!(matches!(result, Err(ExchangeError::InsufficientFunds)));
    }
}
