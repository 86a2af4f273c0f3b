//! Price-time-priority matching engine.
//!
//! Grounded on `examples/original_source/matcher.py`: walk the resting buy
//! book best-price-first against the resting sell book best-price-first,
//! execute at the maker's (resting side's) price, and stop scanning a side
//! as soon as the books no longer cross. Expressed here with `Decimal`
//! arithmetic and a `Result`-returning transaction instead of SQLAlchemy's
//! implicit session.

use rust_decimal::Decimal;
use sqlx::{Sqlite, Transaction};

use crate::error::ExchangeError;
use crate::ledger::Ledger;
use crate::models::{Market, Order, OrderStatus, Trade};

/// Trades produced by one matching pass, as reported back to the order
/// that triggered it (spec.md §6's `trades:[{price, amount, timestamp}]`).
#[derive(Debug, Clone)]
pub struct MatchReport {
    pub trades: Vec<Trade>,
}

/// Run one matching pass over `market.id` inside `tx`. The caller must
/// already hold the market's lease (`MarketLeases::acquire`) and have
/// inserted/locked the triggering order beforehand — matching never opens
/// its own transaction or lease, per spec.md §9.
pub async fn run_match(
    tx: &mut Transaction<'_, Sqlite>,
    market: &Market,
) -> Result<MatchReport, ExchangeError> {
    let mut buys = Ledger::open_buy_orders_tx(tx, market.id).await?;
    let mut sells = Ledger::open_sell_orders_tx(tx, market.id).await?;

    let mut trades = Vec::new();

    for buy in buys.iter_mut() {
        if buy.remaining.is_zero() {
            continue;
        }

        for sell in sells.iter_mut() {
            if sell.remaining.is_zero() {
                continue;
            }

            // Book is sorted ascending by sell price; no later sell can
            // match this buy once the crossing condition fails.
            if sell.price > buy.price {
                break;
            }

            let trade_price = sell.price;
            let trade_amount = buy.remaining.min(sell.remaining);
            let quote_volume = trade_price * trade_amount;

            let base_fee = trade_amount * market.fee_rate;
            let quote_fee = quote_volume * market.fee_rate;

            credit_buyer(
                tx,
                buy,
                trade_amount,
                quote_volume,
                base_fee,
                &market.base_coin,
                &market.quote_coin,
            )
            .await?;
            credit_seller(
                tx,
                sell,
                trade_amount,
                quote_volume,
                quote_fee,
                &market.base_coin,
                &market.quote_coin,
            )
            .await?;

            let trade =
                Ledger::insert_trade_tx(tx, buy.id, sell.id, market.id, trade_price, trade_amount)
                    .await?;

            Ledger::insert_fee_tx(tx, trade.id, &market.base_coin, base_fee).await?;
            Ledger::insert_fee_tx(tx, trade.id, &market.quote_coin, quote_fee).await?;
            Ledger::credit_fee_pool_tx(tx, &market.base_coin, base_fee).await?;
            Ledger::credit_fee_pool_tx(tx, &market.quote_coin, quote_fee).await?;

            buy.remaining -= trade_amount;
            sell.remaining -= trade_amount;

            buy.status = next_status(buy);
            sell.status = next_status(sell);
            Ledger::update_order_progress_tx(tx, buy.id, buy.remaining, buy.status).await?;
            Ledger::update_order_progress_tx(tx, sell.id, sell.remaining, sell.status).await?;

            trades.push(trade);

            if buy.remaining.is_zero() {
                break;
            }
        }
    }

    Ok(MatchReport { trades })
}

fn next_status(order: &Order) -> OrderStatus {
    if order.remaining.is_zero() {
        OrderStatus::Filled
    } else if order.remaining < order.amount {
        OrderStatus::PartiallyFilled
    } else {
        order.status
    }
}

/// Buyer receives base minus fee; the quote locked at the buyer's own
/// (possibly worse) limit price is released at the trade's execution
/// price, and any price-improvement surplus is refunded to `available`.
async fn credit_buyer(
    tx: &mut Transaction<'_, Sqlite>,
    buy: &Order,
    trade_amount: Decimal,
    quote_volume: Decimal,
    base_fee: Decimal,
    base_coin: &str,
    quote_coin: &str,
) -> Result<(), ExchangeError> {
    let mut buyer_base = Ledger::get_or_create_balance_tx(tx, buy.user_id, base_coin).await?;
    buyer_base.available += trade_amount - base_fee;
    buyer_base.total += trade_amount - base_fee;
    Ledger::save_balance_tx(tx, &buyer_base).await?;

    let mut buyer_quote = Ledger::get_or_create_balance_tx(tx, buy.user_id, quote_coin).await?;
    buyer_quote.locked -= quote_volume;

    let locked_at_order_price = buy.price * trade_amount;
    let unused_locked = locked_at_order_price - quote_volume;
    if unused_locked > Decimal::ZERO {
        buyer_quote.available += unused_locked;
    }
    buyer_quote.total = buyer_quote.available + buyer_quote.locked;
    Ledger::save_balance_tx(tx, &buyer_quote).await?;

    Ok(())
}

/// Seller receives quote minus fee; the base locked at order placement is
/// released by exactly the traded amount.
async fn credit_seller(
    tx: &mut Transaction<'_, Sqlite>,
    sell: &Order,
    trade_amount: Decimal,
    quote_volume: Decimal,
    quote_fee: Decimal,
    base_coin: &str,
    quote_coin: &str,
) -> Result<(), ExchangeError> {
    let mut seller_quote = Ledger::get_or_create_balance_tx(tx, sell.user_id, quote_coin).await?;
    seller_quote.available += quote_volume - quote_fee;
    seller_quote.total += quote_volume - quote_fee;
    Ledger::save_balance_tx(tx, &seller_quote).await?;

    let mut seller_base = Ledger::get_or_create_balance_tx(tx, sell.user_id, base_coin).await?;
    seller_base.locked -= trade_amount;
    seller_base.total = seller_base.available + seller_base.locked;
    Ledger::save_balance_tx(tx, &seller_base).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger as LedgerT;
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;

    async fn setup() -> (LedgerT, i64) {
        let ledger = LedgerT::connect_in_memory().await.unwrap();
        let market = ledger
            .create_market("BASE", "QUOTE", dec!(0.001))
            .await
            .unwrap();
        (ledger, market.id)
    }

    async fn fund(ledger: &LedgerT, user_id: i64, coin: &str, amount: Decimal) {
        let mut tx = ledger.begin_write().await.unwrap();
        let mut balance = LedgerT::get_or_create_balance_tx(&mut tx, user_id, coin)
            .await
            .unwrap();
        balance.total = amount;
        balance.available = amount;
        LedgerT::save_balance_tx(&mut tx, &balance).await.unwrap();
        tx.commit().await.unwrap();
    }

    async fn place_and_lock(
        ledger: &LedgerT,
        user_id: i64,
        market_id: i64,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
        lock_coin: &str,
        lock_amount: Decimal,
    ) -> Order {
        let mut tx = ledger.begin_write().await.unwrap();
        let mut balance = LedgerT::get_or_create_balance_tx(&mut tx, user_id, lock_coin)
            .await
            .unwrap();
        balance.available -= lock_amount;
        balance.locked += lock_amount;
        LedgerT::save_balance_tx(&mut tx, &balance).await.unwrap();
        let order = LedgerT::insert_order_tx(&mut tx, user_id, market_id, side, price, amount)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        order
    }

    #[tokio::test]
    async fn exact_match_charges_fee_both_sides() {
        let (ledger, market_id) = setup().await;
        let buyer = ledger.create_user("buyer-hash").await.unwrap();
        let seller = ledger.create_user("seller-hash").await.unwrap();

        fund(&ledger, buyer.id, "QUOTE", dec!(1000)).await;
        fund(&ledger, seller.id, "BASE", dec!(100)).await;

        place_and_lock(
            &ledger, buyer.id, market_id, OrderSide::Buy, dec!(1), dec!(10), "QUOTE", dec!(10),
        )
        .await;
        place_and_lock(
            &ledger, seller.id, market_id, OrderSide::Sell, dec!(1), dec!(10), "BASE", dec!(10),
        )
        .await;

        let market = ledger.get_market(market_id).await.unwrap().unwrap();
        let mut tx = ledger.begin_write().await.unwrap();
        let report = run_match(&mut tx, &market).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].amount, dec!(10));

        let buyer_base = ledger.get_balance(buyer.id, "BASE").await.unwrap().unwrap();
        assert_eq!(buyer_base.available, dec!(9.99));
        let seller_quote = ledger.get_balance(seller.id, "QUOTE").await.unwrap().unwrap();
        assert_eq!(seller_quote.available, dec!(9.99));
        assert_eq!(ledger.get_fee_pool("BASE").await.unwrap(), dec!(0.01));
        assert_eq!(ledger.get_fee_pool("QUOTE").await.unwrap(), dec!(0.01));
    }

    #[tokio::test]
    async fn partial_fill_leaves_buyer_remaining() {
        let (ledger, market_id) = setup().await;
        let buyer = ledger.create_user("buyer-hash").await.unwrap();
        let seller = ledger.create_user("seller-hash").await.unwrap();

        fund(&ledger, buyer.id, "QUOTE", dec!(1000)).await;
        fund(&ledger, seller.id, "BASE", dec!(5)).await;

        let buy = place_and_lock(
            &ledger, buyer.id, market_id, OrderSide::Buy, dec!(1), dec!(10), "QUOTE", dec!(10),
        )
        .await;
        let sell = place_and_lock(
            &ledger, seller.id, market_id, OrderSide::Sell, dec!(1), dec!(5), "BASE", dec!(5),
        )
        .await;

        let market = ledger.get_market(market_id).await.unwrap().unwrap();
        let mut tx = ledger.begin_write().await.unwrap();
        let report = run_match(&mut tx, &market).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].amount, dec!(5));

        let buy_after = ledger.get_order(buy.id).await.unwrap().unwrap();
        assert_eq!(buy_after.status, OrderStatus::PartiallyFilled);
        assert_eq!(buy_after.remaining, dec!(5));

        let sell_after = ledger.get_order(sell.id).await.unwrap().unwrap();
        assert_eq!(sell_after.status, OrderStatus::Filled);
        assert_eq!(sell_after.remaining, dec!(0));
    }

    #[tokio::test]
    async fn price_improvement_refunds_surplus_lock() {
        let (ledger, market_id) = setup().await;
        let buyer = ledger.create_user("buyer-hash").await.unwrap();
        let seller = ledger.create_user("seller-hash").await.unwrap();

        fund(&ledger, buyer.id, "QUOTE", dec!(1000)).await;
        fund(&ledger, seller.id, "BASE", dec!(5)).await;

        place_and_lock(
            &ledger, buyer.id, market_id, OrderSide::Buy, dec!(1.00), dec!(5), "QUOTE", dec!(5),
        )
        .await;
        place_and_lock(
            &ledger, seller.id, market_id, OrderSide::Sell, dec!(0.95), dec!(5), "BASE", dec!(5),
        )
        .await;

        let market = ledger.get_market(market_id).await.unwrap().unwrap();
        let mut tx = ledger.begin_write().await.unwrap();
        run_match(&mut tx, &market).await.unwrap();
        tx.commit().await.unwrap();

        let buyer_quote = ledger.get_balance(buyer.id, "QUOTE").await.unwrap().unwrap();
        assert_eq!(buyer_quote.available, dec!(995.24525));
        assert_eq!(buyer_quote.locked, dec!(0.25));
        assert_eq!(buyer_quote.total, dec!(995.49525));
    }

    #[tokio::test]
    async fn no_sell_above_buy_price_leaves_books_uncrossed() {
        let (ledger, market_id) = setup().await;
        let buyer = ledger.create_user("buyer-hash").await.unwrap();
        let seller = ledger.create_user("seller-hash").await.unwrap();

        fund(&ledger, buyer.id, "QUOTE", dec!(1000)).await;
        fund(&ledger, seller.id, "BASE", dec!(10)).await;

        place_and_lock(
            &ledger, buyer.id, market_id, OrderSide::Buy, dec!(0.90), dec!(10), "QUOTE", dec!(9),
        )
        .await;
        place_and_lock(
            &ledger, seller.id, market_id, OrderSide::Sell, dec!(1.00), dec!(10), "BASE", dec!(10),
        )
        .await;

        let market = ledger.get_market(market_id).await.unwrap().unwrap();
        let mut tx = ledger.begin_write().await.unwrap();
        let report = run_match(&mut tx, &market).await.unwrap();
        tx.commit().await.unwrap();

        assert!(report.trades.is_empty());
    }
}
