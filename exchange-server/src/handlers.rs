//! Request handlers for spec.md §6's external interface. Thin: each
//! handler parses its input, calls into `exchange-core`, and serializes
//! the result. No business logic lives here.

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use exchange_core::models::OrderSide;
use exchange_core::ExchangeError;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::AppState;

#[derive(Serialize)]
pub struct CreateAccountResponse {
    pub api_key: String,
}

pub async fn create_account(
    State(state): State<AppState>,
) -> Result<Json<CreateAccountResponse>, ApiError> {
    let issued = exchange_core::identity::create_account(&state.ledger).await?;
    Ok(Json(CreateAccountResponse {
        api_key: issued.raw_key,
    }))
}

#[derive(Deserialize)]
pub struct GenerateAddressRequest {
    pub coin: String,
}

#[derive(Serialize)]
pub struct GenerateAddressResponse {
    pub coin: String,
    pub address: String,
}

pub async fn generate_address(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(req): Json<GenerateAddressRequest>,
) -> Result<Json<GenerateAddressResponse>, ApiError> {
    exchange_core::decimal::validate_coin_symbol(&req.coin).map_err(ApiError::from)?;

    let adapter = state
        .adapters
        .get(&req.coin)
        .await
        .ok_or_else(|| ExchangeError::Precondition(format!("no coin-node configured for {}", req.coin)))?;

    let new_address = adapter
        .new_receive_address(&format!("user-{}", user.id))
        .await
        .map_err(ExchangeError::External)?;

    state
        .ledger
        .insert_address(
            user.id,
            &req.coin,
            &new_address.address,
            new_address.subaddress_index.map(i64::from),
        )
        .await?;

    Ok(Json(GenerateAddressResponse {
        coin: req.coin,
        address: new_address.address,
    }))
}

#[derive(Deserialize)]
pub struct ListAddressesQuery {
    pub coin: Option<String>,
}

#[derive(Serialize)]
pub struct AddressView {
    pub address: String,
    pub coin: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn list_addresses(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<ListAddressesQuery>,
) -> Result<Json<Vec<AddressView>>, ApiError> {
    let addresses = state
        .ledger
        .list_addresses(user.id, query.coin.as_deref())
        .await?;

    Ok(Json(
        addresses
            .into_iter()
            .map(|a| AddressView {
                address: a.address,
                coin: a.coin,
                created_at: a.created_at,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct GetBalancesQuery {
    pub coin: Option<String>,
}

#[derive(Serialize)]
pub struct BalanceView {
    pub coin: String,
    pub available: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
}

pub async fn get_balances(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<GetBalancesQuery>,
) -> Result<Json<Vec<BalanceView>>, ApiError> {
    let balances = match &query.coin {
        Some(coin) => state
            .ledger
            .get_balance(user.id, coin)
            .await?
            .into_iter()
            .collect(),
        None => state.ledger.list_balances(user.id).await?,
    };

    Ok(Json(
        balances
            .into_iter()
            .map(|b| BalanceView {
                coin: b.coin,
                available: b.available,
                locked: b.locked,
                total: b.total,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    pub market_id: i64,
    pub side: String,
    pub price: String,
    pub amount: String,
}

#[derive(Serialize)]
pub struct TradeView {
    pub price: Decimal,
    pub amount: Decimal,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
pub struct PlaceOrderResponse {
    pub order_id: i64,
    pub status: String,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub trades: Vec<TradeView>,
}

pub async fn place_order(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<Json<PlaceOrderResponse>, ApiError> {
    let side = OrderSide::parse(&req.side)
        .ok_or_else(|| ExchangeError::Validation(format!("invalid side: {}", req.side)))?;

    let result = exchange_core::trading::place_order(
        &state.ledger,
        user.id,
        req.market_id,
        side,
        &req.price,
        &req.amount,
    )
    .await?;

    let filled = result.order.amount - result.order.remaining;

    Ok(Json(PlaceOrderResponse {
        order_id: result.order.id,
        status: result.order.status.as_str().to_string(),
        filled,
        remaining: result.order.remaining,
        trades: result
            .report
            .trades
            .into_iter()
            .map(|t| TradeView {
                price: t.price,
                amount: t.amount,
                timestamp: t.timestamp,
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    pub order_id: i64,
}

#[derive(Serialize)]
pub struct CancelOrderResponse {
    pub order_id: i64,
    pub status: String,
}

pub async fn cancel_order(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<CancelOrderResponse>, ApiError> {
    let order = exchange_core::trading::cancel_order(&state.ledger, user.id, req.order_id).await?;
    Ok(Json(CancelOrderResponse {
        order_id: order.id,
        status: order.status.as_str().to_string(),
    }))
}

#[derive(Deserialize)]
pub struct WithdrawRequest {
    pub coin: String,
    pub to_address: String,
    pub amount: String,
}

#[derive(Serialize)]
pub struct WithdrawResponse {
    pub txid: String,
    pub amount: Decimal,
    pub coin: String,
    pub status: &'static str,
}

pub async fn withdraw(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(req): Json<WithdrawRequest>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    let adapter = state
        .adapters
        .get(&req.coin)
        .await
        .ok_or_else(|| ExchangeError::Precondition(format!("no coin-node configured for {}", req.coin)))?;

    let receipt = exchange_core::withdrawal::withdraw(
        &state.ledger,
        &adapter,
        user.id,
        &req.coin,
        &req.to_address,
        &req.amount,
    )
    .await?;

    Ok(Json(WithdrawResponse {
        txid: receipt.txid,
        amount: receipt.amount,
        coin: receipt.coin,
        status: "success",
    }))
}

#[derive(Deserialize)]
pub struct OrderbookQuery {
    pub depth: Option<usize>,
}

#[derive(Serialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

#[derive(Serialize)]
pub struct OrderbookResponse {
    pub market: i64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

const MAX_ORDERBOOK_DEPTH: usize = 200;

pub async fn orderbook(
    State(state): State<AppState>,
    Path(market_id): Path<i64>,
    Query(query): Query<OrderbookQuery>,
) -> Result<Json<OrderbookResponse>, ApiError> {
    let depth = query.depth.unwrap_or(20);
    if depth == 0 || depth > MAX_ORDERBOOK_DEPTH {
        return Err(ExchangeError::Validation(format!(
            "depth must be in 1..={MAX_ORDERBOOK_DEPTH}"
        ))
        .into());
    }

    state
        .ledger
        .get_market(market_id)
        .await?
        .ok_or_else(|| ExchangeError::Precondition("market not found".to_string()))?;

    let buys = state.ledger.open_buy_orders(market_id).await?;
    let sells = state.ledger.open_sell_orders(market_id).await?;

    Ok(Json(OrderbookResponse {
        market: market_id,
        bids: aggregate_levels(buys.iter().map(|o| (o.price, o.remaining)), depth),
        asks: aggregate_levels(sells.iter().map(|o| (o.price, o.remaining)), depth),
    }))
}

fn aggregate_levels(
    levels: impl Iterator<Item = (Decimal, Decimal)>,
    depth: usize,
) -> Vec<PriceLevel> {
    let mut aggregated: Vec<PriceLevel> = Vec::new();
    for (price, amount) in levels {
        match aggregated.last_mut() {
            Some(level) if level.price == price => level.amount += amount,
            _ => aggregated.push(PriceLevel { price, amount }),
        }
        if aggregated.len() > depth {
            aggregated.truncate(depth);
        }
    }
    aggregated
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let healthy = state.ledger.read_pool().acquire().await.is_ok();
    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
    })
}
