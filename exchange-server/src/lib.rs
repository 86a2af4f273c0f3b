//! HTTP surface and process bootstrap for the exchange core. Grounded on
//! the teacher's `monero-rpc-pool::lib.rs`: an `AppState` shared across
//! handlers, a `TaskManager` owning background `JoinHandle`s that abort on
//! `Drop`, and `create_app`/`run_server` entry points.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use coin_node::AdapterCache;
use exchange_core::Ledger;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub use config::Config;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub adapters: AdapterCache,
}

/// Owns the deposit-sync background tasks; aborts them on drop, the same
/// discipline the teacher's `TaskManager` applies to its health-check and
/// discovery loops.
pub struct TaskManager {
    pub deposit_sync_handles: Vec<JoinHandle<()>>,
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        for handle in &self.deposit_sync_handles {
            handle.abort();
        }
    }
}

/// Spawn one deposit-sync loop per coin configured in the ledger.
async fn spawn_deposit_sync_tasks(
    ledger: Arc<Ledger>,
    adapters: AdapterCache,
    config: &Config,
) -> Result<Vec<JoinHandle<()>>> {
    let coin_configs = ledger.list_coin_node_configs().await?;
    let interval = config.deposit_sync_interval();
    let min_confirmations = config.min_confirmations;

    let mut handles = Vec::new();
    for coin_config in coin_configs {
        if !coin_config.enabled {
            continue;
        }
        let ledger = ledger.clone();
        let adapters = adapters.clone();
        let coin = coin_config.coin.clone();

        let handle = tokio::spawn(async move {
            loop {
                match exchange_core::deposit_sync::sync_coin(
                    &ledger,
                    &adapters,
                    &coin,
                    min_confirmations,
                )
                .await
                {
                    Ok(outcome) => {
                        if outcome.credited > 0 {
                            info!(coin = %coin, credited = outcome.credited, "deposit sync credited receipts");
                        }
                    }
                    Err(e) => error!(coin = %coin, error = %e, "deposit sync pass failed"),
                }
                tokio::time::sleep(interval).await;
            }
        });
        handles.push(handle);
    }
    Ok(handles)
}

pub async fn create_app_with_task_manager(config: Config) -> Result<(Router, TaskManager)> {
    let ledger = Arc::new(Ledger::connect(&config.database_url).await?);
    let adapters = AdapterCache::new();

    for coin_config in ledger.list_coin_node_configs().await? {
        if !coin_config.enabled {
            continue;
        }
        if let Some(kind) = coin_node::CoinNodeKind::parse(&coin_config.kind) {
            let adapter = build_adapter(&coin_config, kind, config.rpc_timeout());
            adapters.insert(coin_config.coin, adapter).await;
        }
    }

    let deposit_sync_handles =
        spawn_deposit_sync_tasks(ledger.clone(), adapters.clone(), &config).await?;
    let task_manager = TaskManager {
        deposit_sync_handles,
    };

    let state = AppState { ledger, adapters };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/accounts", post(handlers::create_account))
        .route("/addresses", post(handlers::generate_address))
        .route("/addresses", get(handlers::list_addresses))
        .route("/balances", get(handlers::get_balances))
        .route("/orders", post(handlers::place_order))
        .route("/orders/cancel", post(handlers::cancel_order))
        .route("/withdrawals", post(handlers::withdraw))
        .route("/markets/:market_id/orderbook", get(handlers::orderbook))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok((app, task_manager))
}

fn build_adapter(
    config: &exchange_core::models::CoinNodeConfig,
    kind: coin_node::CoinNodeKind,
    timeout: Duration,
) -> coin_node::CoinNodeAdapter {
    let adapter = match kind {
        coin_node::CoinNodeKind::BitcoinFamily => coin_node::CoinNodeAdapter::BitcoinFamily(
            coin_node::BitcoinRpcClient::new(
                &config.rpc_url,
                config.rpc_user.as_deref().unwrap_or_default(),
                config.rpc_password.as_deref().unwrap_or_default(),
            ),
        ),
        coin_node::CoinNodeKind::Monero => {
            coin_node::CoinNodeAdapter::Monero(coin_node::MoneroRpcClient::new(&config.rpc_url))
        }
    };
    adapter.with_timeout(timeout)
}

pub async fn create_app(config: Config) -> Result<Router> {
    let (app, _task_manager) = create_app_with_task_manager(config).await?;
    Ok(app)
}

pub async fn run_server(config: Config) -> Result<()> {
    let bind_address = format!("{}:{}", config.host, config.port);
    let (app, _task_manager) = create_app_with_task_manager(config).await?;

    info!("starting exchange server on {bind_address}");
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
