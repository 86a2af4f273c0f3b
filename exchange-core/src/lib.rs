//! Transactional trading and custody engine for a multi-asset spot
//! exchange: balance ledger, price-time-priority matching, withdrawal
//! coordination, deposit ingestion, admin ops, and identity.
//!
//! Grounded on the teacher workspace's split between a persistence crate
//! (`monero-rpc-pool::database`) and its callers: this crate owns all
//! durable state and business rules, leaving transport (HTTP, CLI) to
//! `exchange-server`.

pub mod admin;
pub mod decimal;
pub mod deposit_sync;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod matching;
pub mod models;
pub mod trading;
pub mod withdrawal;

pub use error::ExchangeError;
pub use ledger::Ledger;
