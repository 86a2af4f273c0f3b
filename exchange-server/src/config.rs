//! Process configuration: CLI flags (teacher: `monero-rpc-pool::main`'s
//! `Args`) with environment-variable overrides layered on by the `config`
//! crate, because a deployable service needs config from somewhere other
//! than hardcoded defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub rpc_timeout_secs: u64,
    pub deposit_sync_interval_secs: u64,
    pub min_confirmations: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database_url: "sqlite://exchange.db".to_string(),
            rpc_timeout_secs: 10,
            deposit_sync_interval_secs: 30,
            min_confirmations: 2,
        }
    }
}

impl Config {
    /// Layer CLI-provided overrides over environment variables (prefix
    /// `EXCHANGE_`) over the struct default, mirroring the teacher's
    /// `Config::from_args` but sourcing the environment layer via the
    /// `config` crate instead of leaving it unconfigurable.
    pub fn load(cli: CliOverrides) -> Result<Self, anyhow::Error> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::Environment::with_prefix("EXCHANGE").separator("__"));

        if let Some(host) = cli.host {
            builder = builder.set_override("host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("port", port as i64)?;
        }
        if let Some(database_url) = cli.database_url {
            builder = builder.set_override("database_url", database_url)?;
        }

        builder.build()?.try_deserialize().map_err(Into::into)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn deposit_sync_interval(&self) -> Duration {
        Duration::from_secs(self.deposit_sync_interval_secs)
    }
}

/// The subset of `Config` fields an operator can override from the CLI.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_url: Option<String>,
}
