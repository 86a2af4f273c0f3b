//! Process entry point. Mirrors the teacher's `monero-rpc-pool::main`: a
//! clap `Args` struct feeding `Config::load`, `tracing_subscriber` wired to
//! `RUST_LOG`, then handing off to the library's `run_server`.

use clap::Parser;
use exchange_server::config::CliOverrides;
use exchange_server::{run_server, Config};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "exchange-server", about = "Multi-asset spot exchange backend")]
struct Args {
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();
    let config = Config::load(CliOverrides {
        host: args.host,
        port: args.port,
        database_url: args.database_url,
    })?;

    run_server(config).await
}
