mod clob;
mod config;
mod error;
mod normalizer;
mod proxy;
mod retrier;
mod server;
mod trade;
mod utils;

use anyhow::Result;
use clap::Parser;

use crate::config::Settings;

#[derive(Debug, Parser)]
#[command(name = "clob-relay", version)]
struct Cli {
    /// Override HOST
    #[arg(long)]
    host: Option<String>,

    /// Override PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(h) = cli.host {
        settings.host = h;
    }
    if let Some(p) = cli.port {
        settings.port = p;
    }

    log::info!(
        "app.start host={} port={} clob={} gamma={} chain_id={} retries={} retry_delay_ms={}",
        settings.host,
        settings.port,
        settings.clob_base_url,
        settings.gamma_base_url,
        settings.chain_id,
        settings.trade_max_retries,
        settings.trade_retry_delay_ms
    );

    server::serve_relay(settings).await
}
