//! TallyKV server binary.

use clap::Parser;
use tallykv::{server, Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!(
        version = tallykv::VERSION,
        address = %config.bind_address(),
        "Starting TallyKV"
    );

    server::run(config).await
}
