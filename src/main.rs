mod cli;

use std::net::SocketAddr;

use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands};
use grabbox::app::App;
use grabbox::config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,grabbox=debug")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Server(args) => serve(config, args.address).await?,
        Commands::Sweep => sweep(config).await?,
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

async fn serve(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);
    let app = App::from_config(config)?;
    let background = app.start().await?;

    let served = grabbox::api::run(app.state(), address).await;

    info!("Draining worker pool");
    background.shutdown().await;
    served
}

async fn sweep(config: Config) -> Result<(), AnyError> {
    let app = App::from_config(config)?;
    // The server is not running, so its RUNNING tasks are already lost.
    app.recover()?;
    let stats = app.sweeper().sweep_once(Utc::now()).await?;
    app.flush_webhooks().await;
    info!(
        deleted = stats.deleted,
        stalled = stats.stalled,
        orphaned_dirs = stats.orphaned_dirs,
        "Sweep finished"
    );
    Ok(())
}
