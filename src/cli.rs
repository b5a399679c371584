use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "grabbox")]
#[command(about = "GrabBox media download service", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $GRABBOX_CONFIG or config/grabbox.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server, worker pool and sweeper
    Server(ServerArgs),
    /// Run one cleanup pass against the task store and exit
    Sweep,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}
