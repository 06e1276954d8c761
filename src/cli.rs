use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gleaner")]
#[command(about = "Gleaner feed enrichment service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server and the enrichment workers
    Server(ServerArgs),
    /// Print the built-in handler catalog with config schemas as JSON
    Handlers,
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides `server.bind_addr`)
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Configuration file (overrides `GLEANER_CONFIG`)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
