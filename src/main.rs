mod cli;

use clap::Parser;
use cli::{Cli, Commands, ServerArgs};
use gleaner::config::Config;
use gleaner::handlers::HandlerKind;
use gleaner::observability;
use serde_json::json;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    observability::init_tracing("info");

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => serve(args).await?,
        Commands::Handlers => print_handlers()?,
    }

    Ok(())
}

async fn serve(args: ServerArgs) -> Result<(), AnyError> {
    let config = match args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let address = args.address.unwrap_or(config.server.bind_addr);

    gleaner::api::run(config, address).await
}

fn print_handlers() -> Result<(), AnyError> {
    let catalog: Vec<_> = HandlerKind::ALL
        .iter()
        .map(|kind| {
            json!({
                "name": kind.name(),
                "type": kind.category(),
                "schema": kind.schema(),
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}
