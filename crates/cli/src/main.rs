mod cli;
mod commands;

use clap::Parser;
use releve_core::Settings;
use releve_engine::Engine;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let engine = Engine::new(settings)?;

    match cli.command {
        Commands::Import {
            file,
            ledger,
            classify,
        } => commands::import(&engine, &file, ledger.as_deref(), classify),
        Commands::Classify {
            label,
            amount,
            description,
        } => commands::classify(&engine, &label, amount, description.as_deref()),
        Commands::Learn { feedback, out } => commands::learn(&engine, &feedback, out.as_deref()),
        Commands::Reclassify { items } => commands::reclassify(&engine, &items).await,
    }
}
