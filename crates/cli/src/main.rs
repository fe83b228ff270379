use clap::Parser;
use quotevault_store::{ConfigSource, StorageManager, StoreConfig, StoreConfigLoader};
use std::path::PathBuf;

mod commands;
mod output;

use commands::Commands;
use output::Output;

#[derive(Parser)]
#[command(name = "quotevault")]
#[command(about = "Inspect and maintain a quotevault data store", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding the primary backend, fallback file and backups
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Skip the transactional backend and use the fallback medium only
    #[arg(long, global = true)]
    fallback_only: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn config(&self) -> eyre::Result<StoreConfig> {
        let mut config = StoreConfigLoader::load()?;
        let mut overridden = false;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
            overridden = true;
        }
        if self.fallback_only {
            config.fallback_only = true;
            overridden = true;
        }
        if overridden {
            config.source = ConfigSource::CommandLine;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    quotevault_utils::tracing::init().map_err(|e| eyre::eyre!(e))?;

    let cli = Cli::parse();
    let config = cli.config()?;
    tracing::debug!(source = ?config.source, data_dir = %config.data_dir.display(), "Loaded configuration");

    let manager = StorageManager::open_default(config)?;
    manager.initialize().await;

    let result = cli.command.execute(&manager, Output::new(cli.json)).await;
    manager.close().await;
    result
}
