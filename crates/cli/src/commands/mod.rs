use crate::output::Output;
use clap::Subcommand;
use quotevault_store::StorageManager;

pub mod backups;
pub mod check;
pub mod cleanup;
pub mod quotes;
pub mod status;

use self::backups::BackupCommands;
use self::cleanup::CleanupArgs;
use self::quotes::QuoteCommands;

#[derive(Subcommand)]
pub enum Commands {
    /// Show the backend in use, connection state and error counters
    Health,

    /// Show record counts and storage usage
    Stats,

    /// Run an integrity check on the live store and repair what it finds
    Check,

    /// Remove old records according to a retention policy
    Cleanup(CleanupArgs),

    /// List or restore backups
    #[command(visible_alias = "b")]
    Backups {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Inspect stored quotes
    #[command(visible_alias = "q")]
    Quotes {
        #[command(subcommand)]
        command: QuoteCommands,
    },
}

impl Commands {
    pub async fn execute(self, manager: &StorageManager, output: Output) -> eyre::Result<()> {
        match self {
            Commands::Health => status::health(manager, output),
            Commands::Stats => status::stats(manager, output).await,
            Commands::Check => check::execute(manager, output).await,
            Commands::Cleanup(args) => cleanup::execute(manager, args, output).await,
            Commands::Backups { command } => command.execute(manager, output).await,
            Commands::Quotes { command } => command.execute(manager, output).await,
        }
    }
}
