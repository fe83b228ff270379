use crate::output::Output;
use clap::Args;
use quotevault_store::{RetentionPolicy, StorageManager};

/// Without any flag the configured retention limits are applied
#[derive(Args, Debug, Default)]
pub struct CleanupArgs {
    /// Remove history entries older than this many days
    #[arg(long, value_name = "DAYS")]
    pub history_days: Option<u32>,

    /// Keep at most this many history entries
    #[arg(long, value_name = "N")]
    pub history: Option<usize>,

    /// Keep at most this many quotes
    #[arg(long, value_name = "N")]
    pub quotes: Option<usize>,

    /// Keep at most this many components
    #[arg(long, value_name = "N")]
    pub components: Option<usize>,
}

impl CleanupArgs {
    fn policy(&self, manager: &StorageManager) -> RetentionPolicy {
        let explicit = RetentionPolicy {
            history_keep_days: self.history_days,
            history_keep_count: self.history,
            quotes_keep_count: self.quotes,
            components_keep_count: self.components,
        };
        if explicit == RetentionPolicy::default() {
            RetentionPolicy::from_limits(manager.config().retention)
        } else {
            explicit
        }
    }
}

pub async fn execute(manager: &StorageManager, args: CleanupArgs, output: Output) -> eyre::Result<()> {
    let policy = args.policy(manager);
    tracing::debug!(?policy, "Running cleanup");
    let report = manager.cleanup(policy).await?;
    output.emit(&report, || {
        if report.total() == 0 {
            return vec!["Nothing to remove".to_string()];
        }
        let mut lines: Vec<String> = report
            .removed
            .iter()
            .map(|(store, removed)| format!("  {store:<12} {removed} removed"))
            .collect();
        lines.insert(0, format!("Removed {} record(s)", report.total()));
        lines
    })
}
