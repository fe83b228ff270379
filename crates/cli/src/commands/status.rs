use crate::output::{human_bytes, Output};
use quotevault_store::StorageManager;

pub fn health(manager: &StorageManager, output: Output) -> eyre::Result<()> {
    let health = manager.get_health_status();
    output.emit(&health, || {
        let mut lines = vec![
            format!("Backend:            {}", health.backend_kind),
            format!("Connection:         {}", health.connection_state),
            format!("Reconnect attempts: {}", health.reconnect_attempts),
            format!("Errors:             {}", health.error_count),
        ];
        if let Some(last) = &health.last_error {
            lines.push(format!("Last error:         {last}"));
        }
        lines
    })
}

pub async fn stats(manager: &StorageManager, output: Output) -> eyre::Result<()> {
    let stats = manager.get_storage_stats().await?;
    output.emit(&stats, || {
        let mut lines = vec![format!("Backend: {}", stats.backend_kind)];
        for (store, count) in &stats.counts {
            lines.push(format!("  {store:<12} {count}"));
        }
        lines.push(format!("Records:  {}", stats.total_records()));
        lines.push(format!("Primary:  {}", human_bytes(stats.stored_bytes)));
        lines.push(format!("Fallback: {}", human_bytes(stats.fallback_bytes)));
        lines.push(format!("Backups:  {}", stats.backups));
        lines
    })
}
