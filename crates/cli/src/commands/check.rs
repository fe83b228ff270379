use crate::output::Output;
use quotevault_store::{IntegrityReport, StorageManager};

pub async fn execute(manager: &StorageManager, output: Output) -> eyre::Result<()> {
    let report = manager.run_integrity_check().await?;
    output.emit(&report, || describe(&report))
}

fn describe(report: &IntegrityReport) -> Vec<String> {
    if report.is_clean() {
        return vec!["No integrity issues found".to_string()];
    }

    let mut lines = Vec::new();
    for finding in &report.findings {
        lines.push(format!(
            "{} ({:?}): {} issue(s)",
            finding.detector,
            finding.severity,
            finding.issues.len()
        ));
        for issue in &finding.issues {
            lines.push(format!("  {issue}"));
        }
    }
    if let Some(repair) = &report.repair {
        lines.push(format!("Repairs applied: {}", repair.applied_repairs.len()));
        for fix in &repair.applied_repairs {
            lines.push(format!("  {} {}/{}: {}", fix.strategy, fix.store, fix.record, fix.description));
        }
        for failed in &repair.failed_repairs {
            lines.push(format!(
                "  failed {} {}/{}: {}",
                failed.strategy, failed.store, failed.record, failed.reason
            ));
        }
        if !repair.unresolved.is_empty() {
            lines.push(format!("Unresolved: {}", repair.unresolved.len()));
        }
    }
    if report.stale_records > 0 {
        lines.push(format!(
            "Left alone (changed during the check): {}",
            report.stale_records
        ));
    }
    if let Some(id) = report.backup_id {
        lines.push(format!("Pre-repair backup: {id}"));
    }
    lines.push(if report.committed {
        "Repairs written back".to_string()
    } else {
        "Nothing written back".to_string()
    });
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_report_is_one_line() {
        assert_eq!(describe(&IntegrityReport::clean()), vec!["No integrity issues found"]);
    }
}
