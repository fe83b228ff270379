use crate::output::Output;
use clap::Subcommand;
use quotevault_core::Record;
use quotevault_store::{QueryFilter, StorageManager};

#[derive(Subcommand)]
pub enum QuoteCommands {
    /// List quotes, newest first
    List {
        /// Maximum number of quotes to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Only quotes for this customer
        #[arg(long)]
        customer: Option<String>,
    },
}

fn summary_line(record: &Record) -> String {
    let text = |path: &[&str]| {
        path.iter()
            .try_fold(&record.payload, |value, key| value.get(key))
            .and_then(|value| value.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("-")
            .to_string()
    };
    let enabled = record
        .payload
        .get("enabledComponents")
        .and_then(|v| v.as_array())
        .map_or(0, Vec::len);
    let fallback = if record.payload.get(quotevault_core::FALLBACK_FLAG_FIELD).is_some() {
        "  [fallback]"
    } else {
        ""
    };
    format!(
        "{:<10} {:<24} {:<24} {} component(s)  {}{fallback}",
        record.id.to_string(),
        text(&["project", "customerName"]),
        text(&["project", "projectName"]),
        enabled,
        record.created_at.format("%Y-%m-%d %H:%M"),
    )
}

impl QuoteCommands {
    pub async fn execute(self, manager: &StorageManager, output: Output) -> eyre::Result<()> {
        match self {
            QuoteCommands::List { limit, customer } => {
                let mut filter = QueryFilter::default().with_limit(limit);
                if let Some(customer) = customer {
                    filter = filter.with_customer(customer);
                }
                let quotes = manager.get_quotes(filter).await?;
                output.emit(&quotes, || {
                    if quotes.is_empty() {
                        vec!["No quotes".to_string()]
                    } else {
                        quotes.iter().map(summary_line).collect()
                    }
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotevault_core::RecordId;
    use serde_json::json;

    #[test]
    fn summary_shows_project_and_component_count() {
        let record = Record {
            id: RecordId::Seq(12),
            payload: json!({
                "project": { "customerName": "Acme", "projectName": "" },
                "enabledComponents": ["support", "sensors"],
                "isFallback": true
            }),
            created_at: chrono::Utc::now(),
            schema_version: 3,
        };
        let line = summary_line(&record);
        assert!(line.starts_with("12 "));
        assert!(line.contains("Acme"));
        assert!(line.contains(" - "));
        assert!(line.contains("2 component(s)"));
        assert!(line.ends_with("[fallback]"));
    }
}
