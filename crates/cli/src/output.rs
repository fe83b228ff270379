//! Text or JSON rendering of command results

use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print `value` as pretty JSON, or the lines produced by `text`
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> Vec<String>) -> eyre::Result<()> {
        println!("{}", self.render(value, text)?);
        Ok(())
    }

    fn render<T: Serialize>(&self, value: &T, text: impl FnOnce() -> Vec<String>) -> eyre::Result<String> {
        if self.json {
            Ok(serde_json::to_string_pretty(value)?)
        } else {
            Ok(text().join("\n"))
        }
    }
}

/// `1536` -> `1.5 KiB`
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
