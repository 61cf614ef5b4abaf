//! `roster watermarks`: the per-unit "last processed" table.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use roster_core::{Config, DirectoryTimestamp};
use roster_sync::watermark;

/// Arguments for `roster watermarks`.
#[derive(Args, Debug)]
pub struct WatermarksArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize, Tabled)]
struct WatermarkRow {
    #[tabled(rename = "unit")]
    unit: String,
    #[tabled(rename = "watermark")]
    timestamp: String,
    #[tabled(rename = "age")]
    age: String,
}

impl WatermarksArgs {
    pub fn run(self, config: &Config) -> Result<()> {
        let path = &config.watermarks.path;
        let file = watermark::load_at(path, &config.watermarks.separator)
            .with_context(|| format!("failed to read watermarks from {}", path.display()))?;

        let rows: Vec<WatermarkRow> = file
            .entries
            .iter()
            .map(|(unit, ts)| WatermarkRow {
                unit: unit.to_string(),
                timestamp: ts.to_string(),
                age: format_age(*ts),
            })
            .collect();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize watermarks")?
            );
            return Ok(());
        }

        if rows.is_empty() {
            println!("No watermarks recorded; the next sync is a full scan.");
        } else {
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        for bad in &file.malformed {
            println!("  · line {} ignored: '{}'", bad.line, bad.content);
        }
        Ok(())
    }
}

fn format_age(ts: DirectoryTimestamp) -> String {
    let seconds = Utc::now()
        .naive_utc()
        .signed_duration_since(ts.as_naive())
        .num_seconds()
        .max(0);
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
