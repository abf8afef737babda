//! CSV run log, one line per processed ticker.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::info;

use crate::updater::UpdateReport;

#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    ticker: &'a str,
    last_date_in_db: String,
    last_date_retrieved: String,
    records_retrieved: usize,
    records_updated: u64,
    status: &'static str,
    loop_time: String,
    capture_date: String,
}

/// Append the report to `path`, writing the header only when the file is new or empty.
pub fn write_csv(report: &UpdateReport, path: &Path) -> Result<()> {
    let needs_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open update log {}", path.display()))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);

    for entry in &report.entries {
        writer.serialize(LogRecord {
            ticker: &entry.ticker,
            last_date_in_db: entry.last_date_in_db.to_string(),
            last_date_retrieved: entry
                .last_date_retrieved
                .map(|d| d.to_string())
                .unwrap_or_default(),
            records_retrieved: entry.records_retrieved,
            records_updated: entry.records_updated,
            status: entry.status.label(),
            loop_time: format!("{:.3}", entry.loop_time),
            capture_date: entry.capture_date.to_string(),
        })?;
    }
    writer.flush()?;

    info!("📝 Wrote {} log lines to {}", report.entries.len(), path.display());
    Ok(())
}
