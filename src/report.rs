//! Result output: CSV rows, iptables counter dump, console summary lines.

use crate::orchestrator::FlowRecord;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// `<dir>/benchmark_<scenario>.csv`
pub fn csv_path(dir: &Path, scenario: &str) -> PathBuf {
    dir.join(format!("benchmark_{}.csv", file_stem(scenario)))
}

/// `<dir>/fw_<scenario>.txt`
pub fn counters_path(dir: &Path, scenario: &str) -> PathBuf {
    dir.join(format!("fw_{}.txt", file_stem(scenario)))
}

// The label is kept verbatim inside the files; only the file name is sanitized.
fn file_stem(scenario: &str) -> String {
    scenario
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Write one CSV row per record, headers taken from the [`FlowRecord`] fields.
pub fn write_csv(path: &Path, records: &[FlowRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;

    info!(path = %path.display(), rows = records.len(), "saved results");
    Ok(())
}

pub fn write_counters(path: &Path, dump: &str) -> Result<()> {
    let mut text = dump.to_string();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "saved counter snapshot");
    Ok(())
}

/// One-line console summary of a finished flow.
pub fn format_flow_line(record: &FlowRecord) -> String {
    let avg = match record.avg_ms {
        Some(ms) => format!("{:.2}", ms),
        None => "—".to_string(),
    };
    format!(
        "{:<25} ➜ {:<25} RTT {:>6} ms   {:>8.1} Mb/s  loss {:>5.1}%",
        record.src, record.dst, avg, record.bandwidth_mbps, record.loss_pct
    )
}
