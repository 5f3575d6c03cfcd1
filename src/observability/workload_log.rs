//! Per-workload log file
//!
//! Stages and handlers append one line per event to the workload's `logPath`
//! so users can follow a launch without access to launcher logs. Write
//! failures are logged and swallowed; they never fail the workload.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Format one log line: `<utc timestamp> [<source>] <message>`.
pub fn format_line(source: &str, message: &str) -> String {
    format!(
        "{} [{}] {}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        source,
        message
    )
}

pub async fn append(log_path: &Path, source: &str, message: &str) {
    if log_path.as_os_str().is_empty() {
        return;
    }
    if let Err(e) = try_append(log_path, &format_line(source, message)).await {
        warn!(
            log_path = %log_path.display(),
            "Failed to append to workload log: {}", e
        );
    }
}

async fn try_append(log_path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
