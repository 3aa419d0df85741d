// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic accelerator-memory observability sink (§3, §6), independent of
//! the synchronous guardrail check `startup::run` performs once at the
//! `STARTING -> IDLE` gate. Grounded on `common/vram_logger.py`: sample on a
//! fixed interval, append a CSV row, never let a sample failure take the
//! process down.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use loader_core::VramSample;
use tokio::io::AsyncWriteExt;

use crate::state::OrchestratorState;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Spawn the background sampler. Runs for the lifetime of the process;
/// `main` doesn't join it, since it has nothing useful to report on exit.
pub fn spawn(state: Arc<OrchestratorState>) {
    tokio::spawn(async move {
        let path = state.config.system.log_dir.join("memory.csv");
        if let Err(err) = ensure_header(&path).await {
            tracing::warn!(error = %err, path = %path.display(), "could not initialize memory.csv; vram sampling disabled");
            return;
        }

        let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
        ticker.tick().await; // first tick fires immediately; skip it, the interval below governs cadence
        loop {
            ticker.tick().await;
            let epoch_ms = now_epoch_ms();
            match state.probe.sample(epoch_ms).await {
                Ok(sample) => {
                    if let Err(err) = append_row(&path, sample).await {
                        tracing::warn!(error = %err, "failed to append to memory.csv");
                    }
                }
                Err(err) => tracing::debug!(error = %err, "vram sample failed; skipping this tick"),
            }
        }
    });
}

async fn ensure_header(path: &Path) -> std::io::Result<()> {
    if tokio::fs::metadata(path).await.is_ok() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(VramSample::csv_header().as_bytes()).await?;
    file.write_all(b"\n").await
}

async fn append_row(path: &Path, sample: VramSample) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new().append(true).open(path).await?;
    file.write_all(sample.to_csv_row().as_bytes()).await?;
    file.write_all(b"\n").await
}

fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_header_writes_once_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memory.csv");

        ensure_header(&path).await.expect("first call");
        ensure_header(&path).await.expect("second call is a no-op");

        let contents = tokio::fs::read_to_string(&path).await.expect("read");
        assert_eq!(contents.lines().count(), 1);
        assert_eq!(contents.trim(), VramSample::csv_header());
    }

    #[tokio::test]
    async fn append_row_adds_a_csv_line_after_the_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memory.csv");
        ensure_header(&path).await.expect("header");

        let sample = VramSample { timestamp_ms: 1000, used_mb: 2000, free_mb: 10_000, total_mb: 12_000, percent: 16.67 };
        append_row(&path, sample).await.expect("append");

        let contents = tokio::fs::read_to_string(&path).await.expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "1000,2000,10000,12000,16.67");
    }
}
