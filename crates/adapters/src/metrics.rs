// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Accelerator memory probe used by the GPU-memory guardrail (§4.3).
//!
//! Grounded on the source's `GPUMonitor.get_vram_usage`: query used/free/
//! total in MiB, and treat any probe failure as zero free memory rather
//! than propagating the error.

use async_trait::async_trait;
use loader_core::VramSample;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to launch nvidia-smi: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("nvidia-smi exited with status {0}")]
    NonZeroExit(std::process::ExitStatus),

    #[error("unparseable nvidia-smi output line: {0:?}")]
    Unparseable(String),

    #[error("probe has no more canned samples")]
    Exhausted,
}

/// A source of point-in-time accelerator memory readings.
#[async_trait]
pub trait AcceleratorProbe: Send + Sync {
    async fn sample(&self, timestamp_ms: u64) -> Result<VramSample, ProbeError>;
}

/// Shells out to `nvidia-smi`, matching the measurement the Python
/// `GPUMonitor` took through NVML.
#[derive(Default)]
pub struct NvidiaSmiProbe;

#[async_trait]
impl AcceleratorProbe for NvidiaSmiProbe {
    async fn sample(&self, timestamp_ms: u64) -> Result<VramSample, ProbeError> {
        let output = Command::new("nvidia-smi")
            .args(["--query-gpu=memory.used,memory.free,memory.total", "--format=csv,noheader,nounits"])
            .output()
            .await
            .map_err(ProbeError::Spawn)?;

        if !output.status.success() {
            return Err(ProbeError::NonZeroExit(output.status));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let first_line = text.lines().next().unwrap_or("");
        parse_csv_line(first_line, timestamp_ms)
    }
}

fn parse_csv_line(line: &str, timestamp_ms: u64) -> Result<VramSample, ProbeError> {
    let mut parts = line.split(',').map(str::trim);
    let used_mb: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProbeError::Unparseable(line.to_string()))?;
    let free_mb: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProbeError::Unparseable(line.to_string()))?;
    let total_mb: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProbeError::Unparseable(line.to_string()))?;

    let percent = if total_mb == 0 { 0.0 } else { (used_mb as f32 / total_mb as f32) * 100.0 };

    Ok(VramSample { timestamp_ms, used_mb, free_mb, total_mb, percent })
}

/// A probe that returns a fixed sequence of canned readings, for tests.
pub struct FakeProbe {
    samples: parking_lot::Mutex<std::collections::VecDeque<VramSample>>,
}

impl FakeProbe {
    pub fn new(samples: Vec<VramSample>) -> Self {
        Self { samples: parking_lot::Mutex::new(samples.into()) }
    }

    /// A probe that always reports the same reading.
    pub fn constant(sample: VramSample) -> Self {
        Self { samples: parking_lot::Mutex::new(std::iter::repeat(sample).take(1).collect()) }
    }
}

#[async_trait]
impl AcceleratorProbe for FakeProbe {
    async fn sample(&self, _timestamp_ms: u64) -> Result<VramSample, ProbeError> {
        let mut samples = self.samples.lock();
        match samples.len() {
            0 => Err(ProbeError::Exhausted),
            1 => Ok(*samples.front().expect("checked len")),
            _ => Ok(samples.pop_front().expect("checked len")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_csv_line() {
        let sample = parse_csv_line("2048, 6144, 8192", 1_000).expect("should parse");
        assert_eq!(sample.used_mb, 2048);
        assert_eq!(sample.free_mb, 6144);
        assert_eq!(sample.total_mb, 8192);
        assert!((sample.percent - 25.0).abs() < 0.01);
    }

    #[test]
    fn rejects_a_malformed_line() {
        assert!(parse_csv_line("not, a, number", 0).is_err());
    }

    #[tokio::test]
    async fn fake_probe_returns_canned_reading() {
        let sample = VramSample { timestamp_ms: 0, used_mb: 1, free_mb: 2, total_mb: 3, percent: 33.0 };
        let probe = FakeProbe::constant(sample);
        let got = probe.sample(0).await.expect("fake never fails by default");
        assert_eq!(got.used_mb, 1);
    }
}
