// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk record shapes written by the log sink (§6 "On-disk artifacts").

use serde::{Deserialize, Serialize};

use crate::dialog::Speaker;

/// One line of the append-only JSON-per-line application log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppLogRecord {
    pub timestamp: String,
    pub timestamp_ms: u64,
    pub level: String,
    pub service: String,
    pub event: String,
    pub message: String,
}

/// One `[HH:MM:SS] SPEAKER: text` line of a per-dialog transcript file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogLogRecord {
    pub dialog_id: String,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp_ms: u64,
}

impl DialogLogRecord {
    /// Render as the `[HH:MM:SS] SPEAKER: text` line written to the
    /// transcript file.
    pub fn to_line(&self, hh_mm_ss: &str) -> String {
        format!("[{hh_mm_ss}] {}: {}", self.speaker, self.text)
    }
}

/// One row of `memory.csv` (§4.3, §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VramSample {
    pub timestamp_ms: u64,
    pub used_mb: u32,
    pub free_mb: u32,
    pub total_mb: u32,
    pub percent: f32,
}

impl VramSample {
    pub fn csv_header() -> &'static str {
        "timestamp_ms,used_mb,free_mb,total_mb,percent"
    }

    pub fn to_csv_row(self) -> String {
        format!(
            "{},{},{},{},{:.2}",
            self.timestamp_ms, self.used_mb, self.free_mb, self.total_mb, self.percent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialog_log_record_formats_with_speaker() {
        let rec = DialogLogRecord {
            dialog_id: "20260804_153045_123".into(),
            speaker: Speaker::User,
            text: "what time is it".into(),
            timestamp_ms: 0,
        };
        assert_eq!(rec.to_line("15:30:45"), "[15:30:45] USER: what time is it");
    }

    #[test]
    fn vram_sample_renders_csv_row() {
        let sample = VramSample { timestamp_ms: 1000, used_mb: 2000, free_mb: 10000, total_mb: 12000, percent: 16.67 };
        assert_eq!(sample.to_csv_row(), "1000,2000,10000,12000,16.67");
    }
}
