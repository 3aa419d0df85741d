// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Render as JSON when `format` is `Json`, otherwise call `text_fn`.
pub fn format_or_json<T: Serialize>(format: OutputFormat, data: &T, text_fn: impl FnOnce()) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
        OutputFormat::Text => text_fn(),
    }
    Ok(())
}

/// Render a `name -> value` table with the name column padded to the
/// longest entry, matching what a `status`/`pids` listing needs.
pub fn print_aligned_rows(rows: &[(String, String)]) {
    let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, value) in rows {
        println!("{:<width$}  {}", crate::color::header(name), value, width = width);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_or_json_renders_json_when_selected() {
        let mut called_text = false;
        format_or_json(OutputFormat::Json, &serde_json::json!({"a": 1}), || called_text = true).unwrap();
        assert!(!called_text);
    }

    #[test]
    fn format_or_json_calls_text_fn_for_text() {
        let mut called_text = false;
        format_or_json(OutputFormat::Text, &serde_json::json!({"a": 1}), || called_text = true).unwrap();
        assert!(called_text);
    }
}
