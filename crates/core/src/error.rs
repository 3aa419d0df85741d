// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Library-boundary error type for configuration loading (§7).

use thiserror::Error;

/// Aggregated configuration validation failure.
///
/// Load-time validation collects every violation it finds rather than
/// stopping at the first, so a misconfigured file can be fixed in one pass
/// (§6).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, #[source] source: ini::Error },

    #[error("configuration is invalid: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    /// Build an `Invalid` variant from a non-empty list of violations.
    ///
    /// Panics only in test/debug builds if called with an empty list;
    /// callers must check `violations.is_empty()` first.
    pub fn invalid(violations: Vec<String>) -> Self {
        debug_assert!(!violations.is_empty());
        ConfigError::Invalid(violations)
    }
}
