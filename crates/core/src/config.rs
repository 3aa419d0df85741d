// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed configuration surface, parsed from an INI file (§6).
//!
//! Validation is eager and exhaustive: every missing section, bad port, and
//! out-of-range value is collected before returning, never just the first.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const PORT_RANGE: std::ops::RangeInclusive<u16> = 5001..=5006;
pub const MIN_VRAM_MB_FLOOR: u32 = 8000;

/// How much of the application log is mirrored to the console (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleEcho {
    None,
    KeyEvents,
    All,
}

impl ConsoleEcho {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(ConsoleEcho::None),
            "key_events" => Some(ConsoleEcho::KeyEvents),
            "all" => Some(ConsoleEcho::All),
            _ => None,
        }
    }
}

crate::simple_display! {
    ConsoleEcho {
        None => "none",
        KeyEvents => "key_events",
        All => "all",
    }
}

/// Fixed allow-list of events mirrored when `console_echo = key_events`.
pub const KEY_ECHO_EVENTS: &[&str] = &[
    "service_start",
    "service_stop",
    "wake_detected",
    "stt_final_text",
    "llm_eot",
    "tts_finished",
    "vram_guardrail",
    "service_error",
];

#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub min_vram_mb: u32,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub port: u16,
    pub parallel_phase_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub port: u16,
    pub app_log_file: String,
    pub dialog_log_prefix: String,
    pub rotation_size_mb: u32,
    pub rotation_count: u32,
    pub console_echo: ConsoleEcho,
    pub console_show_time: bool,
    pub console_colors: bool,
}

#[derive(Debug, Clone)]
pub struct KwdConfig {
    pub port: u16,
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub cooldown_ms: u64,
    pub yes_phrases: Vec<String>,
    pub warmup_greeting: String,
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub port: u16,
    pub model_name: String,
    pub language: String,
    pub vad_silence_ms: u64,
    pub aec_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub port: u16,
    pub model: String,
    pub modelfile_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub port: u16,
    pub voice: String,
    pub device: String,
    pub sample_rate: u32,
    pub buffer_size_ms: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub system: SystemConfig,
    pub loader: LoaderConfig,
    pub logger: LoggerConfig,
    pub kwd: KwdConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    pub fn parse(text: &str, path_label: &str) -> Result<Self, ConfigError> {
        let ini = ini::Ini::load_from_str(text).map_err(|source| ConfigError::Parse {
            path: path_label.to_string(),
            source,
        })?;

        let mut errs = Vec::new();
        let mut get = |section: &str, key: &str| -> Option<String> {
            match ini.get_from(Some(section), key) {
                Some(v) => Some(v.to_string()),
                None => {
                    errs.push(format!("[{section}] missing required key `{key}`"));
                    None
                }
            }
        };

        for section in ["system", "loader", "logger", "kwd", "stt", "llm", "tts"] {
            if ini.section(Some(section)).is_none() {
                errs.push(format!("missing required section [{section}]"));
            }
        }
        if !errs.is_empty() {
            // Section presence failures make every subsequent key lookup
            // noise; report them on their own.
            return Err(ConfigError::invalid(errs));
        }

        let min_vram_mb = parse_u32(&mut get("system", "min_vram_mb"), "system.min_vram_mb", &mut errs);
        let log_dir = get("system", "log_dir").unwrap_or_default();

        let loader_port = parse_port(&mut get("loader", "port"), "loader.port", &mut errs);
        let parallel_phase_timeout_ms = parse_u64(
            &mut get("loader", "parallel_phase_timeout_ms"),
            "loader.parallel_phase_timeout_ms",
            &mut errs,
        );

        let logger_port = parse_port(&mut get("logger", "port"), "logger.port", &mut errs);
        let app_log_file = get("logger", "app_log_file").unwrap_or_default();
        let dialog_log_prefix = get("logger", "dialog_log_prefix").unwrap_or_default();
        let rotation_size_mb =
            parse_u32(&mut get("logger", "rotation_size_mb"), "logger.rotation_size_mb", &mut errs);
        let rotation_count =
            parse_u32(&mut get("logger", "rotation_count"), "logger.rotation_count", &mut errs);
        let console_echo_raw = get("logger", "console_echo").unwrap_or_default();
        let console_echo = ConsoleEcho::parse(&console_echo_raw).unwrap_or_else(|| {
            errs.push(format!(
                "[logger] console_echo must be one of none|key_events|all, got {console_echo_raw:?}"
            ));
            ConsoleEcho::None
        });
        let console_show_time =
            parse_bool(&mut get("logger", "console_show_time"), "logger.console_show_time", &mut errs);
        let console_colors =
            parse_bool(&mut get("logger", "console_colors"), "logger.console_colors", &mut errs);

        let kwd_port = parse_port(&mut get("kwd", "port"), "kwd.port", &mut errs);
        let model_path = get("kwd", "model_path").unwrap_or_default();
        let confidence_threshold = parse_f32(
            &mut get("kwd", "confidence_threshold"),
            "kwd.confidence_threshold",
            &mut errs,
        );
        let kwd_cooldown_ms = parse_u64(&mut get("kwd", "cooldown_ms"), "kwd.cooldown_ms", &mut errs);
        let yes_phrases: Vec<String> = get("kwd", "yes_phrases")
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let warmup_greeting = get("kwd", "warmup_greeting").unwrap_or_default();

        let stt_port = parse_port(&mut get("stt", "port"), "stt.port", &mut errs);
        let model_name = get("stt", "model_name").unwrap_or_default();
        let language = get("stt", "language").unwrap_or_default();
        let vad_silence_ms = parse_u64(&mut get("stt", "vad_silence_ms"), "stt.vad_silence_ms", &mut errs);
        let aec_enabled = parse_bool(&mut get("stt", "aec_enabled"), "stt.aec_enabled", &mut errs);

        let llm_port = parse_port(&mut get("llm", "port"), "llm.port", &mut errs);
        let model = get("llm", "model").unwrap_or_default();
        let modelfile_path = get("llm", "modelfile_path").unwrap_or_default();

        let tts_port = parse_port(&mut get("tts", "port"), "tts.port", &mut errs);
        let voice = get("tts", "voice").unwrap_or_default();
        let device = get("tts", "device").unwrap_or_default();
        let sample_rate = parse_u32(&mut get("tts", "sample_rate"), "tts.sample_rate", &mut errs);
        let buffer_size_ms = parse_u32(&mut get("tts", "buffer_size_ms"), "tts.buffer_size_ms", &mut errs);

        if min_vram_mb < MIN_VRAM_MB_FLOOR {
            errs.push(format!(
                "system.min_vram_mb must be >= {MIN_VRAM_MB_FLOOR}, got {min_vram_mb}"
            ));
        }

        let ports = [
            ("loader.port", loader_port),
            ("logger.port", logger_port),
            ("kwd.port", kwd_port),
            ("stt.port", stt_port),
            ("llm.port", llm_port),
            ("tts.port", tts_port),
        ];
        for (name, port) in ports {
            if !PORT_RANGE.contains(&port) {
                errs.push(format!(
                    "{name} must be within {}..={}, got {port}",
                    PORT_RANGE.start(),
                    PORT_RANGE.end()
                ));
            }
        }
        for i in 0..ports.len() {
            for j in (i + 1)..ports.len() {
                if ports[i].1 == ports[j].1 {
                    errs.push(format!(
                        "{} and {} both use port {}",
                        ports[i].0, ports[j].0, ports[i].1
                    ));
                }
            }
        }

        if !errs.is_empty() {
            return Err(ConfigError::invalid(errs));
        }

        Ok(Config {
            system: SystemConfig { min_vram_mb, log_dir: PathBuf::from(log_dir) },
            loader: LoaderConfig { port: loader_port, parallel_phase_timeout_ms },
            logger: LoggerConfig {
                port: logger_port,
                app_log_file,
                dialog_log_prefix,
                rotation_size_mb,
                rotation_count,
                console_echo,
                console_show_time,
                console_colors,
            },
            kwd: KwdConfig {
                port: kwd_port,
                model_path: PathBuf::from(model_path),
                confidence_threshold,
                cooldown_ms: kwd_cooldown_ms,
                yes_phrases,
                warmup_greeting,
            },
            stt: SttConfig { port: stt_port, model_name, language, vad_silence_ms, aec_enabled },
            llm: LlmConfig { port: llm_port, model, modelfile_path: PathBuf::from(modelfile_path) },
            tts: TtsConfig { port: tts_port, voice, device, sample_rate, buffer_size_ms },
        })
    }
}

fn parse_u32(raw: &mut Option<String>, label: &str, errs: &mut Vec<String>) -> u32 {
    match raw.take().and_then(|s| s.parse().ok()) {
        Some(v) => v,
        None => {
            errs.push(format!("{label} must be an integer"));
            0
        }
    }
}

fn parse_u64(raw: &mut Option<String>, label: &str, errs: &mut Vec<String>) -> u64 {
    match raw.take().and_then(|s| s.parse().ok()) {
        Some(v) => v,
        None => {
            errs.push(format!("{label} must be an integer"));
            0
        }
    }
}

fn parse_f32(raw: &mut Option<String>, label: &str, errs: &mut Vec<String>) -> f32 {
    match raw.take().and_then(|s| s.parse().ok()) {
        Some(v) => v,
        None => {
            errs.push(format!("{label} must be a number"));
            0.0
        }
    }
}

fn parse_bool(raw: &mut Option<String>, label: &str, errs: &mut Vec<String>) -> bool {
    match raw.take().as_deref() {
        Some("true") | Some("yes") | Some("1") => true,
        Some("false") | Some("no") | Some("0") => false,
        _ => {
            errs.push(format!("{label} must be a boolean"));
            false
        }
    }
}

fn parse_port(raw: &mut Option<String>, label: &str, errs: &mut Vec<String>) -> u16 {
    match raw.take().and_then(|s| s.parse().ok()) {
        Some(v) => v,
        None => {
            errs.push(format!("{label} must be a valid port number"));
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "
[system]
min_vram_mb = 8000
log_dir = /var/log/loader

[loader]
port = 5002
parallel_phase_timeout_ms = 5000

[logger]
port = 5001
app_log_file = app.log
dialog_log_prefix = dialog_
rotation_size_mb = 10
rotation_count = 5
console_echo = key_events
console_show_time = true
console_colors = true

[kwd]
port = 5003
model_path = /models/kwd.onnx
confidence_threshold = 0.75
cooldown_ms = 2000
yes_phrases = yes;sure;go ahead
warmup_greeting = Hello, I'm ready.

[stt]
port = 5004
model_name = base.en
language = en
vad_silence_ms = 800
aec_enabled = true

[llm]
port = 5005
model = llama3
modelfile_path = /models/Modelfile

[tts]
port = 5006
voice = default
device = cpu
sample_rate = 22050
buffer_size_ms = 200
";

    #[test]
    fn valid_config_parses() {
        let cfg = Config::parse(VALID, "test.ini").expect("valid config");
        assert_eq!(cfg.system.min_vram_mb, 8000);
        assert_eq!(cfg.kwd.yes_phrases, vec!["yes", "sure", "go ahead"]);
        assert_eq!(cfg.logger.console_echo, ConsoleEcho::KeyEvents);
    }

    #[test]
    fn rejects_insufficient_vram_floor() {
        let bad = VALID.replace("min_vram_mb = 8000", "min_vram_mb = 4000");
        let err = Config::parse(&bad, "test.ini").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(violations) if violations.iter().any(|v| v.contains("min_vram_mb"))));
    }

    #[test]
    fn rejects_duplicate_ports_and_reports_every_violation() {
        let bad = VALID.replace("port = 5003", "port = 5001");
        let err = Config::parse(&bad, "test.ini").unwrap_err();
        match err {
            ConfigError::Invalid(violations) => {
                assert!(violations.iter().any(|v| v.contains("both use port 5001")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_section() {
        let bad = VALID.replacen("[tts]", "[ttsx]", 1);
        let err = Config::parse(&bad, "test.ini").unwrap_err();
        match err {
            ConfigError::Invalid(violations) => {
                assert!(violations.iter().any(|v| v.contains("missing required section [tts]")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }
}
