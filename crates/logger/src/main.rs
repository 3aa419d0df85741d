// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! L: the log sink every other worker writes through (§4.9). Every worker
//! except this one routes its events here instead of logging locally, to
//! avoid a circular dependency on L logging its own write failures.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use loader_core::{AppLogRecord, Config, ConsoleEcho, DialogId, DialogLogRecord, HealthState, KEY_ECHO_EVENTS};
use loader_wire::{l, Ack, CheckResponse, TransportError};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

#[derive(Parser, Debug)]
#[command(name = "loader-logger", version, about)]
struct Args {
    #[arg(long, default_value = "config/config.ini")]
    config: std::path::PathBuf,
}

struct Sink {
    log_dir: PathBuf,
    app_log_path: PathBuf,
    dialog_log_prefix: String,
    rotation_size_mb: u32,
    rotation_count: u32,
    console_echo: ConsoleEcho,
    console_show_time: bool,
    console_colors: bool,
    dialog_paths: Mutex<HashMap<String, PathBuf>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let sink = Arc::new(Sink::new(&config));
    tokio::fs::create_dir_all(&sink.log_dir).await.ok();
    reset_app_log(&sink.app_log_path, now_ms()).await;

    let addr = SocketAddr::from(([127, 0, 0, 1], config.logger.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "L listening");
    serve(listener, sink).await
}

impl Sink {
    fn new(config: &Config) -> Self {
        Self {
            log_dir: config.system.log_dir.clone(),
            app_log_path: config.system.log_dir.join(&config.logger.app_log_file),
            dialog_log_prefix: config.logger.dialog_log_prefix.clone(),
            rotation_size_mb: config.logger.rotation_size_mb,
            rotation_count: config.logger.rotation_count,
            console_echo: config.logger.console_echo,
            console_show_time: config.logger.console_show_time,
            console_colors: config.logger.console_colors,
            dialog_paths: Mutex::new(HashMap::new()),
        }
    }

    fn dialog_log_path(&self, dialog_id: &str) -> PathBuf {
        self.log_dir.join(format!("{}{}.log", self.dialog_log_prefix, dialog_id))
    }

    async fn write_app(&self, record: &AppLogRecord) -> std::io::Result<()> {
        rotate_if_needed(&self.app_log_path, self.rotation_size_mb, self.rotation_count).await?;
        append_line(&self.app_log_path, &serde_json::to_string(record).unwrap_or_default()).await?;
        self.echo(record);
        Ok(())
    }

    fn echo(&self, record: &AppLogRecord) {
        let should_echo = match self.console_echo {
            ConsoleEcho::All => true,
            ConsoleEcho::KeyEvents => KEY_ECHO_EVENTS.contains(&record.event.as_str()),
            ConsoleEcho::None => false,
        };
        if !should_echo {
            return;
        }
        let prefix = if self.console_show_time { format!("{} ", record.timestamp) } else { String::new() };
        let line = format!("{prefix}[{}] {}: {}", record.level, record.service, record.message);
        if self.console_colors {
            println!("\x1b[2m{line}\x1b[0m");
        } else {
            println!("{line}");
        }
    }

    async fn new_dialog(&self, timestamp_ms: u64) -> (String, PathBuf) {
        let id = DialogId::from_epoch_ms(timestamp_ms, 0);
        let path = self.dialog_log_path(id.as_str());
        self.dialog_paths.lock().await.insert(id.as_str().to_string(), path.clone());
        (id.as_str().to_string(), path)
    }

    async fn path_for_dialog(&self, dialog_id: &str) -> PathBuf {
        if let Some(path) = self.dialog_paths.lock().await.get(dialog_id) {
            return path.clone();
        }
        self.dialog_log_path(dialog_id)
    }
}

async fn serve(listener: TcpListener, sink: Arc<Sink>) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let sink = sink.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(&sink, stream).await {
                tracing::debug!(%peer, error = %err, "L connection ended");
            }
        });
    }
}

async fn handle_connection(sink: &Arc<Sink>, mut stream: TcpStream) -> Result<(), TransportError> {
    let request: l::Request = loader_wire::read_frame(&mut stream).await?;
    match request {
        l::Request::Check(_) => {
            loader_wire::write_frame(&mut stream, &CheckResponse { status: HealthState::Serving }).await
        }
        l::Request::WriteApp(req) => {
            let record = AppLogRecord {
                timestamp: hh_mm_ss(req.timestamp_ms),
                timestamp_ms: req.timestamp_ms,
                level: req.level,
                service: req.service,
                event: req.event,
                message: req.message,
            };
            let ack = match sink.write_app(&record).await {
                Ok(()) => Ack::ok(),
                Err(err) => Ack::failed(err.to_string()),
            };
            loader_wire::write_frame(&mut stream, &ack).await
        }
        l::Request::NewDialog(req) => {
            let (dialog_id, path) = sink.new_dialog(req.timestamp_ms).await;
            let response = l::NewDialogResponse { dialog_id, file_path: path.display().to_string() };
            loader_wire::write_frame(&mut stream, &response).await
        }
        l::Request::WriteDialog(req) => {
            let path = sink.path_for_dialog(&req.dialog_id).await;
            let record = DialogLogRecord {
                dialog_id: req.dialog_id,
                speaker: req.speaker,
                text: req.text,
                timestamp_ms: req.timestamp_ms,
            };
            let line = record.to_line(&hh_mm_ss(req.timestamp_ms));
            let ack = match append_line(&path, &line).await {
                Ok(()) => Ack::ok(),
                Err(err) => Ack::failed(err.to_string()),
            };
            loader_wire::write_frame(&mut stream, &ack).await
        }
    }
}

fn hh_mm_ss(epoch_ms: u64) -> String {
    let secs = (epoch_ms / 1000) % 86_400;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Rename a prior run's app log out of the way rather than appending to it
/// across restarts (§4.9: "App log is reset on L startup").
async fn reset_app_log(path: &Path, epoch_ms: u64) {
    if tokio::fs::metadata(path).await.is_err() {
        return;
    }
    let mut backup = path.as_os_str().to_os_string();
    backup.push(format!(".{epoch_ms}"));
    if let Err(err) = tokio::fs::rename(path, &backup).await {
        tracing::warn!(error = %err, path = %path.display(), "failed to rotate prior app log on startup");
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}

/// Logrotate-style rotation: `app.log` -> `app.log.1` -> ... -> `app.log.{N}`,
/// dropping whatever was at `{N}`. There's no size-bucketed rolling
/// appender in the dependency set that fits a fixed file-count budget, so
/// this is done by hand.
async fn rotate_if_needed(path: &Path, rotation_size_mb: u32, rotation_count: u32) -> std::io::Result<()> {
    if rotation_count == 0 {
        return Ok(());
    }
    let limit_bytes = u64::from(rotation_size_mb) * 1024 * 1024;
    let len = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(()),
    };
    if len < limit_bytes {
        return Ok(());
    }

    let oldest = rotated_path(path, rotation_count);
    let _ = tokio::fs::remove_file(&oldest).await;
    for generation in (1..rotation_count).rev() {
        let from = rotated_path(path, generation);
        let to = rotated_path(path, generation + 1);
        if tokio::fs::metadata(&from).await.is_ok() {
            tokio::fs::rename(&from, &to).await?;
        }
    }
    tokio::fs::rename(path, rotated_path(path, 1)).await
}

fn rotated_path(path: &Path, generation: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}
