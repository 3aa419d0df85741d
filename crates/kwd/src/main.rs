// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! W: wake-word detection (§4.5). Serves `Check`/`Start`/`Stop`/`Configure`/
//! `Events` over the standard wire protocol. The acoustic classifier itself
//! is out of scope here; this binary owns the control surface around it.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use loader_core::{Config, HealthState, WakeEvent};
use loader_wire::{w, Ack, CheckResponse, TransportError};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

#[derive(Parser, Debug)]
#[command(name = "loader-kwd", version, about)]
struct Args {
    /// Path to the INI configuration file shared with the orchestrator.
    #[arg(long, default_value = "config/config.ini")]
    config: std::path::PathBuf,
}

struct WakeParams {
    threshold: f32,
    cooldown_ms: u64,
    phrases: Vec<String>,
}

struct Shared {
    armed: Mutex<bool>,
    params: Mutex<WakeParams>,
    events: broadcast::Sender<WakeEvent>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let shared = new_shared(&config);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.kwd.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "W listening");
    serve(listener, shared).await
}

fn new_shared(config: &Config) -> Arc<Shared> {
    Arc::new(Shared {
        armed: Mutex::new(true),
        params: Mutex::new(WakeParams {
            threshold: config.kwd.confidence_threshold,
            cooldown_ms: config.kwd.cooldown_ms,
            phrases: config.kwd.yes_phrases.clone(),
        }),
        events: broadcast::channel(64).0,
    })
}

async fn serve(listener: TcpListener, shared: Arc<Shared>) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let shared = shared.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(&shared, stream).await {
                tracing::debug!(%peer, error = %err, "W connection ended");
            }
        });
    }
}

async fn handle_connection(shared: &Arc<Shared>, mut stream: TcpStream) -> Result<(), TransportError> {
    let request: w::Request = loader_wire::read_frame(&mut stream).await?;
    match request {
        w::Request::Check(_) => {
            loader_wire::write_frame(&mut stream, &CheckResponse { status: HealthState::Serving }).await
        }
        w::Request::Start => {
            *shared.armed.lock() = true;
            loader_wire::write_frame(&mut stream, &Ack::ok()).await
        }
        w::Request::Stop => {
            *shared.armed.lock() = false;
            loader_wire::write_frame(&mut stream, &Ack::ok()).await
        }
        w::Request::Configure(req) => {
            *shared.params.lock() = WakeParams { threshold: req.threshold, cooldown_ms: req.cooldown_ms, phrases: req.phrases };
            loader_wire::write_frame(&mut stream, &Ack::ok()).await
        }
        w::Request::Events => stream_events(shared, stream).await,
    }
}

/// No microphone is attached in this deployment, so nothing ever publishes
/// to `shared.events` in production; the connection simply stays open,
/// forwarding whatever does arrive (a test harness, say) while armed.
async fn stream_events(shared: &Arc<Shared>, mut stream: TcpStream) -> Result<(), TransportError> {
    let mut rx = shared.events.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => {
                if !*shared.armed.lock() {
                    continue;
                }
                loader_wire::write_frame(&mut stream, &event).await?;
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> Config {
        let ini = "
[system]
min_vram_mb = 8000
log_dir = /tmp/loader-test

[loader]
port = 5002
parallel_phase_timeout_ms = 5000

[logger]
port = 5001
app_log_file = app.log
dialog_log_prefix = dialog_
rotation_size_mb = 10
rotation_count = 5
console_echo = none
console_show_time = true
console_colors = false

[kwd]
port = 0
model_path = /models/kwd.onnx
confidence_threshold = 0.75
cooldown_ms = 2000
yes_phrases = yes;sure
warmup_greeting = hi

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
        Config::parse(ini, "test.ini").expect("valid test config")
    }

    async fn spawn_server() -> (SocketAddr, Arc<Shared>) {
        let config = test_config();
        let shared = new_shared(&config);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let serving = shared.clone();
        tokio::spawn(async move {
            let _ = serve(listener, serving).await;
        });
        (addr, shared)
    }

    async fn roundtrip<Resp: serde::de::DeserializeOwned>(addr: SocketAddr, req: &w::Request) -> Resp {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        loader_wire::write_frame(&mut stream, req).await.expect("write");
        loader_wire::read_frame(&mut stream).await.expect("read")
    }

    #[tokio::test]
    async fn check_reports_serving() {
        let (addr, _shared) = spawn_server().await;
        let response: CheckResponse = roundtrip(addr, &w::Request::Check(loader_wire::CheckRequest { service_name: "kwd".into() })).await;
        assert_eq!(response.status, HealthState::Serving);
    }

    #[tokio::test]
    async fn stop_then_start_toggles_armed() {
        let (addr, shared) = spawn_server().await;
        let _: Ack = roundtrip(addr, &w::Request::Stop).await;
        assert!(!*shared.armed.lock());
        let _: Ack = roundtrip(addr, &w::Request::Start).await;
        assert!(*shared.armed.lock());
    }

    #[tokio::test]
    async fn configure_replaces_params() {
        let (addr, shared) = spawn_server().await;
        let req = w::Request::Configure(w::ConfigureRequest { threshold: 0.9, cooldown_ms: 500, phrases: vec!["ok".into()] });
        let _: Ack = roundtrip(addr, &req).await;
        let params = shared.params.lock();
        assert_eq!(params.threshold, 0.9);
        assert_eq!(params.cooldown_ms, 500);
        assert_eq!(params.phrases, vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn events_stream_forwards_while_armed() {
        let (addr, shared) = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        loader_wire::write_frame(&mut stream, &w::Request::Events).await.expect("write");

        shared
            .events
            .send(WakeEvent { wake_word: "hey".into(), confidence: 0.95, timestamp_ms: 1, dialog_id: None })
            .expect("send");

        let event: WakeEvent = tokio::time::timeout(Duration::from_secs(1), loader_wire::read_frame(&mut stream))
            .await
            .expect("timed out")
            .expect("frame");
        assert_eq!(event.wake_word, "hey");
    }
}
