// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! S: speech-to-text (§4.6). `Start` opens a turn, `Stop` ends the capture
//! window, and `Results` streams back whatever the recognizer produced
//! before the one `is_final = true` frame. The recognizer itself is out of
//! scope; this binary owns the turn lifecycle and the wire contract.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use loader_core::{Config, HealthState, SttResult};
use loader_wire::{s, Ack, CheckResponse, TransportError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};

#[derive(Parser, Debug)]
#[command(name = "loader-stt", version, about)]
struct Args {
    #[arg(long, default_value = "config/config.ini")]
    config: std::path::PathBuf,
}

struct SttParams {
    language: String,
    vad_silence_ms: u64,
    aec_enabled: bool,
}

/// One open capture window. `Stop` records the final transcript (empty,
/// since no audio is actually captured here) and wakes `Results`.
#[derive(Default)]
struct Turn {
    notify: Notify,
    final_text: Mutex<Option<String>>,
}

struct Shared {
    params: Mutex<SttParams>,
    turns: Mutex<HashMap<String, Arc<Turn>>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let shared = new_shared(&config);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.stt.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "S listening");
    serve(listener, shared).await
}

fn new_shared(config: &Config) -> Arc<Shared> {
    Arc::new(Shared {
        params: Mutex::new(SttParams {
            language: config.stt.language.clone(),
            vad_silence_ms: config.stt.vad_silence_ms,
            aec_enabled: config.stt.aec_enabled,
        }),
        turns: Mutex::new(HashMap::new()),
    })
}

async fn serve(listener: TcpListener, shared: Arc<Shared>) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let shared = shared.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(&shared, stream).await {
                tracing::debug!(%peer, error = %err, "S connection ended");
            }
        });
    }
}

async fn handle_connection(shared: &Arc<Shared>, mut stream: TcpStream) -> Result<(), TransportError> {
    let request: s::Request = loader_wire::read_frame(&mut stream).await?;
    match request {
        s::Request::Check(_) => {
            loader_wire::write_frame(&mut stream, &CheckResponse { status: HealthState::Serving }).await
        }
        s::Request::Start(req) => {
            turn_for(shared, &req.dialog_id).await;
            loader_wire::write_frame(&mut stream, &Ack::ok()).await
        }
        s::Request::Stop(req) => {
            let turn = turn_for(shared, &req.dialog_id).await;
            *turn.final_text.lock().await = Some(String::new());
            turn.notify.notify_waiters();
            loader_wire::write_frame(&mut stream, &Ack::ok()).await
        }
        s::Request::Configure(req) => {
            *shared.params.lock().await = SttParams {
                language: req.language,
                vad_silence_ms: req.vad_silence_ms,
                aec_enabled: req.aec_enabled,
            };
            loader_wire::write_frame(&mut stream, &Ack::ok()).await
        }
        s::Request::Results(req) => stream_results(shared, stream, req.dialog_id).await,
    }
}

async fn turn_for(shared: &Arc<Shared>, dialog_id: &str) -> Arc<Turn> {
    shared.turns.lock().await.entry(dialog_id.to_string()).or_insert_with(|| Arc::new(Turn::default())).clone()
}

async fn stream_results(shared: &Arc<Shared>, mut stream: TcpStream, dialog_id: String) -> Result<(), TransportError> {
    let turn = turn_for(shared, &dialog_id).await;
    loop {
        let notified = turn.notify.notified();
        if let Some(text) = turn.final_text.lock().await.take() {
            let result = SttResult { dialog_id: dialog_id.clone(), text, is_final: true, confidence: 1.0, timestamp_ms: now_ms() };
            loader_wire::write_frame(&mut stream, &result).await?;
            shared.turns.lock().await.remove(&dialog_id);
            return Ok(());
        }
        notified.await;
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
