// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! V: text-to-speech playback (§4.8). `Speak` is a single blocking call;
//! `SpeakStream` accepts chunks on one connection while `PlaybackEvents`
//! reports lifecycle on another, so the two are coordinated through
//! per-dialog state (§3 invariant P1: exactly one `finished`/`error`).
//! The audio backend itself is out of scope; playback duration is
//! estimated from word count.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use loader_core::{Config, HealthState, PlaybackEvent, PlaybackEventKind};
use loader_wire::{v, CheckResponse, TransportError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};

#[derive(Parser, Debug)]
#[command(name = "loader-tts", version, about)]
struct Args {
    #[arg(long, default_value = "config/config.ini")]
    config: std::path::PathBuf,
}

/// Roughly 150 words/minute, floored so even a one-word reply takes a beat.
const MS_PER_WORD: u64 = 400;
const MIN_DURATION_MS: u64 = 200;

#[derive(Default)]
struct DialogSlot {
    notify: Notify,
    terminal: Mutex<Option<PlaybackEvent>>,
}

struct Shared {
    dialogs: Mutex<HashMap<String, Arc<DialogSlot>>>,
}

impl Shared {
    async fn slot(&self, dialog_id: &str) -> Arc<DialogSlot> {
        self.dialogs.lock().await.entry(dialog_id.to_string()).or_insert_with(|| Arc::new(DialogSlot::default())).clone()
    }

    async fn finish(&self, dialog_id: &str, event: PlaybackEvent) {
        let slot = self.slot(dialog_id).await;
        *slot.terminal.lock().await = Some(event);
        slot.notify.notify_waiters();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let shared = Arc::new(Shared { dialogs: Mutex::new(HashMap::new()) });

    let addr = SocketAddr::from(([127, 0, 0, 1], config.tts.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "V listening");
    serve(listener, shared).await
}

async fn serve(listener: TcpListener, shared: Arc<Shared>) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let shared = shared.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(&shared, stream).await {
                tracing::debug!(%peer, error = %err, "V connection ended");
            }
        });
    }
}

async fn handle_connection(shared: &Arc<Shared>, mut stream: TcpStream) -> Result<(), TransportError> {
    let request: v::Request = loader_wire::read_frame(&mut stream).await?;
    match request {
        v::Request::Check(_) => {
            loader_wire::write_frame(&mut stream, &CheckResponse { status: HealthState::Serving }).await
        }
        v::Request::Speak(req) => {
            let duration_ms = estimated_duration_ms(&req.text);
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
            let response = v::SpeakResponse { success: true, message: String::new(), duration_ms };
            loader_wire::write_frame(&mut stream, &response).await
        }
        v::Request::SpeakStream => handle_speak_stream(shared, stream).await,
        v::Request::PlaybackEvents(req) => handle_playback_events(shared, stream, req.dialog_id).await,
    }
}

fn estimated_duration_ms(text: &str) -> u64 {
    let words = text.split_whitespace().count() as u64;
    (words * MS_PER_WORD).max(MIN_DURATION_MS)
}

async fn handle_speak_stream(shared: &Arc<Shared>, mut stream: TcpStream) -> Result<(), TransportError> {
    let mut dialog_id: Option<String> = None;
    let mut words_spoken: u64 = 0;
    let mut chunk_number: u32 = 0;

    loop {
        let chunk: v::SpeakStreamChunk = match loader_wire::read_frame(&mut stream).await {
            Ok(chunk) => chunk,
            Err(err) => {
                if let Some(dialog_id) = dialog_id {
                    let event = PlaybackEvent { dialog_id: dialog_id.clone(), event_type: PlaybackEventKind::Error, chunk_number, timestamp_ms: now_ms() };
                    shared.finish(&dialog_id, event).await;
                }
                return Err(err);
            }
        };
        dialog_id.get_or_insert_with(|| chunk.dialog_id.clone());
        words_spoken += chunk.text.split_whitespace().count() as u64;
        chunk_number += 1;

        if chunk.eot {
            let dialog_id = chunk.dialog_id;
            let duration_ms = words_spoken.saturating_mul(MS_PER_WORD).max(MIN_DURATION_MS);
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
            let event = PlaybackEvent { dialog_id: dialog_id.clone(), event_type: PlaybackEventKind::Finished, chunk_number, timestamp_ms: now_ms() };
            shared.finish(&dialog_id, event).await;
            return Ok(());
        }
    }
}

async fn handle_playback_events(shared: &Arc<Shared>, mut stream: TcpStream, dialog_id: String) -> Result<(), TransportError> {
    let slot = shared.slot(&dialog_id).await;
    let started = PlaybackEvent { dialog_id: dialog_id.clone(), event_type: PlaybackEventKind::Started, chunk_number: 0, timestamp_ms: now_ms() };
    loader_wire::write_frame(&mut stream, &started).await?;

    loop {
        let notified = slot.notify.notified();
        {
            let mut terminal = slot.terminal.lock().await;
            if let Some(event) = terminal.take() {
                drop(terminal);
                loader_wire::write_frame(&mut stream, &event).await?;
                shared.dialogs.lock().await.remove(&dialog_id);
                return Ok(());
            }
        }
        notified.await;
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

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
port = 5003
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
port = 0
voice = default
device = cpu
sample_rate = 22050
buffer_size_ms = 200
";
        Config::parse(ini, "test.ini").expect("valid test config")
    }

    async fn spawn_server() -> SocketAddr {
        let _config = test_config();
        let shared = Arc::new(Shared { dialogs: Mutex::new(HashMap::new()) });
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = serve(listener, shared).await;
        });
        addr
    }

    #[tokio::test]
    async fn speak_reports_a_duration_proportional_to_word_count() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let req = v::Request::Speak(v::SpeakRequest { text: "hello there friend".into(), dialog_id: "d1".into(), voice: None });
        loader_wire::write_frame(&mut stream, &req).await.expect("write");
        let response: v::SpeakResponse = loader_wire::read_frame(&mut stream).await.expect("response");
        assert!(response.success);
        assert_eq!(response.duration_ms, 3 * MS_PER_WORD);
    }

    #[tokio::test]
    async fn playback_events_reports_started_then_finished_after_speak_stream_eot() {
        let addr = spawn_server().await;

        let mut events = TcpStream::connect(addr).await.expect("connect");
        loader_wire::write_frame(&mut events, &v::Request::PlaybackEvents(v::PlaybackEventsRequest { dialog_id: "d1".into(), turn_number: 1 }))
            .await
            .expect("write");
        let started: PlaybackEvent = loader_wire::read_frame(&mut events).await.expect("started");
        assert_eq!(started.event_type, PlaybackEventKind::Started);

        let mut stream = TcpStream::connect(addr).await.expect("connect");
        loader_wire::write_frame(&mut stream, &v::Request::SpeakStream).await.expect("write");
        loader_wire::write_frame(&mut stream, &v::SpeakStreamChunk { text: "hi".into(), eot: false, dialog_id: "d1".into() }).await.expect("write");
        loader_wire::write_frame(&mut stream, &v::SpeakStreamChunk { text: "there".into(), eot: true, dialog_id: "d1".into() }).await.expect("write");

        let finished: PlaybackEvent = tokio::time::timeout(StdDuration::from_secs(2), loader_wire::read_frame(&mut events))
            .await
            .expect("timed out")
            .expect("frame");
        assert_eq!(finished.event_type, PlaybackEventKind::Finished);
    }

    #[tokio::test]
    async fn speak_stream_disconnect_without_eot_reports_error() {
        let addr = spawn_server().await;

        let mut events = TcpStream::connect(addr).await.expect("connect");
        loader_wire::write_frame(&mut events, &v::Request::PlaybackEvents(v::PlaybackEventsRequest { dialog_id: "d2".into(), turn_number: 1 }))
            .await
            .expect("write");
        let _started: PlaybackEvent = loader_wire::read_frame(&mut events).await.expect("started");

        {
            let mut stream = TcpStream::connect(addr).await.expect("connect");
            loader_wire::write_frame(&mut stream, &v::Request::SpeakStream).await.expect("write");
            loader_wire::write_frame(&mut stream, &v::SpeakStreamChunk { text: "hi".into(), eot: false, dialog_id: "d2".into() }).await.expect("write");
            // stream is dropped here before eot, simulating a mid-turn failure.
        }

        let error: PlaybackEvent = tokio::time::timeout(StdDuration::from_secs(2), loader_wire::read_frame(&mut events))
            .await
            .expect("timed out")
            .expect("frame");
        assert_eq!(error.event_type, PlaybackEventKind::Error);
    }
}
