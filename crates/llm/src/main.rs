// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! M: LLM completion (§4.7). `Complete` streams a reply in word-sized
//! chunks ending with one `eot = true` frame; the model itself is out of
//! scope, so the reply is generated deterministically from the prompt.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use loader_core::{Config, HealthState, LlmChunk};
use loader_wire::{m, Ack, CheckResponse, TransportError};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};

#[derive(Parser, Debug)]
#[command(name = "loader-llm", version, about)]
struct Args {
    #[arg(long, default_value = "config/config.ini")]
    config: std::path::PathBuf,
}

struct LlmParams {
    model: String,
    max_tokens: u32,
    temperature: f32,
}

struct Shared {
    params: Mutex<LlmParams>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let shared = new_shared(&config);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.llm.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "M listening");
    serve(listener, shared).await
}

fn new_shared(config: &Config) -> Arc<Shared> {
    Arc::new(Shared {
        params: Mutex::new(LlmParams { model: config.llm.model.clone(), max_tokens: 150, temperature: 0.7 }),
    })
}

async fn serve(listener: TcpListener, shared: Arc<Shared>) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let shared = shared.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(&shared, stream).await {
                tracing::debug!(%peer, error = %err, "M connection ended");
            }
        });
    }
}

async fn handle_connection(shared: &Arc<Shared>, mut stream: TcpStream) -> Result<(), TransportError> {
    let request: m::Request = loader_wire::read_frame(&mut stream).await?;
    match request {
        m::Request::Check(_) => {
            loader_wire::write_frame(&mut stream, &CheckResponse { status: HealthState::Serving }).await
        }
        m::Request::Configure(req) => {
            *shared.params.lock() = LlmParams { model: req.model, max_tokens: req.max_tokens, temperature: req.temperature };
            loader_wire::write_frame(&mut stream, &Ack::ok()).await
        }
        m::Request::Complete(req) => stream_completion(stream, req.dialog_id, req.text).await,
    }
}

/// Generates a canned reply, word-chunked to exercise the same streaming
/// contract a real model's token stream would (§4.7: chunks then one
/// `eot = true`).
fn canned_reply(prompt: &str) -> String {
    if prompt.trim().is_empty() {
        "I didn't catch a question there.".to_string()
    } else {
        format!("You said: {}. I don't have a real answer for that yet.", prompt.trim())
    }
}

async fn stream_completion(mut stream: TcpStream, dialog_id: String, text: String) -> Result<(), TransportError> {
    let reply = canned_reply(&text);
    let words: Vec<&str> = reply.split_whitespace().collect();
    let mut chunks = words.chunks(3).peekable();

    if chunks.peek().is_none() {
        let chunk = LlmChunk { dialog_id, text: String::new(), eot: true, token_count: 0, latency_ms: 0 };
        return loader_wire::write_frame(&mut stream, &chunk).await;
    }

    while let Some(words) = chunks.next() {
        let eot = chunks.peek().is_none();
        let chunk = LlmChunk {
            dialog_id: dialog_id.clone(),
            text: format!("{} ", words.join(" ")),
            eot,
            token_count: words.len() as u32,
            latency_ms: 30,
        };
        loader_wire::write_frame(&mut stream, &chunk).await?;
        if !eot {
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
    }
    Ok(())
}

#[allow(dead_code)]
fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

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
port = 0
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

    async fn spawn_server() -> SocketAddr {
        let config = test_config();
        let shared = new_shared(&config);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = serve(listener, shared).await;
        });
        addr
    }

    #[tokio::test]
    async fn complete_streams_chunks_ending_in_eot() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let req = m::Request::Complete(m::CompleteRequest {
            text: "what time is it".into(),
            dialog_id: "d1".into(),
            turn_number: 1,
            conversation_history: Vec::new(),
        });
        loader_wire::write_frame(&mut stream, &req).await.expect("write");

        let mut saw_eot = false;
        let mut full_text = String::new();
        for _ in 0..32 {
            let chunk: LlmChunk = loader_wire::read_frame(&mut stream).await.expect("chunk");
            full_text.push_str(&chunk.text);
            if chunk.eot {
                saw_eot = true;
                break;
            }
        }
        assert!(saw_eot);
        assert!(full_text.contains("what time is it"));
    }

    #[tokio::test]
    async fn empty_prompt_still_ends_with_eot() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let req = m::Request::Complete(m::CompleteRequest {
            text: "".into(),
            dialog_id: "d1".into(),
            turn_number: 1,
            conversation_history: Vec::new(),
        });
        loader_wire::write_frame(&mut stream, &req).await.expect("write");

        let mut saw_eot = false;
        for _ in 0..32 {
            let chunk: LlmChunk = loader_wire::read_frame(&mut stream).await.expect("chunk");
            if chunk.eot {
                saw_eot = true;
                break;
            }
        }
        assert!(saw_eot);
    }
}
