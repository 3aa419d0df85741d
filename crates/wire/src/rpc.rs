// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message shapes for every worker RPC (§6).
//!
//! Streamed items are the same entities `loader-core` already defines for
//! in-process use (`WakeEvent`, `SttResult`, `LlmChunk`, `PlaybackEvent`);
//! the wire crate adds only the request/response wrappers and the
//! dispatch envelope used to route a frame to the right handler.

use std::collections::HashMap;

use loader_core::{HealthState, LlmChunk, PlaybackEvent, Speaker, SttResult, SystemState, WakeEvent};
use serde::{Deserialize, Serialize};

/// Every worker exposes this standard health probe (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub service_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub status: HealthState,
}

/// Generic acknowledgement used by every `{success, message}` RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
}

impl Ack {
    pub fn ok() -> Self {
        Self { success: true, message: String::new() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

pub mod w {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ConfigureRequest {
        pub threshold: f32,
        pub cooldown_ms: u64,
        pub phrases: Vec<String>,
    }

    /// `W.Events` streams these until the connection closes.
    pub type EventItem = WakeEvent;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "rpc", content = "payload")]
    pub enum Request {
        Check(CheckRequest),
        Start,
        Stop,
        Configure(ConfigureRequest),
        Events,
    }
}

pub mod s {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StartRequest {
        pub dialog_id: String,
        pub turn_number: u32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StopRequest {
        pub dialog_id: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ResultsRequest {
        pub dialog_id: String,
        pub turn_number: u32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ConfigureRequest {
        pub language: String,
        pub vad_silence_ms: u64,
        pub aec_enabled: bool,
    }

    /// `S.Results` streams these; a frame with `is_final = true` ends the turn.
    pub type ResultItem = SttResult;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "rpc", content = "payload")]
    pub enum Request {
        Check(CheckRequest),
        Start(StartRequest),
        Stop(StopRequest),
        Results(ResultsRequest),
        Configure(ConfigureRequest),
    }
}

pub mod m {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ConversationTurn {
        pub speaker: Speaker,
        pub text: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct CompleteRequest {
        pub text: String,
        pub dialog_id: String,
        pub turn_number: u32,
        #[serde(default)]
        pub conversation_history: Vec<ConversationTurn>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ConfigureRequest {
        pub model: String,
        pub max_tokens: u32,
        pub temperature: f32,
    }

    /// `M.Complete` streams these; the chunk with `eot = true` ends the turn.
    pub type ChunkItem = LlmChunk;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "rpc", content = "payload")]
    pub enum Request {
        Check(CheckRequest),
        Complete(CompleteRequest),
        Configure(ConfigureRequest),
    }
}

pub mod v {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SpeakRequest {
        pub text: String,
        pub dialog_id: String,
        #[serde(default)]
        pub voice: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SpeakResponse {
        pub success: bool,
        pub message: String,
        pub duration_ms: u64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SpeakStreamChunk {
        pub text: String,
        pub eot: bool,
        pub dialog_id: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PlaybackEventsRequest {
        pub dialog_id: String,
        pub turn_number: u32,
    }

    /// `V.PlaybackEvents` streams these (§3 invariant P1: exactly one
    /// `finished`, or an error, per completed turn).
    pub type PlaybackItem = PlaybackEvent;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "rpc", content = "payload")]
    pub enum Request {
        Check(CheckRequest),
        Speak(SpeakRequest),
        SpeakStream,
        PlaybackEvents(PlaybackEventsRequest),
    }
}

pub mod l {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct WriteAppRequest {
        pub service: String,
        pub event: String,
        pub message: String,
        pub level: String,
        pub timestamp_ms: u64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct NewDialogRequest {
        pub timestamp_ms: u64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct NewDialogResponse {
        pub dialog_id: String,
        pub file_path: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct WriteDialogRequest {
        pub dialog_id: String,
        pub speaker: Speaker,
        pub text: String,
        pub timestamp_ms: u64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "rpc", content = "payload")]
    pub enum Request {
        Check(CheckRequest),
        WriteApp(WriteAppRequest),
        NewDialog(NewDialogRequest),
        WriteDialog(WriteDialogRequest),
    }
}

pub mod o {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ServiceRequest {
        pub service_name: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ServiceResponse {
        pub success: bool,
        pub message: String,
        pub code: i32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct GetPidsResponse {
        pub pids: HashMap<String, u32>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct GetStatusResponse {
        pub state: SystemState,
        pub service_health: HashMap<String, HealthState>,
        pub vram_used_mb: u32,
        pub uptime_ms: u64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "rpc", content = "payload")]
    pub enum Request {
        Check(CheckRequest),
        StartService(ServiceRequest),
        StopService(ServiceRequest),
        GetPids,
        GetStatus,
    }
}
