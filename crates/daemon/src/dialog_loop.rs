// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drives the dialog state machine from live worker traffic: wake events
//! feed in, effects fan out to S/M/V/L, and their replies feed back in.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use loader_core::{Clock, Speaker, SystemClock, SystemState};
use loader_engine::{ApologyKind, DialogEvent, DialogMachine, DialogMachineConfig, Effect, RandomPhraseChooser};
use loader_wire::{l, m, s, v, w};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::rpc_client;
use crate::state::OrchestratorState;

fn apology_text(kind: ApologyKind) -> &'static str {
    match kind {
        ApologyKind::EmptyTranscript => "Sorry, I didn't catch that.",
        ApologyKind::ListeningTimeout => "Sorry, I didn't hear anything.",
        ApologyKind::LlmFailure => "Sorry, I'm having trouble thinking right now.",
        ApologyKind::PlaybackFailure => "Sorry, something went wrong playing that back.",
    }
}

/// Per-dialog bookkeeping the loop needs across effects: the open
/// text-to-speech stream and the timer tasks armed against it.
#[derive(Default)]
struct DialogRuntime {
    speak_stream: Option<TcpStream>,
    listening_timeout: Option<JoinHandle<()>>,
    follow_up_timer: Option<JoinHandle<()>>,
}

impl DialogRuntime {
    fn cancel_timers(&mut self) {
        if let Some(handle) = self.listening_timeout.take() {
            handle.abort();
        }
        if let Some(handle) = self.follow_up_timer.take() {
            handle.abort();
        }
    }
}

/// Spawn the W wake-event listener and the main effect-execution loop.
/// Runs until the channel closes (process shutdown).
pub fn spawn(state: Arc<OrchestratorState>) -> JoinHandle<()> {
    let (tx, rx) = mpsc::channel(64);
    spawn_wake_listener(state.clone(), tx.clone());
    tokio::spawn(run_loop(state, tx, rx))
}

fn spawn_wake_listener(state: Arc<OrchestratorState>, tx: mpsc::Sender<DialogEvent>) {
    tokio::spawn(async move {
        let addr = SocketAddr::from(([127, 0, 0, 1], state.config.kwd.port));
        loop {
            match rpc_client::open_stream(addr, &w::Request::Events).await {
                Ok(mut stream) => loop {
                    match loader_wire::read_frame::<_, w::EventItem>(&mut stream).await {
                        Ok(event) => {
                            let sent = tx
                                .send(DialogEvent::Wake { confidence: event.confidence, timestamp_ms: event.timestamp_ms })
                                .await;
                            if sent.is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "W.Events stream ended; reconnecting");
                            break;
                        }
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "could not reach W for Events; retrying");
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    });
}

async fn run_loop(state: Arc<OrchestratorState>, tx: mpsc::Sender<DialogEvent>, mut rx: mpsc::Receiver<DialogEvent>) {
    let mut machine = DialogMachine::new(SystemClock, RandomPhraseChooser, DialogMachineConfig::default());
    let mut runtimes: HashMap<String, DialogRuntime> = HashMap::new();

    while let Some(event) = rx.recv().await {
        let effects = match machine.handle_event(event) {
            Ok(effects) => effects,
            Err(err) => {
                tracing::warn!(error = %err, "dropping event the dialog machine rejected");
                continue;
            }
        };
        for effect in effects {
            execute_effect(&state, &tx, &mut runtimes, effect).await;
        }
        state.set_state(if machine.current_dialog_id().is_some() { SystemState::Dialog } else { SystemState::Idle }).await;
    }
}

async fn execute_effect(
    state: &Arc<OrchestratorState>,
    tx: &mpsc::Sender<DialogEvent>,
    runtimes: &mut HashMap<String, DialogRuntime>,
    effect: Effect,
) {
    match effect {
        Effect::DisableWake => fire_and_forget_w(state, w::Request::Stop).await,
        Effect::EnableWake => fire_and_forget_w(state, w::Request::Start).await,

        Effect::SpeakConfirmation { dialog_id, phrase } => {
            speak(state, &dialog_id, &phrase).await;
            let _ = tx.send(DialogEvent::ConfirmationSpoken).await;
        }

        Effect::SttStart { dialog_id, turn_number } => {
            let addr = stt_addr(state);
            let request = s::Request::Start(s::StartRequest { dialog_id: dialog_id.clone(), turn_number });
            if let Err(err) = rpc_client::call::<_, loader_wire::Ack>(addr, &request).await {
                tracing::warn!(error = %err, dialog_id, "S.Start failed");
            }
            spawn_stt_results(state.clone(), tx.clone(), dialog_id, turn_number);
        }
        Effect::SttStop { dialog_id } => {
            let addr = stt_addr(state);
            let request = s::Request::Stop(s::StopRequest { dialog_id });
            let _ = rpc_client::call::<_, loader_wire::Ack>(addr, &request).await;
        }

        Effect::Apology { dialog_id, kind } => {
            speak(state, &dialog_id, apology_text(kind)).await;
        }

        Effect::StartLlmComplete { dialog_id, turn_number, text } => {
            spawn_llm_complete(state.clone(), tx.clone(), dialog_id, turn_number, text);
        }

        Effect::SpeakStreamChunk { dialog_id, text, eot } => {
            speak_stream_chunk(state, runtimes, tx, &dialog_id, text, eot).await;
        }

        Effect::ArmListeningTimeout { dialog_id, ms } => {
            let handle = arm_timer(tx.clone(), dialog_id.clone(), ms, DialogEvent::ListeningTimedOut { dialog_id: dialog_id.clone() });
            runtimes.entry(dialog_id).or_default().listening_timeout = Some(handle);
        }
        Effect::ArmFollowUpTimer { dialog_id, ms } => {
            let handle = arm_timer(tx.clone(), dialog_id.clone(), ms, DialogEvent::FollowUpTimedOut { dialog_id: dialog_id.clone() });
            runtimes.entry(dialog_id).or_default().follow_up_timer = Some(handle);
        }
        Effect::CancelTimers { dialog_id } => {
            if let Some(runtime) = runtimes.get_mut(&dialog_id) {
                runtime.cancel_timers();
            }
        }

        Effect::WriteDialogLine { dialog_id, speaker, text } => {
            write_dialog_line(state, dialog_id, speaker, text).await;
        }
        Effect::DisposeDialog { dialog_id } => {
            runtimes.remove(&dialog_id);
        }
    }
}

fn stt_addr(state: &OrchestratorState) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], state.config.stt.port))
}

fn llm_addr(state: &OrchestratorState) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], state.config.llm.port))
}

fn tts_addr(state: &OrchestratorState) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], state.config.tts.port))
}

fn logger_addr(state: &OrchestratorState) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], state.config.logger.port))
}

async fn fire_and_forget_w(state: &Arc<OrchestratorState>, request: w::Request) {
    let addr = SocketAddr::from(([127, 0, 0, 1], state.config.kwd.port));
    if let Err(err) = rpc_client::call::<_, loader_wire::Ack>(addr, &request).await {
        tracing::warn!(error = %err, "W control RPC failed");
    }
}

async fn speak(state: &Arc<OrchestratorState>, dialog_id: &str, text: &str) {
    let request = v::Request::Speak(v::SpeakRequest { text: text.to_string(), dialog_id: dialog_id.to_string(), voice: None });
    if let Err(err) = rpc_client::call::<_, v::SpeakResponse>(tts_addr(state), &request).await {
        tracing::warn!(error = %err, dialog_id, "V.Speak failed");
    }
}

/// Writes one streamed chunk to V's `SpeakStream`, opening the connection on
/// the first chunk of a turn and spawning the matching playback-events
/// listener; closes and forwards terminal status to the dialog machine once
/// `eot` true chunk has been written.
async fn speak_stream_chunk(
    state: &Arc<OrchestratorState>,
    runtimes: &mut HashMap<String, DialogRuntime>,
    tx: &mpsc::Sender<DialogEvent>,
    dialog_id: &str,
    text: String,
    eot: bool,
) {
    let runtime = runtimes.entry(dialog_id.to_string()).or_default();
    if runtime.speak_stream.is_none() {
        match rpc_client::open_stream(tts_addr(state), &v::Request::SpeakStream).await {
            Ok(stream) => {
                runtime.speak_stream = Some(stream);
                spawn_playback_events(state.clone(), tx.clone(), dialog_id.to_string());
            }
            Err(err) => {
                tracing::warn!(error = %err, dialog_id, "could not open V.SpeakStream");
                return;
            }
        }
    }

    if let Some(stream) = runtime.speak_stream.as_mut() {
        let chunk = v::SpeakStreamChunk { text, eot, dialog_id: dialog_id.to_string() };
        if let Err(err) = loader_wire::write_frame(stream, &chunk).await {
            tracing::warn!(error = %err, dialog_id, "V.SpeakStream write failed");
            let _ = tx.send(DialogEvent::PlaybackError { dialog_id: dialog_id.to_string() }).await;
        }
    }
    if eot {
        runtime.speak_stream = None;
    }
}

fn spawn_playback_events(state: Arc<OrchestratorState>, tx: mpsc::Sender<DialogEvent>, dialog_id: String) {
    tokio::spawn(async move {
        let request = v::Request::PlaybackEvents(v::PlaybackEventsRequest { dialog_id: dialog_id.clone(), turn_number: 0 });
        let mut stream = match rpc_client::open_stream(tts_addr(&state), &request).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, dialog_id, "could not open V.PlaybackEvents");
                let _ = tx.send(DialogEvent::PlaybackError { dialog_id }).await;
                return;
            }
        };
        loop {
            match loader_wire::read_frame::<_, v::PlaybackItem>(&mut stream).await {
                Ok(item) => match item.event_type {
                    loader_core::PlaybackEventKind::Finished => {
                        let _ = tx.send(DialogEvent::PlaybackFinished { dialog_id }).await;
                        return;
                    }
                    loader_core::PlaybackEventKind::Error => {
                        let _ = tx.send(DialogEvent::PlaybackError { dialog_id }).await;
                        return;
                    }
                    _ => {}
                },
                Err(err) => {
                    tracing::warn!(error = %err, dialog_id, "V.PlaybackEvents stream ended without Finished");
                    let _ = tx.send(DialogEvent::PlaybackError { dialog_id }).await;
                    return;
                }
            }
        }
    });
}

fn spawn_stt_results(state: Arc<OrchestratorState>, tx: mpsc::Sender<DialogEvent>, dialog_id: String, turn_number: u32) {
    tokio::spawn(async move {
        let request = s::Request::Results(s::ResultsRequest { dialog_id: dialog_id.clone(), turn_number });
        let mut stream = match rpc_client::open_stream(stt_addr(&state), &request).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, dialog_id, "could not open S.Results");
                return;
            }
        };
        loop {
            match loader_wire::read_frame::<_, s::ResultItem>(&mut stream).await {
                Ok(result) if result.is_final => {
                    let _ = tx.send(DialogEvent::SttFinal { dialog_id, text: result.text }).await;
                    return;
                }
                Ok(_interim) => {}
                Err(err) => {
                    tracing::debug!(error = %err, dialog_id, "S.Results stream ended before a final result");
                    return;
                }
            }
        }
    });
}

fn spawn_llm_complete(
    state: Arc<OrchestratorState>,
    tx: mpsc::Sender<DialogEvent>,
    dialog_id: String,
    turn_number: u32,
    text: String,
) {
    tokio::spawn(async move {
        let request = m::Request::Complete(m::CompleteRequest {
            text,
            dialog_id: dialog_id.clone(),
            turn_number,
            conversation_history: Vec::new(),
        });
        let mut stream = match rpc_client::open_stream(llm_addr(&state), &request).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, dialog_id, "could not open M.Complete");
                let _ = tx.send(DialogEvent::LlmStreamClosedWithoutEot { dialog_id }).await;
                return;
            }
        };
        let mut first = true;
        loop {
            match loader_wire::read_frame::<_, m::ChunkItem>(&mut stream).await {
                Ok(chunk) => {
                    let event = if first {
                        first = false;
                        DialogEvent::FirstLlmChunk { dialog_id: dialog_id.clone(), text: chunk.text }
                    } else {
                        DialogEvent::LlmChunk { dialog_id: dialog_id.clone(), text: chunk.text }
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                    if chunk.eot {
                        let _ = tx.send(DialogEvent::LlmEot { dialog_id }).await;
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, dialog_id, "M.Complete stream ended without eot");
                    let _ = tx.send(DialogEvent::LlmStreamClosedWithoutEot { dialog_id }).await;
                    return;
                }
            }
        }
    });
}

async fn write_dialog_line(state: &Arc<OrchestratorState>, dialog_id: String, speaker: Speaker, text: String) {
    let request = l::Request::WriteDialog(l::WriteDialogRequest {
        dialog_id,
        speaker,
        text,
        timestamp_ms: SystemClock.epoch_ms(),
    });
    if let Err(err) = rpc_client::call::<_, loader_wire::Ack>(logger_addr(state), &request).await {
        tracing::warn!(error = %err, "L.WriteDialog failed");
    }
}

fn arm_timer(tx: mpsc::Sender<DialogEvent>, dialog_id: String, ms: u64, event: DialogEvent) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        tracing::debug!(dialog_id, ms, "timer fired");
        let _ = tx.send(event).await;
    })
}
