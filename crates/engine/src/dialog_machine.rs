// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dialog state machine (§4.4) — the most critical subsystem.
//!
//! Modeled as a pure reducer: `DialogMachine::handle_event` takes one event
//! off the single-consumer intake and returns the [`Effect`]s the caller
//! must carry out (an RPC to a worker, arming a timer, writing a transcript
//! line). The machine itself never performs I/O, which is what makes it
//! testable against a [`FakeClock`] without a real transport or real
//! sleeps — the same split the grounding codebase uses between its event
//! handlers and its adapters.

use loader_core::{Clock, Dialog, DialogId, Speaker};

use crate::error::DialogError;
use crate::phrase_chooser::PhraseChooser;

/// Fine-grained phase within an active Dialog (§4.4). Distinct from
/// `loader_core::SystemState`, which only distinguishes `IDLE` from
/// `DIALOG` at the orchestrator level; this is internal bookkeeping the
/// engine needs to know which event is legal next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogPhase {
    Idle,
    AwaitingConfirmation,
    Listening,
    Thinking,
    Speaking,
    AwaitingFollowUp,
}

impl DialogPhase {
    fn label(self) -> &'static str {
        match self {
            DialogPhase::Idle => "IDLE",
            DialogPhase::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            DialogPhase::Listening => "LISTENING",
            DialogPhase::Thinking => "THINKING",
            DialogPhase::Speaking => "SPEAKING",
            DialogPhase::AwaitingFollowUp => "AWAITING_FOLLOW_UP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApologyKind {
    EmptyTranscript,
    ListeningTimeout,
    LlmFailure,
    PlaybackFailure,
}

/// Events delivered to the machine, one at a time, through the intake.
#[derive(Debug, Clone)]
pub enum DialogEvent {
    Wake { confidence: f32, timestamp_ms: u64 },
    ConfirmationSpoken,
    SttFinal { dialog_id: String, text: String },
    ListeningTimedOut { dialog_id: String },
    FirstLlmChunk { dialog_id: String, text: String },
    LlmChunk { dialog_id: String, text: String },
    LlmEot { dialog_id: String },
    LlmStreamClosedWithoutEot { dialog_id: String },
    PlaybackFinished { dialog_id: String },
    PlaybackError { dialog_id: String },
    FollowUpAudioDetected { dialog_id: String },
    FollowUpTimedOut { dialog_id: String },
    Shutdown,
}

impl DialogEvent {
    fn label(&self) -> &'static str {
        match self {
            DialogEvent::Wake { .. } => "Wake",
            DialogEvent::ConfirmationSpoken => "ConfirmationSpoken",
            DialogEvent::SttFinal { .. } => "SttFinal",
            DialogEvent::ListeningTimedOut { .. } => "ListeningTimedOut",
            DialogEvent::FirstLlmChunk { .. } => "FirstLlmChunk",
            DialogEvent::LlmChunk { .. } => "LlmChunk",
            DialogEvent::LlmEot { .. } => "LlmEot",
            DialogEvent::LlmStreamClosedWithoutEot { .. } => "LlmStreamClosedWithoutEot",
            DialogEvent::PlaybackFinished { .. } => "PlaybackFinished",
            DialogEvent::PlaybackError { .. } => "PlaybackError",
            DialogEvent::FollowUpAudioDetected { .. } => "FollowUpAudioDetected",
            DialogEvent::FollowUpTimedOut { .. } => "FollowUpTimedOut",
            DialogEvent::Shutdown => "Shutdown",
        }
    }
}

/// Side effects the caller must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    SpeakConfirmation { dialog_id: String, phrase: String },
    DisableWake,
    EnableWake,
    SttStart { dialog_id: String, turn_number: u32 },
    SttStop { dialog_id: String },
    Apology { dialog_id: String, kind: ApologyKind },
    StartLlmComplete { dialog_id: String, turn_number: u32, text: String },
    SpeakStreamChunk { dialog_id: String, text: String, eot: bool },
    ArmListeningTimeout { dialog_id: String, ms: u64 },
    ArmFollowUpTimer { dialog_id: String, ms: u64 },
    CancelTimers { dialog_id: String },
    WriteDialogLine { dialog_id: String, speaker: Speaker, text: String },
    DisposeDialog { dialog_id: String },
}

#[derive(Debug, Clone)]
pub struct DialogMachineConfig {
    pub confidence_threshold: f32,
    pub cooldown_ms: u64,
    pub listening_timeout_ms: u64,
    pub follow_up_timeout_ms: u64,
    pub confirmation_phrases: Vec<String>,
}

impl Default for DialogMachineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            cooldown_ms: 1000,
            listening_timeout_ms: 30_000,
            follow_up_timeout_ms: 4_000,
            confirmation_phrases: vec!["Yes?".to_string()],
        }
    }
}

/// Drives one Dialog at a time (invariant D1 is enforced by construction:
/// there is exactly one `current` slot).
pub struct DialogMachine<C: Clock, P: PhraseChooser> {
    clock: C,
    phrases: P,
    config: DialogMachineConfig,
    phase: DialogPhase,
    current: Option<Dialog>,
    last_accepted_wake_ms: Option<u64>,
}

impl<C: Clock, P: PhraseChooser> DialogMachine<C, P> {
    pub fn new(clock: C, phrases: P, config: DialogMachineConfig) -> Self {
        Self {
            clock,
            phrases,
            config,
            phase: DialogPhase::Idle,
            current: None,
            last_accepted_wake_ms: None,
        }
    }

    pub fn phase(&self) -> DialogPhase {
        self.phase
    }

    pub fn current_dialog_id(&self) -> Option<&str> {
        self.current.as_ref().map(|d| d.id.as_str())
    }

    fn check_dialog_id(&self, incoming: &str) -> Result<(), DialogError> {
        match &self.current {
            Some(d) if d.id.as_str() == incoming => Ok(()),
            Some(d) => Err(DialogError::StaleDialogId {
                event_dialog_id: incoming.to_string(),
                active_dialog_id: d.id.as_str().to_string(),
            }),
            None => Err(DialogError::NoActiveDialog),
        }
    }

    /// Reset to `IDLE` with no active Dialog, re-enabling W. Used both by
    /// the normal follow-up-timeout path and by orchestrator shutdown.
    fn end_dialog(&mut self) -> Vec<Effect> {
        let dialog_id = self.current.take().map(|d| d.id.as_str().to_string());
        self.phase = DialogPhase::Idle;
        let mut effects = vec![Effect::EnableWake];
        if let Some(id) = dialog_id {
            effects.push(Effect::CancelTimers { dialog_id: id.clone() });
            effects.push(Effect::DisposeDialog { dialog_id: id });
        }
        effects
    }

    fn choose_confirmation_phrase(&self) -> String {
        self.phrases
            .choose(&self.config.confirmation_phrases)
            .cloned()
            .unwrap_or_default()
    }

    pub fn handle_event(&mut self, event: DialogEvent) -> Result<Vec<Effect>, DialogError> {
        let event_label = event.label();
        let phase = self.phase;
        match (phase, event) {
            (_, DialogEvent::Shutdown) => Ok(self.end_dialog()),

            (DialogPhase::Idle, DialogEvent::Wake { confidence, timestamp_ms }) => {
                self.try_accept_wake(confidence, timestamp_ms)
            }

            (DialogPhase::AwaitingConfirmation, DialogEvent::ConfirmationSpoken) => {
                let current = self.current.as_ref().ok_or(DialogError::NoActiveDialog)?;
                let dialog_id = current.id.as_str().to_string();
                let turn_number = current.turn_number;
                self.phase = DialogPhase::Listening;
                Ok(vec![
                    Effect::SttStart { dialog_id: dialog_id.clone(), turn_number },
                    Effect::ArmListeningTimeout { dialog_id, ms: self.config.listening_timeout_ms },
                ])
            }

            (DialogPhase::Listening, DialogEvent::SttFinal { dialog_id, text }) => {
                self.check_dialog_id(&dialog_id)?;
                if text.trim().is_empty() {
                    Ok(self.fail_turn(dialog_id, ApologyKind::EmptyTranscript))
                } else {
                    self.advance_to_thinking(dialog_id, text)
                }
            }
            (DialogPhase::Listening, DialogEvent::ListeningTimedOut { dialog_id }) => {
                self.check_dialog_id(&dialog_id)?;
                Ok(self.fail_turn(dialog_id, ApologyKind::ListeningTimeout))
            }

            (DialogPhase::Thinking, DialogEvent::FirstLlmChunk { dialog_id, text }) => {
                self.check_dialog_id(&dialog_id)?;
                self.phase = DialogPhase::Speaking;
                Ok(vec![Effect::SpeakStreamChunk { dialog_id, text, eot: false }])
            }
            (DialogPhase::Thinking, DialogEvent::LlmStreamClosedWithoutEot { dialog_id }) => {
                self.check_dialog_id(&dialog_id)?;
                Ok(self.fail_turn(dialog_id, ApologyKind::LlmFailure))
            }

            (DialogPhase::Speaking, DialogEvent::LlmChunk { dialog_id, text }) => {
                self.check_dialog_id(&dialog_id)?;
                Ok(vec![Effect::SpeakStreamChunk { dialog_id, text, eot: false }])
            }
            // Normal end-of-turn and "closed without eot" (§4.4 tie-break)
            // both forward a final, empty-text, eot chunk to V.
            (DialogPhase::Speaking, DialogEvent::LlmEot { dialog_id })
            | (DialogPhase::Speaking, DialogEvent::LlmStreamClosedWithoutEot { dialog_id }) => {
                self.check_dialog_id(&dialog_id)?;
                Ok(vec![Effect::SpeakStreamChunk { dialog_id, text: String::new(), eot: true }])
            }
            (DialogPhase::Speaking, DialogEvent::PlaybackError { dialog_id }) => {
                self.check_dialog_id(&dialog_id)?;
                Ok(self.fail_turn(dialog_id, ApologyKind::PlaybackFailure))
            }
            (DialogPhase::Speaking, DialogEvent::PlaybackFinished { dialog_id }) => {
                self.check_dialog_id(&dialog_id)?;
                self.phase = DialogPhase::AwaitingFollowUp;
                Ok(vec![Effect::ArmFollowUpTimer { dialog_id, ms: self.config.follow_up_timeout_ms }])
            }

            (DialogPhase::AwaitingFollowUp, DialogEvent::FollowUpAudioDetected { dialog_id }) => {
                self.check_dialog_id(&dialog_id)?;
                let turn_number = {
                    let dialog = self.current.as_mut().ok_or(DialogError::NoActiveDialog)?;
                    dialog.advance_turn();
                    dialog.turn_number
                };
                self.phase = DialogPhase::Listening;
                Ok(vec![
                    Effect::SttStart { dialog_id: dialog_id.clone(), turn_number },
                    Effect::ArmListeningTimeout { dialog_id, ms: self.config.listening_timeout_ms },
                ])
            }
            (DialogPhase::AwaitingFollowUp, DialogEvent::FollowUpTimedOut { dialog_id }) => {
                self.check_dialog_id(&dialog_id)?;
                Ok(self.end_dialog())
            }

            _ => Err(DialogError::UnexpectedEvent { event: event_label, phase: phase.label() }),
        }
    }

    fn try_accept_wake(&mut self, confidence: f32, timestamp_ms: u64) -> Result<Vec<Effect>, DialogError> {
        if confidence < self.config.confidence_threshold {
            return Ok(vec![]);
        }
        if let Some(last) = self.last_accepted_wake_ms {
            if timestamp_ms.saturating_sub(last) < self.config.cooldown_ms {
                return Ok(vec![]);
            }
        }
        self.last_accepted_wake_ms = Some(timestamp_ms);
        let dialog_id = DialogId::from_epoch_ms(self.clock.epoch_ms(), 0);
        let phrase = self.choose_confirmation_phrase();
        self.current = Some(Dialog::start(dialog_id, timestamp_ms));
        self.phase = DialogPhase::AwaitingConfirmation;
        Ok(vec![
            Effect::DisableWake,
            Effect::SpeakConfirmation { dialog_id: dialog_id.as_str().to_string(), phrase },
        ])
    }

    fn fail_turn(&mut self, dialog_id: String, kind: ApologyKind) -> Vec<Effect> {
        self.phase = DialogPhase::AwaitingFollowUp;
        vec![
            Effect::Apology { dialog_id: dialog_id.clone(), kind },
            Effect::ArmFollowUpTimer { dialog_id, ms: self.config.follow_up_timeout_ms },
        ]
    }

    fn advance_to_thinking(&mut self, dialog_id: String, text: String) -> Result<Vec<Effect>, DialogError> {
        self.phase = DialogPhase::Thinking;
        let turn_number = self.current.as_ref().ok_or(DialogError::NoActiveDialog)?.turn_number;
        Ok(vec![
            Effect::WriteDialogLine { dialog_id: dialog_id.clone(), speaker: Speaker::User, text: text.clone() },
            Effect::StartLlmComplete { dialog_id, turn_number, text },
        ])
    }
}
