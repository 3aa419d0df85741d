// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Process supervision and dialog orchestration: the orchestrator's brain,
//! kept free of transport and CLI concerns.

pub mod dialog_machine;
pub mod error;
pub mod guardrail;
pub mod phrase_chooser;
pub mod supervisor;

pub use dialog_machine::{ApologyKind, DialogEvent, DialogMachine, DialogMachineConfig, DialogPhase, Effect};
pub use error::{DialogError, SupervisorError};
pub use guardrail::{check as check_guardrail, enforce as enforce_guardrail, GuardrailCheck};
pub use phrase_chooser::{FixedPhraseChooser, PhraseChooser, RandomPhraseChooser};
pub use supervisor::{HealthClient, Supervisor, TcpHealthClient};
