// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Library-boundary error enums for the supervisor and dialog machine (§7).

use loader_core::ServiceName;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown service {0:?}")]
    UnknownService(String),

    #[error("service {0} is already running")]
    AlreadyRunning(ServiceName),

    #[error("service {service} did not reach SERVING within {timeout_ms} ms")]
    ReadinessTimeout { service: ServiceName, timeout_ms: u64 },

    #[error("service {service} exhausted its restart budget")]
    RestartBudgetExhausted { service: ServiceName },

    #[error("measured free accelerator memory {free_mb} MiB is below the floor of {floor_mb} MiB")]
    VramGuardrailTripped { free_mb: u32, floor_mb: u32 },

    #[error("process error: {0}")]
    Process(#[from] loader_adapters::ProcessError),

    #[error("transport error talking to {service}: {source}")]
    Transport { service: ServiceName, #[source] source: loader_wire::TransportError },
}

/// Errors raised while driving the dialog state machine (§4.4).
///
/// Per the propagation policy in §7, none of these escape the orchestrator's
/// dialog loop as process-fatal; each call site maps them to an apology
/// effect instead. The type exists to make that mapping exhaustive and
/// testable, not to bubble up to `main`.
#[derive(Debug, Error)]
pub enum DialogError {
    #[error("event for dialog {event_dialog_id} does not match the active dialog {active_dialog_id}")]
    StaleDialogId { event_dialog_id: String, active_dialog_id: String },

    #[error("event {event:?} is not valid while the dialog machine is in phase {phase:?}")]
    UnexpectedEvent { event: &'static str, phase: &'static str },

    #[error("no dialog is currently active")]
    NoActiveDialog,
}
