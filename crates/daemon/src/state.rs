// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared state behind the control RPC surface and the dialog loop.

use std::sync::Arc;
use std::time::Instant;

use loader_adapters::AcceleratorProbe;
use loader_core::{Config, SystemState};
use loader_engine::Supervisor;
use tokio::sync::Mutex;

/// Everything the control surface (§4.1 "Control surface") and the dialog
/// loop need shared, mutable access to.
pub struct OrchestratorState {
    pub config: Config,
    pub supervisor: Mutex<Supervisor>,
    pub probe: Arc<dyn AcceleratorProbe>,
    pub system_state: Mutex<SystemState>,
    pub started_at: Instant,
}

impl OrchestratorState {
    pub fn new(config: Config, supervisor: Supervisor, probe: Arc<dyn AcceleratorProbe>) -> Arc<Self> {
        Arc::new(Self {
            config,
            supervisor: Mutex::new(supervisor),
            probe,
            system_state: Mutex::new(SystemState::Initializing),
            started_at: Instant::now(),
        })
    }

    pub async fn set_state(&self, state: SystemState) {
        *self.system_state.lock().await = state;
    }

    pub async fn state(&self) -> SystemState {
        *self.system_state.lock().await
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
