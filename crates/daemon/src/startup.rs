// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup sequence (§4.1): clear orphans, enforce the VRAM guardrail, boot
//! every worker in order, then speak the warm-up greeting.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use loader_adapters::{AcceleratorProbe, NvidiaSmiProbe, SystemLauncher};
use loader_core::{default_readiness_timeout, Config, ServiceDescriptor, ServiceName, SystemState};
use loader_engine::{enforce_guardrail, SupervisorError, Supervisor, TcpHealthClient};
use loader_wire::v;

use crate::rpc_client;
use crate::state::OrchestratorState;

fn worker_exe_path(name: ServiceName) -> PathBuf {
    let dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    dir.join(format!("loader-{name}"))
}

fn descriptors(config: &Config) -> Vec<ServiceDescriptor> {
    let port_of = |name: ServiceName| match name {
        ServiceName::Logger => config.logger.port,
        ServiceName::Kwd => config.kwd.port,
        ServiceName::Stt => config.stt.port,
        ServiceName::Llm => config.llm.port,
        ServiceName::Tts => config.tts.port,
    };
    ServiceName::BOOT_ORDER
        .into_iter()
        .map(|name| ServiceDescriptor {
            name,
            port: port_of(name),
            exe_path: worker_exe_path(name),
            exe_args: vec![],
            readiness_timeout: default_readiness_timeout(name),
        })
        .collect()
}

/// Run the full startup sequence and return the shared orchestrator state
/// once every worker is `SERVING` (§4.1 steps 1-4).
pub async fn run(config: Config) -> Result<Arc<OrchestratorState>, SupervisorError> {
    let probe: Arc<dyn AcceleratorProbe> = Arc::new(NvidiaSmiProbe::default());
    let launcher = Arc::new(SystemLauncher::default());
    let health = Arc::new(TcpHealthClient::default());
    let supervisor = Supervisor::new(launcher, health, descriptors(&config));

    let state = OrchestratorState::new(config, supervisor, probe);
    state.set_state(SystemState::Starting).await;

    {
        let supervisor = state.supervisor.lock().await;
        supervisor.clear_orphans().await;
    }

    let epoch_ms = now_epoch_ms();
    enforce_guardrail(state.probe.as_ref(), state.config.system.min_vram_mb, epoch_ms).await?;

    {
        let mut supervisor = state.supervisor.lock().await;
        supervisor.start_all().await?;
    }

    speak_warmup_greeting(&state).await;

    state.set_state(SystemState::Idle).await;
    Ok(state)
}

async fn speak_warmup_greeting(state: &OrchestratorState) {
    let greeting = state.config.kwd.warmup_greeting.clone();
    if greeting.trim().is_empty() {
        return;
    }
    let addr = SocketAddr::from(([127, 0, 0, 1], state.config.tts.port));
    let request = v::Request::Speak(v::SpeakRequest { text: greeting, dialog_id: String::new(), voice: None });
    if let Err(err) = rpc_client::call::<_, v::SpeakResponse>(addr, &request).await {
        tracing::warn!(error = %err, "warm-up greeting failed; continuing startup");
    }
}

fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
