// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The orchestrator's own control RPC surface (§4.1 "Control surface", §6
//! module O).

use std::sync::Arc;

use loader_adapters::AcceleratorProbe;
use loader_core::{HealthState, ServiceName};
use loader_wire::{o, CheckResponse};
use tokio::net::{TcpListener, TcpStream};

use crate::state::OrchestratorState;

pub async fn serve(state: Arc<OrchestratorState>) -> std::io::Result<()> {
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], state.config.loader.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "control surface listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(state, stream).await {
                tracing::debug!(%peer, error = %err, "control connection ended");
            }
        });
    }
}

async fn handle_connection(state: Arc<OrchestratorState>, mut stream: TcpStream) -> Result<(), loader_wire::TransportError> {
    let request: o::Request = loader_wire::read_frame(&mut stream).await?;
    match request {
        o::Request::Check(_) => {
            let response = CheckResponse { status: HealthState::Serving };
            loader_wire::write_frame(&mut stream, &response).await
        }
        o::Request::StartService(req) => {
            let response = start_service(&state, &req.service_name).await;
            loader_wire::write_frame(&mut stream, &response).await
        }
        o::Request::StopService(req) => {
            let response = stop_service(&state, &req.service_name).await;
            loader_wire::write_frame(&mut stream, &response).await
        }
        o::Request::GetPids => {
            let pids = state.supervisor.lock().await.pids();
            loader_wire::write_frame(&mut stream, &o::GetPidsResponse { pids }).await
        }
        o::Request::GetStatus => {
            let response = get_status(&state).await;
            loader_wire::write_frame(&mut stream, &response).await
        }
    }
}

async fn start_service(state: &OrchestratorState, service_name: &str) -> o::ServiceResponse {
    let Some(name) = ServiceName::parse(service_name) else {
        return o::ServiceResponse { success: false, message: format!("unknown service {service_name:?}"), code: 1 };
    };
    match state.supervisor.lock().await.start_worker(name).await {
        Ok(()) => o::ServiceResponse { success: true, message: String::new(), code: 0 },
        Err(err) => o::ServiceResponse { success: false, message: err.to_string(), code: 1 },
    }
}

async fn stop_service(state: &OrchestratorState, service_name: &str) -> o::ServiceResponse {
    let Some(name) = ServiceName::parse(service_name) else {
        return o::ServiceResponse { success: false, message: format!("unknown service {service_name:?}"), code: 1 };
    };
    match state.supervisor.lock().await.stop_worker(name).await {
        Ok(()) => o::ServiceResponse { success: true, message: String::new(), code: 0 },
        Err(err) => o::ServiceResponse { success: false, message: err.to_string(), code: 1 },
    }
}

async fn get_status(state: &OrchestratorState) -> o::GetStatusResponse {
    let service_health = state.supervisor.lock().await.health_snapshot();

    let epoch_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let vram_used_mb = match state.probe.sample(epoch_ms).await {
        Ok(sample) => sample.used_mb,
        Err(_) => 0,
    };

    o::GetStatusResponse {
        state: state.state().await,
        service_health,
        vram_used_mb,
        uptime_ms: state.uptime_ms(),
    }
}
