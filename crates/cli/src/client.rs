// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin client for the orchestrator's control surface (§4.1, §6 module O).

use std::net::SocketAddr;

use loader_wire::{o, CheckResponse, TransportError};
use tokio::net::TcpStream;

use crate::exit_error::ExitError;

pub struct DaemonClient {
    addr: SocketAddr,
}

impl DaemonClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    async fn call<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        request: &Req,
    ) -> Result<Resp, TransportError> {
        let mut stream = TcpStream::connect(self.addr).await?;
        loader_wire::write_frame(&mut stream, request).await?;
        loader_wire::read_frame(&mut stream).await
    }

    pub async fn check(&self) -> Result<CheckResponse, ExitError> {
        self.call(&o::Request::Check(loader_wire::CheckRequest { service_name: "loaderd".into() }))
            .await
            .map_err(connect_error)
    }

    pub async fn status(&self) -> Result<o::GetStatusResponse, ExitError> {
        self.call(&o::Request::GetStatus).await.map_err(connect_error)
    }

    pub async fn pids(&self) -> Result<o::GetPidsResponse, ExitError> {
        self.call(&o::Request::GetPids).await.map_err(connect_error)
    }

    pub async fn start_service(&self, service_name: &str) -> Result<o::ServiceResponse, ExitError> {
        self.call(&o::Request::StartService(o::ServiceRequest { service_name: service_name.to_string() }))
            .await
            .map_err(connect_error)
    }

    pub async fn stop_service(&self, service_name: &str) -> Result<o::ServiceResponse, ExitError> {
        self.call(&o::Request::StopService(o::ServiceRequest { service_name: service_name.to_string() }))
            .await
            .map_err(connect_error)
    }
}

fn connect_error(err: TransportError) -> ExitError {
    ExitError::new(2, format!("could not reach loaderd: {err}"))
}
