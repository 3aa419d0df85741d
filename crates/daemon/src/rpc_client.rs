// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin TCP client helpers for talking to a worker (§6).

use std::net::SocketAddr;
use std::time::Duration;

use loader_wire::TransportError;
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::TcpStream;

/// Per-RPC timeout for unary calls (§5: "Per-RPC timeout: unary 2 s").
const UNARY_TIMEOUT: Duration = Duration::from_secs(2);

/// Open a fresh connection, send one request, and read back one response.
/// Workers are single-request-per-connection for everything except the
/// streaming RPCs (`W.Events`, `S.Results`, `M.Complete`, `V.PlaybackEvents`),
/// which use [`open_stream`] instead and carry no hard timeout.
pub async fn call<Req: Serialize, Resp: DeserializeOwned>(
    addr: SocketAddr,
    request: &Req,
) -> Result<Resp, TransportError> {
    match tokio::time::timeout(UNARY_TIMEOUT, call_inner(addr, request)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(UNARY_TIMEOUT)),
    }
}

async fn call_inner<Req: Serialize, Resp: DeserializeOwned>(
    addr: SocketAddr,
    request: &Req,
) -> Result<Resp, TransportError> {
    let mut stream = TcpStream::connect(addr).await?;
    loader_wire::write_frame(&mut stream, request).await?;
    loader_wire::read_frame(&mut stream).await
}

/// Open a connection and send the initiating request, leaving the stream
/// open for the caller to read a sequence of response frames from.
pub async fn open_stream<Req: Serialize>(addr: SocketAddr, request: &Req) -> Result<TcpStream, TransportError> {
    let mut stream = TcpStream::connect(addr).await?;
    loader_wire::write_frame(&mut stream, request).await?;
    Ok(stream)
}
