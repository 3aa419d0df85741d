// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for the voice-assistant orchestrator and its workers.
//!
//! Wire format: 4-byte big-endian length prefix + JSON payload, over a
//! loopback `tokio::net::TcpStream` (§6).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod codec;
mod rpc;

pub use codec::{decode, encode, read_frame, read_message, write_frame, write_message, TransportError, MAX_FRAME_BYTES};
pub use rpc::{l, m, o, s, v, w, Ack, CheckRequest, CheckResponse};
