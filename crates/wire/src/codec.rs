// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefixed JSON framing shared by every worker and the orchestrator
//! (§6 "Transport").

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected outright rather than allocated —
/// guards a corrupt or malicious length prefix from exhausting memory.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    FrameTooLarge { len: u32 },

    #[error("failed to encode payload as JSON: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode payload as JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("peer closed the connection")]
    Closed,

    #[error("rpc timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Serialize `value` to JSON. Returns the raw bytes, with no length prefix.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(value).map_err(TransportError::Encode)
}

/// Deserialize JSON bytes into `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(bytes).map_err(TransportError::Decode)
}

/// Read one length-prefixed frame, returning its raw payload bytes.
///
/// A clean EOF before any bytes are read maps to [`TransportError::Closed`];
/// any other truncation maps to the underlying `Io` error.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, TransportError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(TransportError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge { len });
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one length-prefixed frame containing `payload`.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), TransportError> {
    let len = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge {
        len: u32::MAX,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode `value` and write it as one frame.
pub async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), TransportError> {
    let bytes = encode(value)?;
    write_message(writer, &bytes).await
}

/// Read one frame and decode it as `T`.
pub async fn read_frame<R: AsyncRead + Unpin, T: DeserializeOwned>(
    reader: &mut R,
) -> Result<T, TransportError> {
    let bytes = read_message(reader).await?;
    decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_returns_json_without_length_prefix() {
        let encoded = encode(&serde_json::json!({"ok": true})).expect("encode failed");
        let json_str = std::str::from_utf8(&encoded).expect("should be valid UTF-8");
        assert!(json_str.starts_with('{'), "should be JSON object: {json_str}");
    }

    #[tokio::test]
    async fn read_write_message_roundtrip() {
        let original = b"hello world";

        let mut buffer = Vec::new();
        write_message(&mut buffer, original).await.expect("write failed");
        assert_eq!(buffer.len(), 4 + original.len());

        let mut cursor = std::io::Cursor::new(buffer);
        let read_back = read_message(&mut cursor).await.expect("read failed");
        assert_eq!(read_back, original);
    }

    #[tokio::test]
    async fn write_message_adds_big_endian_length_prefix() {
        let data = b"test data";

        let mut buffer = Vec::new();
        write_message(&mut buffer, data).await.expect("write failed");

        let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        assert_eq!(len, data.len());
        assert_eq!(&buffer[4..], data);
    }

    #[tokio::test]
    async fn read_message_on_immediate_eof_is_closed() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let err = read_message(&mut cursor).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn frame_over_the_limit_is_rejected_before_allocating() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buffer);
        let err = read_message(&mut cursor).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn frame_roundtrips_a_typed_value() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Ping {
            n: u32,
        }

        let mut buffer = Vec::new();
        write_frame(&mut buffer, &Ping { n: 7 }).await.unwrap();
        let mut cursor = std::io::Cursor::new(buffer);
        let got: Ping = read_frame(&mut cursor).await.unwrap();
        assert_eq!(got, Ping { n: 7 });
    }
}
