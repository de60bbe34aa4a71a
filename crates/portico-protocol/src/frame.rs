// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for control-channel framing.
//!
//! Each control message is one frame:
//! - 4 bytes: payload length (little-endian)
//! - N bytes: UTF-8 JSON payload
//!
//! The reader keeps a rolling buffer so a frame split across TCP reads is
//! reassembled, and several frames arriving in one read are all extracted.
//! A payload that fails to parse as a known message is a per-frame problem:
//! the caller logs and drops it without touching any state machine. An
//! oversized length is unrecoverable and closes the channel.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::ControlMessage;

/// Maximum frame size (16 MB). The protocol does not bound lengths formally;
/// anything larger than this is treated as a framing desync.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame header size (4-byte little-endian length).
pub const HEADER_SIZE: usize = 4;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    TruncatedFrame { buffered: usize },
}

/// Encode one message to its wire bytes.
pub fn encode_message(msg: &ControlMessage) -> Result<Bytes, FrameError> {
    let payload = serde_json::to_vec(msg)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// Parse a frame payload into a message.
///
/// Kept separate from frame extraction so the caller can drop an unparseable
/// payload while the connection keeps running.
pub fn decode_message(payload: &[u8]) -> Result<ControlMessage, FrameError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Write one message as a frame to an async writer.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &ControlMessage,
) -> Result<(), FrameError> {
    let encoded = encode_message(msg)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Rolling-buffer frame reader over an async byte stream.
///
/// `next_frame` yields raw payloads in arrival order; `Ok(None)` means the
/// peer closed cleanly on a frame boundary.
pub struct FramedReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Read the next frame payload.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        loop {
            if let Some(payload) = self.extract_frame()? {
                return Ok(Some(payload));
            }
            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::TruncatedFrame {
                    buffered: self.buf.len(),
                });
            }
        }
    }

    /// Extract one complete frame from the buffer, if present.
    fn extract_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(len));
        }
        if self.buf.len() < HEADER_SIZE + len {
            return Ok(None);
        }
        self.buf.advance(HEADER_SIZE);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn heartbeat(ts: i64) -> ControlMessage {
        ControlMessage::Heartbeat { timestamp: ts }
    }

    #[tokio::test]
    async fn test_encode_then_read_round_trip() {
        let msg = ControlMessage::AllocateChannel {
            request_id: "req-42".to_string(),
            port: 41007,
        };
        let wire = encode_message(&msg).unwrap();
        let mut reader = FramedReader::new(Cursor::new(wire.to_vec()));

        let payload = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(decode_message(&payload).unwrap(), msg);
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multiple_frames_in_one_read() {
        let mut wire = Vec::new();
        for ts in 0..3 {
            wire.extend_from_slice(&encode_message(&heartbeat(ts)).unwrap());
        }
        let mut reader = FramedReader::new(Cursor::new(wire));
        for ts in 0..3 {
            let payload = reader.next_frame().await.unwrap().unwrap();
            assert_eq!(decode_message(&payload).unwrap(), heartbeat(ts));
        }
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        // A duplex pipe delivers the bytes in two writes; the rolling buffer
        // must reassemble the frame.
        let (client, server) = tokio::io::duplex(64);
        let wire = encode_message(&heartbeat(7)).unwrap();

        let writer_task = tokio::spawn(async move {
            let mut client = client;
            let (a, b) = wire.split_at(3);
            client.write_all(a).await.unwrap();
            client.flush().await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b).await.unwrap();
        });

        let mut reader = FramedReader::new(server);
        let payload = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(decode_message(&payload).unwrap(), heartbeat(7));
        writer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_length_is_fatal() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_le_bytes());
        wire.extend_from_slice(b"junk");
        let mut reader = FramedReader::new(Cursor::new(wire));
        match reader.next_frame().await {
            Err(FrameError::FrameTooLarge(_)) => {}
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_frame_is_reported() {
        let wire = encode_message(&heartbeat(1)).unwrap();
        let cut = wire.len() - 2;
        let mut reader = FramedReader::new(Cursor::new(wire[..cut].to_vec()));
        match reader.next_frame().await {
            Err(FrameError::TruncatedFrame { .. }) => {}
            other => panic!("expected TruncatedFrame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_payload_decodes_as_error_only() {
        // The frame layer hands the payload through; only decode fails, so
        // the caller can drop the frame and keep reading.
        let payload = b"not json at all";
        let mut wire = Vec::new();
        wire.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        wire.extend_from_slice(payload);
        wire.extend_from_slice(&encode_message(&heartbeat(9)).unwrap());

        let mut reader = FramedReader::new(Cursor::new(wire));
        let bad = reader.next_frame().await.unwrap().unwrap();
        assert!(decode_message(&bad).is_err());
        let good = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(decode_message(&good).unwrap(), heartbeat(9));
    }

    #[tokio::test]
    async fn test_write_message_helper() {
        let (mut client, server) = tokio::io::duplex(256);
        let msg = ControlMessage::ChannelAllocated {
            request_id: "r".to_string(),
            port: 41002,
        };
        write_message(&mut client, &msg).await.unwrap();
        drop(client);

        let mut reader = FramedReader::new(server);
        let payload = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(decode_message(&payload).unwrap(), msg);
    }
}
