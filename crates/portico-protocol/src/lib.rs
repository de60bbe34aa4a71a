// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Portico Protocol - control-channel wire format for the proxy fabric
//!
//! This crate defines the messages exchanged on the single long-lived control
//! connection between the container side and the edge side:
//! - Channel allocation (`AllocateChannel` / `ChannelAllocated` / `Error`)
//! - Liveness (`Heartbeat`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     portico-protocol                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Messages: tagged JSON records (serde)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Framing: [u32 LE length][utf-8 json]                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: TCP (tokio)                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data channels carry raw HTTP/1.1 bytes and are not framed by this crate;
//! see `portico-http` for that side of the wire.

pub mod frame;
pub mod message;
pub mod timing;

pub use frame::{FrameError, FramedReader, MAX_FRAME_SIZE, decode_message, write_message};
pub use message::ControlMessage;
