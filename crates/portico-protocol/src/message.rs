// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control-channel message model.
//!
//! Every message is serialized as a JSON object with a snake_case `type`
//! discriminator. The container side is the allocator: it picks a free data
//! port and asks the edge to connect to it with `AllocateChannel`; the edge
//! confirms with `ChannelAllocated` once its data-side socket is open.

use serde::{Deserialize, Serialize};

/// A message on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Container → edge: open a TCP connection to data port `port` to serve
    /// request `request_id`.
    AllocateChannel { request_id: String, port: u16 },

    /// Edge → container: the data-side socket for `port` is open and the
    /// channel is reserved for `request_id`.
    ChannelAllocated { request_id: String, port: u16 },

    /// Sender considers the channel free again. Informational; neither peer
    /// is required to send it and neither acts on it beyond logging.
    ChannelReleased { port: u16 },

    /// Allocation or handling failed for a specific request.
    Error { request_id: String, message: String },

    /// Container → edge: periodic liveness ping. `timestamp` is epoch millis
    /// at send time; the edge only uses receipt to reset its watchdog.
    Heartbeat { timestamp: i64 },
}

impl ControlMessage {
    /// Build a heartbeat stamped with the current wall-clock time.
    pub fn heartbeat_now() -> Self {
        ControlMessage::Heartbeat {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// The request this message refers to, if it is per-request.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ControlMessage::AllocateChannel { request_id, .. }
            | ControlMessage::ChannelAllocated { request_id, .. }
            | ControlMessage::Error { request_id, .. } => Some(request_id),
            ControlMessage::ChannelReleased { .. } | ControlMessage::Heartbeat { .. } => None,
        }
    }

    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::AllocateChannel { .. } => "allocate_channel",
            ControlMessage::ChannelAllocated { .. } => "channel_allocated",
            ControlMessage::ChannelReleased { .. } => "channel_released",
            ControlMessage::Error { .. } => "error",
            ControlMessage::Heartbeat { .. } => "heartbeat",
        }
    }
}
