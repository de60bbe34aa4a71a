// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container-side error types.
//!
//! Every failure the ingress can see is typed here; the ingress maps
//! `NoAvailableChannels` and `ControlChannelDown` to `503` and everything
//! else to `502`.

use portico_http::HttpError;
use portico_protocol::FrameError;
use thiserror::Error;

/// Errors that can occur on the container side.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Every data channel is in use.
    #[error("all proxy channels in use")]
    NoAvailableChannels,

    /// The edge never confirmed an allocation.
    #[error("allocation timed out for request {request_id}")]
    AllocationTimeout { request_id: String },

    /// The edge rejected an allocation.
    #[error("allocation rejected by edge: {message}")]
    AllocationRejected { message: String },

    /// No control connection is established.
    #[error("control channel is not connected")]
    ControlChannelDown,

    /// The allocation was confirmed but no socket arrived on the data port.
    #[error("data channel {port} has no connected socket")]
    ChannelNotConnected { port: u16 },

    /// The response reader hit its deadline.
    #[error("response timed out after {0} ms")]
    ResponseTimeout(u64),

    /// The workload disconnected while its request body was being read.
    /// The data channel is poisoned and must be closed.
    #[error("client aborted mid-request: {0}")]
    ClientAborted(String),

    /// The request target could not be interpreted.
    #[error("invalid request target: {0:?}")]
    InvalidTarget(String),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, ContainerError>;
