// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Edge-side error types.

use portico_http::HttpError;
use portico_protocol::FrameError;
use thiserror::Error;

use crate::status::ContainerStatus;

/// Errors that can occur on the edge side.
#[derive(Debug, Error)]
pub enum EdgeError {
    /// A connect schedule was exhausted without reaching the peer.
    #[error("connect to {addr} failed after {attempts} attempts")]
    ConnectExhausted { addr: String, attempts: usize },

    /// The container left the `running` state while we were working.
    #[error("container is {status}")]
    ContainerNotRunning { status: ContainerStatus },

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, EdgeError>;
