// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Edge-side data channels: registry, connect, and the service loop.
//!
//! The registry mirrors the container's pool: one `in_use` flag per data
//! port. An allocation reserves the flag, dials the data port, and then the
//! service loop owns the socket until the peer closes it or an exchange
//! fails. One request is in flight per channel at a time; the loop is the
//! keep-alive.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use portico_http::{RequestReader, Response, write_response};

use crate::error::{EdgeError, Result};
use crate::gateway::ObjectGateway;
use crate::status::ContainerStatus;

/// Why a channel could not be reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveError {
    NotFound,
    InUse,
}

impl ReserveError {
    /// The wire message reported back to the container.
    pub fn message(&self) -> &'static str {
        match self {
            ReserveError::NotFound => "Requested channel not found",
            ReserveError::InUse => "Requested channel already in use",
        }
    }
}

/// Per-port `in_use` flags for the fixed set of data channels.
pub struct ChannelRegistry {
    base_port: u16,
    in_use: Vec<AtomicBool>,
}

impl ChannelRegistry {
    pub fn new(base_port: u16, count: u16) -> Self {
        Self {
            base_port,
            in_use: (0..count).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    fn index(&self, port: u16) -> Option<usize> {
        let index = port.checked_sub(self.base_port)? as usize;
        (index < self.in_use.len()).then_some(index)
    }

    /// Reserve `port` for one allocation.
    pub fn try_reserve(&self, port: u16) -> std::result::Result<(), ReserveError> {
        let index = self.index(port).ok_or(ReserveError::NotFound)?;
        if self.in_use[index].swap(true, Ordering::AcqRel) {
            return Err(ReserveError::InUse);
        }
        Ok(())
    }

    pub fn release(&self, port: u16) {
        if let Some(index) = self.index(port) {
            self.in_use[index].store(false, Ordering::Release);
        }
    }

    pub fn is_in_use(&self, port: u16) -> bool {
        self.index(port)
            .map(|i| self.in_use[i].load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

/// Dial a data port with bounded retries, aborting as soon as the container
/// leaves the `running` state.
pub async fn connect_data_port(
    host: &str,
    port: u16,
    backoff_ms: &[u64],
    status: &watch::Receiver<ContainerStatus>,
) -> Result<TcpStream> {
    let addr = format!("{host}:{port}");
    for delay_ms in backoff_ms {
        let status_now = *status.borrow();
        if status_now.is_terminal() {
            return Err(EdgeError::ContainerNotRunning { status: status_now });
        }
        match tokio::time::timeout(Duration::from_secs(2), TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
            Ok(Err(e)) => debug!(addr = %addr, error = %e, "data connect failed"),
            Err(_) => debug!(addr = %addr, "data connect timed out"),
        }
        tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
    }
    Err(EdgeError::ConnectExhausted {
        addr,
        attempts: backoff_ms.len(),
    })
}

/// Serve one data channel until the peer closes, an exchange fails, or the
/// runtime shuts down. Clears the registry flag on exit.
pub async fn serve_data_channel(
    stream: TcpStream,
    gateway: Arc<ObjectGateway>,
    registry: Arc<ChannelRegistry>,
    port: u16,
    cancel: CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = RequestReader::new(read_half);

    loop {
        let request = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            request = reader.read_request() => request,
        };

        match request {
            Ok(None) => break,
            Ok(Some(request)) => {
                debug!(port, method = %request.method, target = %request.target, "serving request");
                let mut response = gateway.handle(&request).await;
                if request.method.eq_ignore_ascii_case("HEAD") && !response.body.is_empty() {
                    // A HEAD response declares the body it is not sending;
                    // putting the bytes on the wire would desync the channel.
                    response
                        .headers
                        .set("Content-Length", response.body.len().to_string());
                    response.body = bytes::Bytes::new();
                }
                if let Err(e) = write_response(&mut write_half, &response).await {
                    warn!(port, error = %e, "response write failed");
                    break;
                }
            }
            Err(e) => {
                warn!(port, error = %e, "request parse failed");
                // Best effort: the writer may still be usable.
                let response = Response::text(502, format!("Proxy Error: {e}"));
                let _ = write_response(&mut write_half, &response).await;
                break;
            }
        }
    }

    registry.release(port);
    debug!(port, "data channel closed");
}
