// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control-channel acceptor and allocation bookkeeping.
//!
//! The edge connects inward to the control port; the container side serves
//! one control connection at a time. Each connection runs three concerns:
//! a framed read loop dispatching `ChannelAllocated`/`Error` into the
//! pending-allocation table, a writer task draining a bounded outbound
//! queue, and a heartbeat task feeding that queue every interval.
//!
//! Failure semantics: any read or write error is a disconnection of this
//! control connection only. Pending allocations are failed, the connected
//! flag drops, data-port listeners are untouched, and the acceptor goes back
//! to listening for the edge's reconnect.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use portico_protocol::{ControlMessage, FramedReader, decode_message, write_message};

use crate::error::{ContainerError, Result};

/// Depth of the outbound control-message queue.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Reply to a pending allocation: the confirmed port, or the edge's error
/// message.
pub type AllocationReply = std::result::Result<u16, String>;

/// Shared control-channel state: connection flag, outbound queue handle, and
/// the pending-allocation table.
///
/// The pending table is written from two places, the ingress path
/// (registering) and the control read loop (resolving), and is synchronized
/// with a plain mutex; no await happens under the lock.
#[derive(Default)]
pub struct ControlLink {
    connected: AtomicBool,
    outbound: Mutex<Option<mpsc::Sender<ControlMessage>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<AllocationReply>>>,
}

impl ControlLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queue a message for the edge.
    pub async fn send(&self, msg: ControlMessage) -> Result<()> {
        let sender = self
            .outbound
            .lock()
            .expect("control lock poisoned")
            .clone()
            .ok_or(ContainerError::ControlChannelDown)?;
        sender
            .send(msg)
            .await
            .map_err(|_| ContainerError::ControlChannelDown)
    }

    /// Register a resolver for `request_id`. The entry lives until the edge
    /// replies or the caller's allocation timeout removes it.
    pub fn register_pending(&self, request_id: &str, tx: oneshot::Sender<AllocationReply>) {
        self.pending
            .lock()
            .expect("control lock poisoned")
            .insert(request_id.to_string(), tx);
    }

    /// Remove a pending entry (timeout or failed send).
    pub fn remove_pending(&self, request_id: &str) {
        self.pending
            .lock()
            .expect("control lock poisoned")
            .remove(request_id);
    }

    fn resolve_pending(&self, request_id: &str, reply: AllocationReply) {
        let entry = self
            .pending
            .lock()
            .expect("control lock poisoned")
            .remove(request_id);
        match entry {
            Some(tx) => {
                // The receiver may have timed out already; nothing to do then.
                let _ = tx.send(reply);
            }
            None => warn!(request_id, "control reply for unknown allocation"),
        }
    }

    /// Drop every pending resolver. Receivers observe the closed channel and
    /// surface it as the control channel being down.
    fn fail_all_pending(&self, reason: &str) {
        let entries: Vec<_> = self
            .pending
            .lock()
            .expect("control lock poisoned")
            .drain()
            .collect();
        for (request_id, _tx) in entries {
            debug!(request_id = %request_id, "failing pending allocation: {reason}");
        }
    }

    fn attach(&self, sender: mpsc::Sender<ControlMessage>) {
        *self.outbound.lock().expect("control lock poisoned") = Some(sender);
        self.connected.store(true, Ordering::Release);
    }

    fn detach(&self) {
        self.connected.store(false, Ordering::Release);
        *self.outbound.lock().expect("control lock poisoned") = None;
        self.fail_all_pending("control channel disconnected");
    }

    /// Dispatch one decoded control message.
    fn dispatch(&self, msg: ControlMessage) {
        match msg {
            ControlMessage::ChannelAllocated { request_id, port } => {
                self.resolve_pending(&request_id, Ok(port));
            }
            ControlMessage::Error {
                request_id,
                message,
            } => {
                self.resolve_pending(&request_id, Err(message));
            }
            ControlMessage::ChannelReleased { port } => {
                debug!(port, "peer reports channel released");
            }
            other => {
                warn!(kind = other.kind(), "unexpected control message; dropping");
            }
        }
    }
}

/// Accept control connections until cancelled, serving one at a time.
pub async fn run_control_acceptor(
    listener: TcpListener,
    link: std::sync::Arc<ControlLink>,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("control acceptor stopping");
                return;
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "control channel connected");
                    serve_control_connection(stream, &link, heartbeat_interval, &cancel).await;
                    info!(peer = %peer, "control channel closed");
                }
                Err(e) => {
                    warn!(error = %e, "control accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn serve_control_connection(
    stream: TcpStream,
    link: &ControlLink,
    heartbeat_interval: Duration,
    cancel: &CancellationToken,
) {
    stream.set_nodelay(true).ok();
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<ControlMessage>(OUTBOUND_QUEUE_DEPTH);
    link.attach(tx.clone());

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write_message(&mut write_half, &msg).await {
                warn!(error = %e, "control write failed");
                return;
            }
        }
    });

    let heartbeat_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if tx.send(ControlMessage::heartbeat_now()).await.is_err() {
                return;
            }
        }
    });

    let mut reader = FramedReader::new(read_half);
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            frame = reader.next_frame() => match frame {
                Ok(Some(payload)) => match decode_message(&payload) {
                    Ok(msg) => link.dispatch(msg),
                    Err(e) => {
                        // A frame that does not parse must not advance any
                        // state machine; drop it and keep reading.
                        warn!(error = %e, "dropping unparseable control frame");
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "control read failed");
                    break;
                }
            }
        }
    }

    link.detach();
    heartbeat_task.abort();
    writer_task.abort();
}
