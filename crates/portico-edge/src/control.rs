// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One control-channel session on the edge.
//!
//! A session owns one TCP connection to the container's control port and
//! runs until the peer closes, a read/write fails, or the heartbeat
//! watchdog trips. Allocations are handled off the read loop so a slow data
//! connect never delays heartbeat processing.
//!
//! The watchdog force-closes the control channel when heartbeats stop:
//! `now - last_heartbeat_at` above the stale threshold, but only once the
//! connection has been up longer than the warm-up. Data-channel service
//! loops are deliberately not tied to the session: an in-flight exchange may
//! finish while the supervisor reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use portico_protocol::{ControlMessage, FramedReader, decode_message, write_message};

use crate::channels::{ChannelRegistry, connect_data_port, serve_data_channel};
use crate::config::EdgeConfig;
use crate::gateway::ObjectGateway;
use crate::status::ContainerStatus;

/// Depth of the outbound control-message queue.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// How a control session ended; drives the supervisor's reconnect delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer closed cleanly.
    Clean,
    /// Read/write failure or watchdog trip.
    Failed,
}

/// Shared pieces a session needs.
pub struct SessionContext {
    pub config: Arc<EdgeConfig>,
    pub gateway: Arc<ObjectGateway>,
    pub registry: Arc<ChannelRegistry>,
    pub status: watch::Receiver<ContainerStatus>,
}

/// Pure watchdog predicate; times are millis since the session started.
pub fn watchdog_should_trip(
    now_ms: u64,
    last_heartbeat_ms: u64,
    stale_after_ms: u64,
    warmup_ms: u64,
) -> bool {
    now_ms > warmup_ms && now_ms.saturating_sub(last_heartbeat_ms) > stale_after_ms
}

/// Run one control session to completion.
pub async fn run_control_session(
    stream: TcpStream,
    ctx: &SessionContext,
    cancel: &CancellationToken,
) -> SessionEnd {
    stream.set_nodelay(true).ok();
    let (read_half, mut write_half) = stream.into_split();
    let started = Instant::now();
    let last_heartbeat_ms = Arc::new(AtomicU64::new(0));
    let session_cancel = cancel.child_token();

    let (outbound, mut outbound_rx) = mpsc::channel::<ControlMessage>(OUTBOUND_QUEUE_DEPTH);

    let writer_cancel = session_cancel.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = write_message(&mut write_half, &msg).await {
                warn!(error = %e, "control write failed");
                writer_cancel.cancel();
                return;
            }
        }
    });

    let watchdog_task = {
        let last = last_heartbeat_ms.clone();
        let session_cancel = session_cancel.clone();
        let stale_after_ms = ctx.config.watchdog_stale_after_ms;
        let warmup_ms = ctx.config.watchdog_warmup_ms;
        let poll = ctx.config.watchdog_poll_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let now_ms = started.elapsed().as_millis() as u64;
                let last_ms = last.load(Ordering::Acquire);
                if watchdog_should_trip(now_ms, last_ms, stale_after_ms, warmup_ms) {
                    warn!(
                        now_ms,
                        last_heartbeat_ms = last_ms,
                        "heartbeat watchdog tripped; closing control channel"
                    );
                    session_cancel.cancel();
                    return;
                }
            }
        })
    };

    let mut reader = FramedReader::new(read_half);
    let end = loop {
        tokio::select! {
            biased;

            _ = session_cancel.cancelled() => break SessionEnd::Failed,

            frame = reader.next_frame() => match frame {
                Ok(Some(payload)) => match decode_message(&payload) {
                    Ok(ControlMessage::Heartbeat { timestamp }) => {
                        debug!(timestamp, "heartbeat received");
                        last_heartbeat_ms
                            .store(started.elapsed().as_millis() as u64, Ordering::Release);
                    }
                    Ok(ControlMessage::AllocateChannel { request_id, port }) => {
                        spawn_allocation(ctx, outbound.clone(), request_id, port, cancel.clone());
                    }
                    Ok(ControlMessage::ChannelReleased { port }) => {
                        debug!(port, "peer reports channel released");
                    }
                    Ok(other) => {
                        warn!(kind = other.kind(), "unexpected control message; dropping");
                    }
                    Err(e) => {
                        warn!(error = %e, "dropping unparseable control frame");
                    }
                },
                Ok(None) => {
                    info!("control peer closed");
                    break SessionEnd::Clean;
                }
                Err(e) => {
                    warn!(error = %e, "control read failed");
                    break SessionEnd::Failed;
                }
            }
        }
    };

    session_cancel.cancel();
    watchdog_task.abort();
    writer_task.abort();
    end
}

/// Handle one `AllocateChannel` without blocking the read loop.
fn spawn_allocation(
    ctx: &SessionContext,
    outbound: mpsc::Sender<ControlMessage>,
    request_id: String,
    port: u16,
    cancel: CancellationToken,
) {
    let config = ctx.config.clone();
    let gateway = ctx.gateway.clone();
    let registry = ctx.registry.clone();
    let status = ctx.status.clone();

    tokio::spawn(async move {
        if let Err(reserve_err) = registry.try_reserve(port) {
            warn!(port, reason = reserve_err.message(), "allocation refused");
            let _ = outbound
                .send(ControlMessage::Error {
                    request_id,
                    message: reserve_err.message().to_string(),
                })
                .await;
            return;
        }

        match connect_data_port(&config.container_host, port, &config.data_backoff_ms, &status)
            .await
        {
            Ok(stream) => {
                debug!(port, request_id = %request_id, "data channel allocated");
                if outbound
                    .send(ControlMessage::ChannelAllocated { request_id, port })
                    .await
                    .is_err()
                {
                    // Control channel died before the confirmation went out;
                    // the container will time the allocation out.
                    registry.release(port);
                    return;
                }
                serve_data_channel(stream, gateway, registry, port, cancel).await;
            }
            Err(e) => {
                warn!(port, error = %e, "data connect failed");
                registry.release(port);
                let _ = outbound
                    .send(ControlMessage::Error {
                        request_id,
                        message: format!("Failed to open data channel: {e}"),
                    })
                    .await;
            }
        }
    });
}
