// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local HTTP ingress.
//!
//! In-container workloads call this server as a generic proxy. For each
//! request the handler reserves a data channel, then runs the request writer
//! and the response reader concurrently; for large uploads the edge may
//! begin responding before the full body has been written, or only after it
//! is complete, and the join covers both.
//!
//! `GET /healthcheck` and `GET /health` are answered locally with the
//! control-channel state.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use portico_http::{RequestHead, RequestReader, Response, ResponseReader, write_response};
use portico_protocol::ControlMessage;

use crate::config::ContainerConfig;
use crate::control::ControlLink;
use crate::error::{ContainerError, Result};
use crate::forward;
use crate::metrics::ProxyMetrics;
use crate::pool::ChannelPool;

/// Everything an ingress connection handler needs.
pub struct IngressDeps {
    pub config: ContainerConfig,
    pub pool: Arc<ChannelPool>,
    pub control: Arc<ControlLink>,
    pub metrics: Arc<ProxyMetrics>,
}

/// Accept ingress connections until cancelled.
pub async fn run_ingress(
    listener: TcpListener,
    deps: Arc<IngressDeps>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("ingress stopping");
                return;
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "ingress connection accepted");
                    let deps = deps.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(serve_connection(stream, deps, cancel));
                }
                Err(e) => {
                    warn!(error = %e, "ingress accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, deps: Arc<IngressDeps>, cancel: CancellationToken) {
    stream.set_nodelay(true).ok();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = RequestReader::new(read_half);

    loop {
        let head = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            head = reader.read_head() => head,
        };

        match head {
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "ingress request parse failed");
                let resp = Response::text(400, format!("Bad Request: {e}"));
                let _ = write_response(&mut write_half, &resp).await;
                return;
            }
            Ok(Some(head)) => {
                let (resp, keep_alive) = handle_request(&head, &mut reader, &deps).await;
                if write_response(&mut write_half, &resp).await.is_err() {
                    return;
                }
                if !keep_alive {
                    return;
                }
            }
        }
    }
}

/// Handle one ingress request. The returned flag says whether the inbound
/// connection is still in a known framing state and may serve another
/// request.
async fn handle_request<R>(
    head: &RequestHead,
    reader: &mut RequestReader<R>,
    deps: &IngressDeps,
) -> (Response, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let path = head.target.split('?').next().unwrap_or("");
    if head.method == "GET" && (path == "/healthcheck" || path == "/health") {
        if let Ok(framing) = head.body_framing() {
            let _ = reader.read_body(framing).await;
        }
        let body = if deps.control.is_connected() {
            "CONNECTED"
        } else {
            "DISCONNECTED"
        };
        return (Response::text(200, body), true);
    }

    match proxy_request(head, reader, deps).await {
        Ok((resp, reusable)) => {
            deps.metrics.record_success();
            (resp, reusable)
        }
        Err(
            err @ (ContainerError::NoAvailableChannels | ContainerError::ControlChannelDown),
        ) => {
            deps.metrics.record_service_unavailable();
            debug!(error = %err, "rejecting ingress request: no channel");
            let resp = Response::text(503, "Service Unavailable: All proxy channels in use")
                .with_header("Retry-After", "1");
            // The request body was never consumed; the connection's framing
            // state is unknown.
            (resp, false)
        }
        Err(err) => {
            warn!(error = %err, "proxying failed");
            (Response::text(502, format!("Proxy Error: {err}")), false)
        }
    }
}

/// Proxy one request over a data channel. On success returns the response
/// and whether the ingress connection was fully drained (safe to reuse).
async fn proxy_request<R>(
    head: &RequestHead,
    reader: &mut RequestReader<R>,
    deps: &IngressDeps,
) -> Result<(Response, bool)>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let framing = head.body_framing()?;
    let (port, mut socket) = allocate_channel(deps).await?;
    let head_request = head.method.eq_ignore_ascii_case("HEAD");
    debug!(port, method = %head.method, target = %head.target, "proxying over data channel");

    let (chan_read, chan_write) = socket.split();
    let response_timeout = deps.config.response_timeout();
    let response_timeout_ms = deps.config.response_timeout_ms;

    let write_fut = forward::write_request_to_channel(head, framing, reader, chan_write);
    let read_fut = async move {
        let mut response_reader = ResponseReader::new(chan_read);
        match tokio::time::timeout(response_timeout, response_reader.read_response(head_request))
            .await
        {
            Ok(result) => result.map_err(ContainerError::from),
            Err(_) => Err(ContainerError::ResponseTimeout(response_timeout_ms)),
        }
    };

    // Writer and reader run concurrently; whichever finishes first decides
    // whether the other is still worth waiting for. A workload that vanished
    // mid-body or a dead/timed-out response reader both abort the exchange
    // immediately instead of letting the other side run out its own clock.
    let (write_result, read_result) = {
        let mut write_fut = std::pin::pin!(write_fut);
        let mut read_fut = std::pin::pin!(read_fut);
        tokio::select! {
            write_result = &mut write_fut => match write_result {
                Err(err @ ContainerError::ClientAborted(_)) => (Ok(()), Err(err)),
                other => {
                    let read_result = read_fut.await;
                    (other, read_result)
                }
            },
            read_result = &mut read_fut => match read_result {
                Ok(resp) => {
                    let write_result = write_fut.await;
                    (write_result, Ok(resp))
                }
                Err(err) => (Ok(()), Err(err)),
            },
        }
    };

    match (write_result, read_result) {
        (Ok(()), Ok(resp)) => {
            // Clean exchange: the socket stays open for keep-alive reuse.
            deps.pool.release(port, Some(socket));
            Ok((resp, true))
        }
        (Err(write_err), Ok(resp)) => {
            // The edge responded without consuming the whole body (an early
            // error response, typically). The response is valid, but neither
            // the data socket nor the ingress connection is reusable.
            debug!(port, error = %write_err, "request write failed after response");
            drop(socket);
            deps.pool.release(port, None);
            Ok((resp, false))
        }
        (_, Err(read_err)) => {
            drop(socket);
            deps.pool.release(port, None);
            Err(read_err)
        }
    }
}

/// Reserve a data channel, asking the edge to connect when the channel has
/// no live socket.
async fn allocate_channel(deps: &IngressDeps) -> Result<(u16, TcpStream)> {
    let allocation = deps.pool.try_allocate()?;
    let port = allocation.port;
    if let Some(socket) = allocation.socket {
        return Ok((port, socket));
    }

    if !deps.control.is_connected() {
        deps.pool.clear_in_use(port);
        return Err(ContainerError::ControlChannelDown);
    }

    let request_id = Uuid::new_v4().to_string();
    let (tx, rx) = tokio::sync::oneshot::channel();
    deps.control.register_pending(&request_id, tx);

    if let Err(e) = deps
        .control
        .send(ControlMessage::AllocateChannel {
            request_id: request_id.clone(),
            port,
        })
        .await
    {
        deps.control.remove_pending(&request_id);
        deps.pool.clear_in_use(port);
        return Err(e);
    }

    match tokio::time::timeout(deps.config.allocation_timeout(), rx).await {
        Err(_) => {
            deps.control.remove_pending(&request_id);
            deps.pool.clear_in_use(port);
            Err(ContainerError::AllocationTimeout { request_id })
        }
        Ok(Err(_)) => {
            // Resolver dropped without a reply: the control connection died.
            deps.pool.clear_in_use(port);
            Err(ContainerError::ControlChannelDown)
        }
        Ok(Ok(Err(message))) => {
            deps.pool.clear_in_use(port);
            Err(ContainerError::AllocationRejected { message })
        }
        Ok(Ok(Ok(confirmed_port))) => {
            if confirmed_port != port {
                warn!(port, confirmed_port, "edge confirmed a different port");
            }
            match deps.pool.take_socket(port).await {
                Ok(socket) => Ok((port, socket)),
                Err(e) => {
                    deps.pool.clear_in_use(port);
                    Err(e)
                }
            }
        }
    }
}
