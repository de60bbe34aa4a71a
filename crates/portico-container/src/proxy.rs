// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container-proxy runtime: binds all listeners and runs the accept loops.
//!
//! Listener lifetimes equal the process lifetime: data-port listeners stay
//! open across control-channel failures so the edge can always reconnect.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ContainerConfig;
use crate::control::{ControlLink, run_control_acceptor};
use crate::error::Result;
use crate::ingress::{IngressDeps, run_ingress};
use crate::metrics::ProxyMetrics;
use crate::pool::ChannelPool;

/// The running container side. Dropping the handle does not stop the tasks;
/// call [`ContainerProxy::shutdown`].
pub struct ContainerProxy {
    config: ContainerConfig,
    pool: Arc<ChannelPool>,
    control: Arc<ControlLink>,
    metrics: Arc<ProxyMetrics>,
    ingress_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ContainerProxy {
    /// Bind every listener and start the accept loops. Fails if any port is
    /// unavailable; the data ports must be contiguous from
    /// `config.data_port_base`.
    pub async fn start(config: ContainerConfig) -> Result<Self> {
        let ingress_listener =
            TcpListener::bind((config.bind_host.as_str(), config.ingress_port)).await?;
        let ingress_addr = ingress_listener.local_addr()?;

        let control_listener =
            TcpListener::bind((config.bind_host.as_str(), config.control_port)).await?;

        let mut data_listeners = Vec::new();
        for port in config.data_ports() {
            data_listeners.push((
                port,
                TcpListener::bind((config.bind_host.as_str(), port)).await?,
            ));
        }

        let pool = Arc::new(ChannelPool::new(
            config.data_port_base,
            config.data_channel_count,
        ));
        let control = Arc::new(ControlLink::new());
        let metrics = Arc::new(ProxyMetrics::new());
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(run_control_acceptor(
            control_listener,
            control.clone(),
            config.heartbeat_interval(),
            cancel.clone(),
        )));

        for (port, listener) in data_listeners {
            tasks.push(tokio::spawn(run_data_listener(
                port,
                listener,
                pool.clone(),
                cancel.clone(),
            )));
        }

        let deps = Arc::new(IngressDeps {
            config: config.clone(),
            pool: pool.clone(),
            control: control.clone(),
            metrics: metrics.clone(),
        });
        tasks.push(tokio::spawn(run_ingress(
            ingress_listener,
            deps,
            cancel.clone(),
        )));

        info!(
            ingress = %ingress_addr,
            control_port = config.control_port,
            data_port_base = config.data_port_base,
            data_channels = config.data_channel_count,
            "container proxy started"
        );

        Ok(Self {
            config,
            pool,
            control,
            metrics,
            ingress_addr,
            cancel,
            tasks,
        })
    }

    /// The bound ingress address (useful when configured with port 0).
    pub fn ingress_addr(&self) -> SocketAddr {
        self.ingress_addr
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn is_control_connected(&self) -> bool {
        self.control.is_connected()
    }

    pub fn metrics(&self) -> &ProxyMetrics {
        &self.metrics
    }

    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    /// Stop all accept loops and wait for them to finish. In-flight request
    /// handlers end at their next suspension point.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                warn!(error = %e, "proxy task ended abnormally");
            }
        }
        info!("container proxy stopped");
    }
}

/// Accept loop for one data port. Each accepted socket replaces the pool
/// record's socket; the edge closing an idle socket is detected lazily at
/// the next allocation.
async fn run_data_listener(
    port: u16,
    listener: TcpListener,
    pool: Arc<ChannelPool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    stream.set_nodelay(true).ok();
                    debug!(port, peer = %peer, "data channel connected");
                    if !pool.attach_socket(port, stream) {
                        warn!(port, "accepted socket for unknown data port");
                    }
                }
                Err(e) => {
                    warn!(port, error = %e, "data accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        // Port 0 for ingress/control; data ports need a concrete block.
        let base = free_port_block(2);
        let config = ContainerConfig::localhost(0, 0, base).with_data_channel_count(2);
        let proxy = ContainerProxy::start(config).await.unwrap();
        assert_ne!(proxy.ingress_addr().port(), 0);
        assert!(!proxy.is_control_connected());
        proxy.shutdown().await;
    }

    /// Find a block of `n` contiguous free ports by probing.
    fn free_port_block(n: u16) -> u16 {
        for base in (40000..60000).step_by(61) {
            let all_free = (0..n).all(|i| std::net::TcpListener::bind(("127.0.0.1", base + i)).is_ok());
            if all_free {
                return base;
            }
        }
        panic!("no free port block found");
    }
}
