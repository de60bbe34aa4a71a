// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Edge runtime and control-channel supervisor.
//!
//! One [`EdgeRuntime`] exists per container identity; replacing the
//! container means tearing this runtime down and creating a new one. Within
//! a runtime, at most one supervisor task maintains the control channel:
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected ──▶ Disconnected
//!                   │ backoff        │ session (read loop + watchdog)
//!                   ▼                ▼
//!                 exhausted       clean end: wait 1s / failure: wait 5s
//! ```
//!
//! Connecting only happens while the container reports `running`; a stop
//! request or a terminal container status ends the supervisor permanently.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use portico_store::ObjectStore;

use crate::channels::ChannelRegistry;
use crate::config::EdgeConfig;
use crate::control::{SessionContext, SessionEnd, run_control_session};
use crate::gateway::ObjectGateway;
use crate::status::ContainerStatus;

enum ConnectOutcome {
    Connected(TcpStream),
    Exhausted,
    Stopped,
}

/// The edge side of the fabric for one container.
pub struct EdgeRuntime {
    config: Arc<EdgeConfig>,
    gateway: Arc<ObjectGateway>,
    registry: Arc<ChannelRegistry>,
    status_tx: watch::Sender<ContainerStatus>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl EdgeRuntime {
    pub fn new(config: EdgeConfig, store: Arc<dyn ObjectStore>) -> Arc<Self> {
        let gateway = Arc::new(ObjectGateway::new(store, config.gateway.clone()));
        let registry = Arc::new(ChannelRegistry::new(
            config.data_port_base,
            config.data_channel_count,
        ));
        let (status_tx, _) = watch::channel(ContainerStatus::Running);
        Arc::new(Self {
            config: Arc::new(config),
            gateway,
            registry,
            status_tx,
            cancel: CancellationToken::new(),
            supervisor: Mutex::new(None),
        })
    }

    /// Report a container status transition. `Stopping`/`Stopped` make the
    /// supervisor exit at its next decision point.
    pub fn set_container_status(&self, status: ContainerStatus) {
        info!(status = %status, "container status updated");
        self.status_tx.send_replace(status);
    }

    pub fn container_status(&self) -> ContainerStatus {
        *self.status_tx.borrow()
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Start the supervisor. Idempotent: a second call while it is running
    /// is a no-op on the existing task.
    pub fn start_supervisor(self: &Arc<Self>) {
        let mut guard = self.supervisor.lock().expect("supervisor lock poisoned");
        if let Some(handle) = guard.as_ref()
            && !handle.is_finished()
        {
            debug!("supervisor already running");
            return;
        }
        let runtime = self.clone();
        *guard = Some(tokio::spawn(async move {
            runtime.supervisor_loop().await;
        }));
    }

    /// Request a stop and wait for the supervisor to drain.
    pub async fn shutdown(&self) {
        self.status_tx.send_replace(ContainerStatus::Stopping);
        self.cancel.cancel();
        let handle = self
            .supervisor
            .lock()
            .expect("supervisor lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("edge runtime stopped");
    }

    async fn supervisor_loop(&self) {
        info!(
            host = %self.config.container_host,
            control_port = self.config.control_port,
            "supervisor started"
        );
        let mut status_rx = self.status_tx.subscribe();

        loop {
            if self.cancel.is_cancelled() || status_rx.borrow().is_terminal() {
                break;
            }

            match self.connect_control(&mut status_rx).await {
                ConnectOutcome::Stopped => break,
                ConnectOutcome::Exhausted => {
                    if !self
                        .sleep_cancellable(self.config.reconnect_error_delay())
                        .await
                    {
                        break;
                    }
                }
                ConnectOutcome::Connected(stream) => {
                    info!("control channel established");
                    let ctx = SessionContext {
                        config: self.config.clone(),
                        gateway: self.gateway.clone(),
                        registry: self.registry.clone(),
                        status: status_rx.clone(),
                    };
                    let end = run_control_session(stream, &ctx, &self.cancel).await;
                    let delay = match end {
                        SessionEnd::Clean => self.config.reconnect_delay(),
                        SessionEnd::Failed => self.config.reconnect_error_delay(),
                    };
                    info!(outcome = ?end, "control session ended");
                    if !self.sleep_cancellable(delay).await {
                        break;
                    }
                }
            }
        }

        info!("supervisor stopped");
    }

    /// Dial the control port through the backoff schedule. Aborts early on
    /// stop or a terminal container status.
    async fn connect_control(
        &self,
        status_rx: &mut watch::Receiver<ContainerStatus>,
    ) -> ConnectOutcome {
        let addr = format!(
            "{}:{}",
            self.config.container_host, self.config.control_port
        );
        for (attempt, delay_ms) in self.config.control_backoff_ms.iter().enumerate() {
            if self.cancel.is_cancelled() || status_rx.borrow().is_terminal() {
                return ConnectOutcome::Stopped;
            }
            match tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => return ConnectOutcome::Connected(stream),
                Ok(Err(e)) => debug!(attempt, addr = %addr, error = %e, "control connect failed"),
                Err(_) => debug!(attempt, addr = %addr, "control connect timed out"),
            }
            if !self
                .sleep_cancellable(Duration::from_millis(*delay_ms))
                .await
            {
                return ConnectOutcome::Stopped;
            }
        }
        warn!(
            addr = %addr,
            attempts = self.config.control_backoff_ms.len(),
            "control connect schedule exhausted"
        );
        ConnectOutcome::Exhausted
    }

    /// Sleep unless shutdown interrupts; returns false on shutdown.
    async fn sleep_cancellable(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
