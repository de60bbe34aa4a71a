// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container-side configuration.

use std::env;
use std::time::Duration;

use portico_protocol::timing;

/// Configuration for the container-side proxy.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Address to bind listeners on (default: "0.0.0.0").
    pub bind_host: String,
    /// Local HTTP ingress port (default: 7080).
    pub ingress_port: u16,
    /// Control-channel port the edge connects to (default: 7081).
    pub control_port: u16,
    /// First data-channel port; ports are contiguous from here (default: 7100).
    pub data_port_base: u16,
    /// Number of data channels, fixed at process start (default: 25).
    pub data_channel_count: u16,
    /// Heartbeat send interval in milliseconds (default: 10_000).
    pub heartbeat_interval_ms: u64,
    /// How long to wait for `ChannelAllocated` in milliseconds (default: 10_000).
    pub allocation_timeout_ms: u64,
    /// Per-response deadline in milliseconds (default: 600_000).
    pub response_timeout_ms: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            ingress_port: 7080,
            control_port: 7081,
            data_port_base: 7100,
            data_channel_count: 25,
            heartbeat_interval_ms: timing::HEARTBEAT_INTERVAL_MS,
            allocation_timeout_ms: timing::ALLOCATION_TIMEOUT_MS,
            response_timeout_ms: timing::RESPONSE_TIMEOUT_MS,
        }
    }
}

impl ContainerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Environment variables:
    /// - `PORTICO_BIND_HOST`: Bind address (default: "0.0.0.0")
    /// - `PORTICO_INGRESS_PORT`: Ingress HTTP port (default: 7080)
    /// - `PORTICO_CONTROL_PORT`: Control-channel port (default: 7081)
    /// - `PORTICO_DATA_PORT_BASE`: First data port (default: 7100)
    /// - `PORTICO_DATA_CHANNELS`: Data-channel count (default: 25)
    /// - `PORTICO_HEARTBEAT_INTERVAL_MS`: Heartbeat interval (default: 10000)
    /// - `PORTICO_ALLOCATION_TIMEOUT_MS`: Allocation timeout (default: 10000)
    /// - `PORTICO_RESPONSE_TIMEOUT_MS`: Response deadline (default: 600000)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            bind_host: env::var("PORTICO_BIND_HOST").unwrap_or(default.bind_host),
            ingress_port: env_parse("PORTICO_INGRESS_PORT", default.ingress_port),
            control_port: env_parse("PORTICO_CONTROL_PORT", default.control_port),
            data_port_base: env_parse("PORTICO_DATA_PORT_BASE", default.data_port_base),
            data_channel_count: env_parse("PORTICO_DATA_CHANNELS", default.data_channel_count),
            heartbeat_interval_ms: env_parse(
                "PORTICO_HEARTBEAT_INTERVAL_MS",
                default.heartbeat_interval_ms,
            ),
            allocation_timeout_ms: env_parse(
                "PORTICO_ALLOCATION_TIMEOUT_MS",
                default.allocation_timeout_ms,
            ),
            response_timeout_ms: env_parse(
                "PORTICO_RESPONSE_TIMEOUT_MS",
                default.response_timeout_ms,
            ),
        }
    }

    /// Configuration for local development and tests: loopback only, with
    /// the given port block.
    pub fn localhost(ingress_port: u16, control_port: u16, data_port_base: u16) -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            ingress_port,
            control_port,
            data_port_base,
            ..Default::default()
        }
    }

    pub fn with_data_channel_count(mut self, count: u16) -> Self {
        self.data_channel_count = count;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    pub fn with_allocation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.allocation_timeout_ms = timeout_ms;
        self
    }

    pub fn with_response_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.response_timeout_ms = timeout_ms;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn allocation_timeout(&self) -> Duration {
        Duration::from_millis(self.allocation_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// The data ports, in order.
    pub fn data_ports(&self) -> impl Iterator<Item = u16> {
        let base = self.data_port_base;
        (0..self.data_channel_count).map(move |i| base + i)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
