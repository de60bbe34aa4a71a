// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Edge-side configuration.

use std::env;
use std::time::Duration;

use portico_protocol::timing;

use crate::gateway::GatewayConfig;

/// Configuration for the edge runtime.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Host the container's listeners are reachable on (default: "127.0.0.1").
    pub container_host: String,
    /// Container control port (default: 7081).
    pub control_port: u16,
    /// First data-channel port (default: 7100).
    pub data_port_base: u16,
    /// Number of data channels (default: 25). Must match the container side.
    pub data_channel_count: u16,
    /// Heartbeat gap that trips the watchdog in milliseconds (default: 20_000).
    pub watchdog_stale_after_ms: u64,
    /// Watchdog grace period after connect in milliseconds (default: 10_000).
    pub watchdog_warmup_ms: u64,
    /// Watchdog poll interval in milliseconds (default: 5_000).
    pub watchdog_poll_interval_ms: u64,
    /// Delays between control connect attempts in milliseconds.
    pub control_backoff_ms: Vec<u64>,
    /// Delays between data-port connect attempts in milliseconds.
    pub data_backoff_ms: Vec<u64>,
    /// Pause before reconnecting after a clean session end (default: 1_000).
    pub reconnect_delay_ms: u64,
    /// Pause before reconnecting after a failed session (default: 5_000).
    pub reconnect_error_delay_ms: u64,
    /// Object-store gateway settings.
    pub gateway: GatewayConfig,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            container_host: "127.0.0.1".to_string(),
            control_port: 7081,
            data_port_base: 7100,
            data_channel_count: 25,
            watchdog_stale_after_ms: timing::WATCHDOG_STALE_AFTER_MS,
            watchdog_warmup_ms: timing::WATCHDOG_WARMUP_MS,
            watchdog_poll_interval_ms: timing::WATCHDOG_POLL_INTERVAL_MS,
            control_backoff_ms: timing::CONTROL_CONNECT_BACKOFF_MS.to_vec(),
            data_backoff_ms: timing::DATA_CONNECT_BACKOFF_MS.to_vec(),
            reconnect_delay_ms: 1_000,
            reconnect_error_delay_ms: 5_000,
            gateway: GatewayConfig::default(),
        }
    }
}

impl EdgeConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Environment variables:
    /// - `PORTICO_CONTAINER_HOST`: Container address (default: "127.0.0.1")
    /// - `PORTICO_CONTROL_PORT`: Control port (default: 7081)
    /// - `PORTICO_DATA_PORT_BASE`: First data port (default: 7100)
    /// - `PORTICO_DATA_CHANNELS`: Data-channel count (default: 25)
    /// - `PORTICO_BUCKETS`: Comma-separated named buckets (default: none)
    /// - `PORTICO_DEFAULT_BUCKET`: Fallback bucket (default: "game-data")
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = env::var("PORTICO_CONTAINER_HOST") {
            config.container_host = host;
        }
        config.control_port = env_parse("PORTICO_CONTROL_PORT", config.control_port);
        config.data_port_base = env_parse("PORTICO_DATA_PORT_BASE", config.data_port_base);
        config.data_channel_count = env_parse("PORTICO_DATA_CHANNELS", config.data_channel_count);

        if let Ok(raw) = env::var("PORTICO_BUCKETS") {
            config.gateway.buckets = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(bucket) = env::var("PORTICO_DEFAULT_BUCKET") {
            config.gateway.default_bucket = bucket;
        }

        config
    }

    /// Configuration for local development and tests.
    pub fn localhost(control_port: u16, data_port_base: u16) -> Self {
        Self {
            control_port,
            data_port_base,
            ..Default::default()
        }
    }

    pub fn with_data_channel_count(mut self, count: u16) -> Self {
        self.data_channel_count = count;
        self
    }

    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = gateway;
        self
    }

    /// Shrink every supervisor/watchdog delay; used by tests.
    pub fn with_fast_recovery(mut self) -> Self {
        self.control_backoff_ms = vec![50, 100, 100, 100, 100];
        self.data_backoff_ms = vec![25, 50, 100];
        self.reconnect_delay_ms = 50;
        self.reconnect_error_delay_ms = 100;
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_error_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_error_delay_ms)
    }

    pub fn watchdog_poll_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_poll_interval_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_track_protocol_timing() {
        let config = EdgeConfig::default();
        assert_eq!(config.watchdog_stale_after_ms, 20_000);
        assert_eq!(config.watchdog_warmup_ms, 10_000);
        assert_eq!(config.control_backoff_ms.len(), 10);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.reconnect_error_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_localhost() {
        let config = EdgeConfig::localhost(9001, 9100).with_data_channel_count(4);
        assert_eq!(config.control_port, 9001);
        assert_eq!(config.data_port_base, 9100);
        assert_eq!(config.data_channel_count, 4);
    }
}
