// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Portico Edge - edge-side proxy daemon.
//!
//! Runs with the in-memory store backend; production deployments swap in a
//! real object-store client behind the same trait.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use portico_edge::{EdgeConfig, EdgeRuntime};
use portico_store::MemoryStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("portico_edge=info".parse().unwrap()),
        )
        .init();

    info!("Starting Portico Edge");

    let config = EdgeConfig::from_env();
    info!(
        container_host = %config.container_host,
        control_port = config.control_port,
        data_port_base = config.data_port_base,
        data_channels = config.data_channel_count,
        default_bucket = %config.gateway.default_bucket,
        "Configuration loaded"
    );

    let runtime = EdgeRuntime::new(config, Arc::new(MemoryStore::new()));
    runtime.start_supervisor();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    runtime.shutdown().await;

    Ok(())
}
