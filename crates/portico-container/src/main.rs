// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Portico Container - in-container proxy daemon.

use anyhow::Result;
use tracing::{error, info};

use portico_container::{ContainerConfig, ContainerProxy};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("portico_container=info".parse().unwrap()),
        )
        .init();

    info!("Starting Portico Container");

    let config = ContainerConfig::from_env();
    info!(
        ingress_port = config.ingress_port,
        control_port = config.control_port,
        data_port_base = config.data_port_base,
        data_channels = config.data_channel_count,
        "Configuration loaded"
    );

    let proxy = ContainerProxy::start(config).await.map_err(|e| {
        error!(error = %e, "Failed to start container proxy");
        anyhow::anyhow!(e)
    })?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    proxy.shutdown().await;

    Ok(())
}
