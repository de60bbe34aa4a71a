// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for portico E2E tests.
//!
//! Brings up both sides of the fabric on loopback: the container proxy with
//! a probed block of contiguous ports, and an edge runtime backed by a
//! shared in-memory store.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

use portico_container::{ContainerConfig, ContainerProxy};
use portico_edge::{EdgeConfig, EdgeRuntime, GatewayConfig};
use portico_http::{Request, Response, ResponseReader, write_request};
use portico_store::{
    CompletedPart, ListRequest, ListResult, MemoryStore, Object, ObjectMeta, ObjectStore,
    PutOptions, Result as StoreResult,
};

/// Both sides of the fabric plus the shared store.
pub struct TestContext {
    pub proxy: ContainerProxy,
    pub runtime: Arc<EdgeRuntime>,
    pub store: Arc<MemoryStore>,
    pub ingress_addr: SocketAddr,
    pub control_port: u16,
    pub data_port_base: u16,
    pub channels: u16,
}

impl TestContext {
    /// Start a fabric with `channels` data channels and default gateway
    /// settings (a `bucketA` named bucket, tiny multipart thresholds).
    pub async fn new(channels: u16) -> Self {
        let store = Arc::new(MemoryStore::with_min_part_size(4));
        Self::with_store(channels, store.clone(), store).await
    }

    /// Start a fabric whose gateway talks to `gateway_store` while tests
    /// inspect `store` directly.
    pub async fn with_store(
        channels: u16,
        store: Arc<MemoryStore>,
        gateway_store: Arc<dyn ObjectStore>,
    ) -> Self {
        let base = free_port_block(channels + 1);
        let control_port = base;
        let data_port_base = base + 1;

        let container_config = ContainerConfig::localhost(0, control_port, data_port_base)
            .with_data_channel_count(channels)
            .with_allocation_timeout_ms(2_000);
        let proxy = ContainerProxy::start(container_config)
            .await
            .expect("container proxy failed to start");
        let ingress_addr = proxy.ingress_addr();

        let edge_config = Self::edge_config(control_port, data_port_base, channels);
        let runtime = EdgeRuntime::new(edge_config, gateway_store);
        runtime.start_supervisor();

        let ctx = Self {
            proxy,
            runtime,
            store,
            ingress_addr,
            control_port,
            data_port_base,
            channels,
        };
        ctx.wait_until_connected().await;
        ctx
    }

    pub fn edge_config(control_port: u16, data_port_base: u16, channels: u16) -> EdgeConfig {
        EdgeConfig::localhost(control_port, data_port_base)
            .with_data_channel_count(channels)
            .with_fast_recovery()
            .with_gateway(GatewayConfig {
                buckets: vec!["bucketA".to_string(), "bucketB".to_string()],
                default_bucket: "game-data".to_string(),
                multipart_threshold: 1024,
                multipart_part_size: 256,
            })
    }

    /// Wait for the control channel to come up.
    pub async fn wait_until_connected(&self) {
        for _ in 0..200 {
            if self.proxy.is_control_connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("control channel never connected");
    }

    /// Wait for the control channel to drop.
    pub async fn wait_until_disconnected(&self) {
        for _ in 0..200 {
            if !self.proxy.is_control_connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("control channel never disconnected");
    }

    /// One request through the ingress on a fresh connection.
    pub async fn request(&self, req: &Request) -> Response {
        send_request(self.ingress_addr, req).await
    }

    /// Retry `req` until `pred` accepts the response.
    pub async fn request_until(
        &self,
        req: &Request,
        pred: impl Fn(&Response) -> bool,
    ) -> Response {
        for _ in 0..100 {
            let resp = self.request(req).await;
            if pred(&resp) {
                return resp;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("response predicate never satisfied");
    }

    pub async fn shutdown(self) {
        self.runtime.shutdown().await;
        self.proxy.shutdown().await;
    }
}

/// Send one request to an ingress address and read the response.
pub async fn send_request(addr: SocketAddr, req: &Request) -> Response {
    let stream = TcpStream::connect(addr).await.expect("ingress connect");
    stream.set_nodelay(true).ok();
    let (read_half, mut write_half) = stream.into_split();
    write_request(&mut write_half, req).await.expect("write request");

    let mut reader = ResponseReader::new(read_half);
    reader
        .read_response(req.method.eq_ignore_ascii_case("HEAD"))
        .await
        .expect("read response")
}

/// Find a block of `n` contiguous free loopback ports by probing.
pub fn free_port_block(n: u16) -> u16 {
    for base in (41000..60000).step_by(97) {
        let all_free =
            (0..n).all(|i| std::net::TcpListener::bind(("127.0.0.1", base + i)).is_ok());
        if all_free {
            return base;
        }
    }
    panic!("no free port block of {n} ports found");
}

/// Store wrapper whose reads block until permits are released; used to pin
/// channels busy for saturation tests.
pub struct GatedStore {
    inner: Arc<MemoryStore>,
    pub gate: Arc<Semaphore>,
}

impl GatedStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for GatedStore {
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Object> {
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        self.inner.get(bucket, key).await
    }

    async fn head(&self, bucket: &str, key: &str) -> StoreResult<ObjectMeta> {
        self.inner.head(bucket, key).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        opts: PutOptions,
    ) -> StoreResult<String> {
        self.inner.put(bucket, key, body, opts).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.inner.delete(bucket, key).await
    }

    async fn list(&self, bucket: &str, req: &ListRequest) -> StoreResult<ListResult> {
        self.inner.list(bucket, req).await
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        opts: PutOptions,
    ) -> StoreResult<String> {
        self.inner.create_multipart_upload(bucket, key, opts).await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u16,
        body: Bytes,
    ) -> StoreResult<String> {
        self.inner
            .upload_part(bucket, key, upload_id, part_number, body)
            .await
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<String> {
        self.inner
            .complete_multipart_upload(bucket, key, upload_id, parts)
            .await
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StoreResult<()> {
        self.inner.abort_multipart_upload(bucket, key, upload_id).await
    }
}
