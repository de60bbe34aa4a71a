// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Portico Store - object-store interface for the edge gateway.
//!
//! The edge side translates proxied HTTP requests into the operations below.
//! The production backend lives outside this repository; [`MemoryStore`] is
//! the in-process backend used by tests and local development. Both sit
//! behind the [`ObjectStore`] trait so the gateway never knows which one it
//! is talking to.

pub mod memory;

pub use memory::MemoryStore;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from object-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such key: {key}")]
    NoSuchKey { key: String },

    #[error("no such upload: {upload_id}")]
    NoSuchUpload { upload_id: String },

    #[error("invalid part number: {part_number}")]
    InvalidPart { part_number: i64 },

    #[error("part {part_number} is {size} bytes, below the minimum of {min} bytes")]
    EntityTooSmall {
        part_number: u16,
        size: usize,
        min: usize,
    },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Metadata describing a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    /// Quoted entity tag, e.g. `"9b2cf53..."`.
    pub etag: String,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    /// User metadata (the `x-amz-meta-*` headers, prefix stripped).
    pub metadata: HashMap<String, String>,
}

/// A stored object with its content.
#[derive(Debug, Clone)]
pub struct Object {
    pub meta: ObjectMeta,
    pub body: Bytes,
}

/// Options supplied when writing an object or initiating an upload.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Parameters for a list operation.
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: usize,
    pub continuation_token: Option<String>,
}

/// One key in a list result.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

/// Result of a list operation.
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub objects: Vec<ListEntry>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// A part reference in a multipart completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u16,
    pub etag: String,
}

/// Maximum part number accepted by multipart uploads.
pub const MAX_PART_NUMBER: u16 = 10_000;

/// The operation surface the edge gateway depends on.
///
/// All operations are bucket-scoped; buckets are created implicitly on first
/// write. `delete` is idempotent: deleting an absent key succeeds.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Object>;

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectMeta>;

    /// Write an object, returning its etag.
    async fn put(&self, bucket: &str, key: &str, body: Bytes, opts: PutOptions) -> Result<String>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    async fn list(&self, bucket: &str, req: &ListRequest) -> Result<ListResult>;

    /// Initiate a multipart upload, returning the upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        opts: PutOptions,
    ) -> Result<String>;

    /// Upload one part, returning its etag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u16,
        body: Bytes,
    ) -> Result<String>;

    /// Assemble the named parts into the final object, returning its etag.
    /// On failure the upload survives so the caller can abort it.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str)
    -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::NoSuchKey {
            key: "a/b".to_string(),
        };
        assert_eq!(format!("{}", err), "no such key: a/b");

        let err = StoreError::EntityTooSmall {
            part_number: 2,
            size: 100,
            min: 5 * 1024 * 1024,
        };
        assert!(format!("{}", err).contains("part 2"));
    }
}
