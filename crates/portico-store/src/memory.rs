// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory object-store backend.
//!
//! Buckets are created implicitly on first write. Keys are held in a
//! `BTreeMap` so listings come out in key order without sorting. ETags are
//! derived from content (SHA-256), which makes a multipart assembly and a
//! single-shot write of the same bytes indistinguishable once stored.

use std::collections::{BTreeMap, HashMap};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    CompletedPart, ListEntry, ListRequest, ListResult, MAX_PART_NUMBER, Object, ObjectMeta,
    ObjectStore, PutOptions, Result, StoreError,
};

/// Default minimum size for non-final multipart parts (5 MiB).
pub const DEFAULT_MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default page size when a list request does not bound itself.
const DEFAULT_MAX_KEYS: usize = 1_000;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    etag: String,
    content_type: String,
    last_modified: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

#[derive(Debug)]
struct UploadState {
    bucket: String,
    key: String,
    opts: PutOptions,
    parts: BTreeMap<u16, (Bytes, String)>,
}

#[derive(Default)]
struct Inner {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    uploads: HashMap<String, UploadState>,
}

/// In-memory [`ObjectStore`] backend.
pub struct MemoryStore {
    min_part_size: usize,
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_min_part_size(DEFAULT_MIN_PART_SIZE)
    }

    /// Tests shrink the minimum part size so multipart paths can be driven
    /// with small payloads.
    pub fn with_min_part_size(min_part_size: usize) -> Self {
        Self {
            min_part_size,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Number of in-flight multipart uploads; used to assert that failed
    /// uploads were aborted rather than orphaned.
    pub async fn pending_upload_count(&self) -> usize {
        self.inner.read().await.uploads.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Quoted lowercase-hex SHA-256 of the content.
fn compute_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("\"{}\"", hex)
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Object> {
        let inner = self.inner.read().await;
        let stored = inner
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .ok_or_else(|| StoreError::NoSuchKey {
                key: key.to_string(),
            })?;
        Ok(Object {
            meta: ObjectMeta {
                key: key.to_string(),
                size: stored.body.len() as u64,
                etag: stored.etag.clone(),
                content_type: stored.content_type.clone(),
                last_modified: stored.last_modified,
                metadata: stored.metadata.clone(),
            },
            body: stored.body.clone(),
        })
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        self.get(bucket, key).await.map(|obj| obj.meta)
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes, opts: PutOptions) -> Result<String> {
        let etag = compute_etag(&body);
        let stored = StoredObject {
            body,
            etag: etag.clone(),
            content_type: opts
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            last_modified: Utc::now(),
            metadata: opts.metadata,
        };
        let mut inner = self.inner.write().await;
        inner
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), stored);
        Ok(etag)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(objects) = inner.buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn list(&self, bucket: &str, req: &ListRequest) -> Result<ListResult> {
        let start_after = match &req.continuation_token {
            None => None,
            Some(token) => {
                let raw = URL_SAFE_NO_PAD.decode(token).map_err(|_| {
                    StoreError::InvalidArgument {
                        message: "invalid continuation token".to_string(),
                    }
                })?;
                Some(
                    String::from_utf8(raw).map_err(|_| StoreError::InvalidArgument {
                        message: "invalid continuation token".to_string(),
                    })?,
                )
            }
        };
        let prefix = req.prefix.as_deref().unwrap_or("");
        let max_keys = if req.max_keys == 0 {
            DEFAULT_MAX_KEYS
        } else {
            req.max_keys
        };

        let inner = self.inner.read().await;
        let mut result = ListResult::default();
        let Some(objects) = inner.buckets.get(bucket) else {
            return Ok(result);
        };

        let mut emitted = 0usize;
        let mut last_key: Option<&str> = None;
        for (key, stored) in objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(after) = &start_after
                && key.as_str() <= after.as_str()
            {
                continue;
            }
            if emitted == max_keys {
                result.is_truncated = true;
                result.next_continuation_token =
                    last_key.map(|k| URL_SAFE_NO_PAD.encode(k.as_bytes()));
                break;
            }

            // Delimiter roll-up: keys sharing a segment collapse into one
            // common prefix; sorted order makes consecutive duplicates the
            // only duplicates.
            if let Some(delimiter) = req.delimiter.as_deref()
                && !delimiter.is_empty()
                && let Some(idx) = key[prefix.len()..].find(delimiter)
            {
                let common = &key[..prefix.len() + idx + delimiter.len()];
                if result.common_prefixes.last().map(String::as_str) != Some(common) {
                    result.common_prefixes.push(common.to_string());
                    emitted += 1;
                }
                last_key = Some(key);
                continue;
            }

            result.objects.push(ListEntry {
                key: key.clone(),
                size: stored.body.len() as u64,
                etag: stored.etag.clone(),
                last_modified: stored.last_modified,
            });
            emitted += 1;
            last_key = Some(key);
        }

        Ok(result)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        opts: PutOptions,
    ) -> Result<String> {
        let upload_id = Uuid::new_v4().simple().to_string();
        let mut inner = self.inner.write().await;
        inner.uploads.insert(
            upload_id.clone(),
            UploadState {
                bucket: bucket.to_string(),
                key: key.to_string(),
                opts,
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u16,
        body: Bytes,
    ) -> Result<String> {
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(StoreError::InvalidPart {
                part_number: part_number as i64,
            });
        }
        let etag = compute_etag(&body);
        let mut inner = self.inner.write().await;
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload {
                upload_id: upload_id.to_string(),
            })?;
        upload.parts.insert(part_number, (body, etag.clone()));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String> {
        let mut inner = self.inner.write().await;
        let upload = inner
            .uploads
            .get(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload {
                upload_id: upload_id.to_string(),
            })?;

        if parts.is_empty() {
            return Err(StoreError::InvalidArgument {
                message: "part list is empty".to_string(),
            });
        }

        let mut body = Vec::new();
        let mut previous = 0u16;
        for (idx, part) in parts.iter().enumerate() {
            if part.part_number <= previous {
                return Err(StoreError::InvalidArgument {
                    message: "parts must be listed in ascending order".to_string(),
                });
            }
            previous = part.part_number;

            let (data, etag) = upload.parts.get(&part.part_number).ok_or({
                StoreError::InvalidPart {
                    part_number: part.part_number as i64,
                }
            })?;
            if etag.trim_matches('"') != part.etag.trim_matches('"') {
                return Err(StoreError::InvalidPart {
                    part_number: part.part_number as i64,
                });
            }
            let is_last = idx == parts.len() - 1;
            if !is_last && data.len() < self.min_part_size {
                return Err(StoreError::EntityTooSmall {
                    part_number: part.part_number,
                    size: data.len(),
                    min: self.min_part_size,
                });
            }
            body.extend_from_slice(data);
        }

        let upload = inner.uploads.remove(upload_id).expect("upload exists");
        let body = Bytes::from(body);
        let etag = compute_etag(&body);
        let stored = StoredObject {
            body,
            etag: etag.clone(),
            content_type: upload
                .opts
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            last_modified: Utc::now(),
            metadata: upload.opts.metadata,
        };
        inner
            .buckets
            .entry(upload.bucket)
            .or_default()
            .insert(upload.key, stored);
        Ok(etag)
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.uploads.get(upload_id) {
            Some(u) if u.bucket == bucket && u.key == key => {
                inner.uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(StoreError::NoSuchUpload {
                upload_id: upload_id.to_string(),
            }),
        }
    }
}
