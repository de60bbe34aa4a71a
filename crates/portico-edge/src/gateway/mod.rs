// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object-store HTTP gateway.
//!
//! Translates one proxied HTTP request into object-store operations and
//! synthesizes the response. The surface is S3-shaped: bucket listing,
//! object GET/HEAD/PUT/DELETE with conditional headers, and the multipart
//! upload lifecycle. Oversized PUTs are split into a transparent multipart
//! upload; a failed transparent upload is aborted so no parts are orphaned.
//!
//! Every error leaves as an S3-style XML document; the gateway never returns
//! an `Err` to the service loop.

pub mod xml;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use portico_http::{Headers, Request, Response};
use portico_store::{
    CompletedPart, ListRequest, MAX_PART_NUMBER, ObjectMeta, ObjectStore, PutOptions, StoreError,
};

/// Single-shot PUT limit; larger bodies go through multipart (50 MiB).
pub const MULTIPART_THRESHOLD: usize = 50 * 1024 * 1024;

/// Part size used by transparent multipart uploads (10 MiB).
pub const MULTIPART_PART_SIZE: usize = 10 * 1024 * 1024;

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Named buckets routable by leading path segment.
    pub buckets: Vec<String>,
    /// Bucket used when the path does not start with a named bucket.
    pub default_bucket: String,
    /// Single-shot PUT limit in bytes.
    pub multipart_threshold: usize,
    /// Transparent multipart part size in bytes.
    pub multipart_part_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
            default_bucket: "game-data".to_string(),
            multipart_threshold: MULTIPART_THRESHOLD,
            multipart_part_size: MULTIPART_PART_SIZE,
        }
    }
}

/// The request-to-store adapter run by every data-channel service loop.
pub struct ObjectGateway {
    store: Arc<dyn ObjectStore>,
    config: GatewayConfig,
    host_id: String,
}

impl ObjectGateway {
    pub fn new(store: Arc<dyn ObjectStore>, config: GatewayConfig) -> Self {
        Self {
            store,
            config,
            host_id: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Handle one proxied request.
    pub async fn handle(&self, req: &Request) -> Response {
        // The backend is HTTPS-only; the scheme is forced regardless of what
        // the workload asked for.
        let host = req.headers.get("host").unwrap_or("localhost");
        let url = match Url::parse(&format!("https://{}{}", host, req.target)) {
            Ok(url) => url,
            Err(e) => {
                return self.error_response(
                    400,
                    "InvalidURI",
                    &format!("could not interpret request target: {e}"),
                );
            }
        };

        let (bucket, key) = self.route(url.path());
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        debug!(method = %req.method, bucket = %bucket, key = %key, "gateway dispatch");

        match req.method.as_str() {
            "GET" if key.is_empty() => self.list_bucket(&bucket, &query).await,
            "GET" => self.read_object(&bucket, &key, &req.headers, false).await,
            "HEAD" => self.read_object(&bucket, &key, &req.headers, true).await,
            "PUT" if query.contains_key("uploadId") || query.contains_key("partNumber") => {
                self.upload_part(&bucket, &key, &query, req.body.clone()).await
            }
            "PUT" => self.put_object(&bucket, &key, req).await,
            "POST" if query.contains_key("uploads") => {
                self.initiate_multipart(&bucket, &key, req).await
            }
            "POST" if query.contains_key("uploadId") => {
                self.complete_multipart(&bucket, &key, &query, &url, &req.body).await
            }
            "DELETE" if query.contains_key("uploadId") => {
                self.abort_multipart(&bucket, &key, &query).await
            }
            "DELETE" => self.delete_object(&bucket, &key).await,
            other => self.error_response(
                405,
                "MethodNotAllowed",
                &format!("The specified method is not allowed: {other}"),
            ),
        }
    }

    /// Split a request path into (bucket, key). A leading segment naming a
    /// known bucket routes there; anything else lands in the default bucket
    /// with the full path as key.
    fn route(&self, path: &str) -> (String, String) {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (first, rest) = match trimmed.split_once('/') {
            Some((first, rest)) => (first, rest),
            None => (trimmed, ""),
        };
        if self.config.buckets.iter().any(|b| b == first) {
            (first.to_string(), rest.to_string())
        } else {
            (self.config.default_bucket.clone(), trimmed.to_string())
        }
    }

    async fn list_bucket(&self, bucket: &str, query: &HashMap<String, String>) -> Response {
        let max_keys = match query.get("max-keys") {
            None => 0,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) => n,
                Err(_) => {
                    return self.error_response(
                        400,
                        "InvalidArgument",
                        &format!("max-keys must be an integer: {raw:?}"),
                    );
                }
            },
        };
        let request = ListRequest {
            prefix: query.get("prefix").cloned(),
            delimiter: query.get("delimiter").cloned(),
            max_keys,
            continuation_token: query.get("continuation-token").cloned(),
        };

        match self.store.list(bucket, &request).await {
            Ok(result) => {
                let effective_max = if max_keys == 0 { 1_000 } else { max_keys };
                let doc = xml::list_bucket_result(
                    bucket,
                    request.prefix.as_deref(),
                    request.delimiter.as_deref(),
                    effective_max,
                    &result,
                );
                xml_response(200, doc)
            }
            Err(e) => self.store_error_response(e),
        }
    }

    async fn read_object(
        &self,
        bucket: &str,
        key: &str,
        headers: &Headers,
        head_only: bool,
    ) -> Response {
        let (meta, body) = if head_only {
            match self.store.head(bucket, key).await {
                Ok(meta) => (meta, Bytes::new()),
                Err(e) => return self.store_error_response(e),
            }
        } else {
            match self.store.get(bucket, key).await {
                Ok(obj) => (obj.meta, obj.body),
                Err(e) => return self.store_error_response(e),
            }
        };

        if let Some(if_match) = headers.get("if-match")
            && !etag_matches(if_match, &meta.etag)
        {
            return self.error_response(
                412,
                "PreconditionFailed",
                "At least one of the pre-conditions you specified did not hold.",
            );
        }
        if let Some(if_none_match) = headers.get("if-none-match")
            && etag_matches(if_none_match, &meta.etag)
        {
            return Response::new(304).with_header("ETag", meta.etag.clone());
        }

        let mut resp = Response::new(200);
        apply_object_headers(&mut resp, &meta);
        if !head_only {
            resp.body = body;
        }
        resp
    }

    async fn put_object(&self, bucket: &str, key: &str, req: &Request) -> Response {
        let opts = put_options_from(&req.headers);
        if req.body.len() > self.config.multipart_threshold {
            return self.put_object_multipart(bucket, key, req.body.clone(), opts).await;
        }
        match self.store.put(bucket, key, req.body.clone(), opts).await {
            Ok(etag) => Response::new(204).with_header("ETag", etag),
            Err(e) => self.store_error_response(e),
        }
    }

    /// Transparent multipart for oversized PUTs. Any failure aborts the
    /// upload before the error is surfaced.
    async fn put_object_multipart(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        opts: PutOptions,
    ) -> Response {
        let upload_id = match self.store.create_multipart_upload(bucket, key, opts).await {
            Ok(id) => id,
            Err(e) => return self.store_error_response(e),
        };
        debug!(bucket, key, upload_id = %upload_id, size = body.len(), "transparent multipart");

        let part_size = self.config.multipart_part_size;
        let mut parts = Vec::new();
        let mut offset = 0usize;
        while offset < body.len() {
            let end = (offset + part_size).min(body.len());
            let part_number = (parts.len() + 1) as u16;
            if part_number > MAX_PART_NUMBER {
                self.abort_quietly(bucket, key, &upload_id).await;
                return self.error_response(
                    400,
                    "InvalidArgument",
                    "object too large for the configured part size",
                );
            }
            match self
                .store
                .upload_part(bucket, key, &upload_id, part_number, body.slice(offset..end))
                .await
            {
                Ok(etag) => parts.push(CompletedPart { part_number, etag }),
                Err(e) => {
                    self.abort_quietly(bucket, key, &upload_id).await;
                    return self.store_error_response(e);
                }
            }
            offset = end;
        }

        match self
            .store
            .complete_multipart_upload(bucket, key, &upload_id, &parts)
            .await
        {
            Ok(etag) => Response::new(204).with_header("ETag", etag),
            Err(e) => {
                self.abort_quietly(bucket, key, &upload_id).await;
                self.store_error_response(e)
            }
        }
    }

    async fn abort_quietly(&self, bucket: &str, key: &str, upload_id: &str) {
        if let Err(e) = self.store.abort_multipart_upload(bucket, key, upload_id).await {
            warn!(upload_id, error = %e, "failed to abort multipart upload");
        }
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        query: &HashMap<String, String>,
        body: Bytes,
    ) -> Response {
        let Some(upload_id) = query.get("uploadId") else {
            return self.error_response(400, "InvalidArgument", "uploadId is required");
        };
        let part_number = query
            .get("partNumber")
            .and_then(|raw| raw.parse::<u16>().ok())
            .filter(|n| (1..=MAX_PART_NUMBER).contains(n));
        let Some(part_number) = part_number else {
            return self.error_response(
                400,
                "InvalidArgument",
                "Part number must be an integer between 1 and 10000",
            );
        };

        match self
            .store
            .upload_part(bucket, key, upload_id, part_number, body)
            .await
        {
            Ok(etag) => Response::new(200)
                .with_header("ETag", etag)
                .with_header("Content-Length", "0"),
            Err(e) => self.store_error_response(e),
        }
    }

    async fn initiate_multipart(&self, bucket: &str, key: &str, req: &Request) -> Response {
        let opts = put_options_from(&req.headers);
        match self.store.create_multipart_upload(bucket, key, opts).await {
            Ok(upload_id) => {
                xml_response(200, xml::initiate_multipart_result(bucket, key, &upload_id))
            }
            Err(e) => self.store_error_response(e),
        }
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        query: &HashMap<String, String>,
        url: &Url,
        body: &Bytes,
    ) -> Response {
        let Some(upload_id) = query.get("uploadId") else {
            return self.error_response(400, "InvalidArgument", "uploadId is required");
        };
        let parts = match std::str::from_utf8(body)
            .map_err(|_| xml::MalformedXml)
            .and_then(|text| xml::parse_complete_multipart(text))
        {
            Ok(parts) => parts,
            Err(_) => {
                return self.error_response(
                    400,
                    "MalformedXML",
                    "The XML you provided was not well-formed or did not validate against our published schema.",
                );
            }
        };

        match self
            .store
            .complete_multipart_upload(bucket, key, upload_id, &parts)
            .await
        {
            Ok(etag) => {
                let location = format!(
                    "https://{}{}",
                    url.host_str().unwrap_or("localhost"),
                    url.path()
                );
                xml_response(
                    200,
                    xml::complete_multipart_result(&location, bucket, key, &etag),
                )
            }
            Err(e) => self.store_error_response(e),
        }
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        query: &HashMap<String, String>,
    ) -> Response {
        let Some(upload_id) = query.get("uploadId") else {
            return self.error_response(400, "InvalidArgument", "uploadId is required");
        };
        match self.store.abort_multipart_upload(bucket, key, upload_id).await {
            Ok(()) => Response::new(204),
            Err(e) => self.store_error_response(e),
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Response {
        match self.store.delete(bucket, key).await {
            Ok(()) => Response::new(204),
            Err(e) => self.store_error_response(e),
        }
    }

    fn error_response(&self, status: u16, code: &str, message: &str) -> Response {
        let request_id = Uuid::new_v4().simple().to_string();
        let doc = xml::error_document(code, message, &request_id, &self.host_id);
        xml_response(status, doc)
    }

    fn store_error_response(&self, err: StoreError) -> Response {
        match err {
            StoreError::NoSuchKey { .. } => {
                self.error_response(404, "NoSuchKey", "The specified key does not exist.")
            }
            StoreError::NoSuchUpload { .. } => self.error_response(
                404,
                "NoSuchUpload",
                "The specified multipart upload does not exist.",
            ),
            StoreError::InvalidPart { part_number } => self.error_response(
                400,
                "InvalidPart",
                &format!("One or more of the specified parts could not be found: {part_number}"),
            ),
            StoreError::EntityTooSmall { .. } => self.error_response(
                400,
                "EntityTooSmall",
                "Your proposed upload is smaller than the minimum allowed size.",
            ),
            StoreError::InvalidArgument { message } => {
                self.error_response(400, "InvalidArgument", &message)
            }
            StoreError::Backend(message) => {
                self.error_response(500, "InternalError", &message)
            }
        }
    }
}

fn xml_response(status: u16, doc: String) -> Response {
    let body = Bytes::from(doc);
    let mut resp = Response::new(status);
    resp.headers.set("Content-Type", "application/xml");
    resp.headers.set("Content-Length", body.len().to_string());
    resp.body = body;
    resp
}

fn apply_object_headers(resp: &mut Response, meta: &ObjectMeta) {
    resp.headers.set("Content-Type", meta.content_type.clone());
    resp.headers.set("Content-Length", meta.size.to_string());
    resp.headers.set("ETag", meta.etag.clone());
    resp.headers.set(
        "Last-Modified",
        meta.last_modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
    );
    resp.headers.set("Accept-Ranges", "bytes");
    for (name, value) in &meta.metadata {
        resp.headers.set(format!("x-amz-meta-{name}"), value.clone());
    }
}

fn put_options_from(headers: &Headers) -> PutOptions {
    let mut metadata = HashMap::new();
    for (name, value) in headers.iter() {
        let lower = name.to_ascii_lowercase();
        if let Some(suffix) = lower.strip_prefix("x-amz-meta-")
            && !suffix.is_empty()
        {
            metadata.insert(suffix.to_string(), value.to_string());
        }
    }
    PutOptions {
        content_type: headers.get("content-type").map(str::to_string),
        metadata,
    }
}

/// Conditional-header match: `*` matches anything; otherwise any entry in
/// the comma-separated list must equal the etag, quotes and weak validators
/// ignored.
fn etag_matches(header_value: &str, etag: &str) -> bool {
    let normalized = etag.trim().trim_matches('"');
    header_value.split(',').any(|candidate| {
        let candidate = candidate.trim();
        if candidate == "*" {
            return true;
        }
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        candidate.trim_matches('"') == normalized
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_store::MemoryStore;

    fn gateway() -> ObjectGateway {
        gateway_with(GatewayConfig {
            buckets: vec!["bucketA".to_string(), "bucketB".to_string()],
            default_bucket: "game-data".to_string(),
            ..Default::default()
        })
    }

    fn gateway_with(config: GatewayConfig) -> ObjectGateway {
        ObjectGateway::new(Arc::new(MemoryStore::with_min_part_size(4)), config)
    }

    fn request(method: &str, target: &str) -> Request {
        Request::new(method, target).with_header("Host", "store.internal")
    }

    #[test]
    fn test_route_known_and_default_bucket() {
        let gw = gateway();
        assert_eq!(
            gw.route("/bucketA/saves/slot1"),
            ("bucketA".to_string(), "saves/slot1".to_string())
        );
        assert_eq!(
            gw.route("/unknown/path"),
            ("game-data".to_string(), "unknown/path".to_string())
        );
        assert_eq!(gw.route("/"), ("game-data".to_string(), "".to_string()));
        assert_eq!(gw.route("/bucketA"), ("bucketA".to_string(), "".to_string()));
    }

    #[test]
    fn test_etag_matches() {
        assert!(etag_matches("*", "\"abc\""));
        assert!(etag_matches("\"abc\"", "\"abc\""));
        assert!(etag_matches("\"x\", \"abc\"", "\"abc\""));
        assert!(etag_matches("W/\"abc\"", "\"abc\""));
        assert!(!etag_matches("\"other\"", "\"abc\""));
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let gw = gateway();
        let put = request("PUT", "/bucketA/hello.txt")
            .with_header("Content-Type", "text/plain")
            .with_header("Content-Length", "3")
            .with_body("hi\n");
        let resp = gw.handle(&put).await;
        assert_eq!(resp.status, 204);
        let etag = resp.headers.get("etag").unwrap().to_string();

        let get = request("GET", "/bucketA/hello.txt");
        let resp = gw.handle(&get).await;
        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], b"hi\n");
        assert_eq!(resp.headers.get("etag"), Some(etag.as_str()));
        assert_eq!(resp.headers.get("content-type"), Some("text/plain"));
        assert_eq!(resp.headers.get("content-length"), Some("3"));
        assert_eq!(resp.headers.get("accept-ranges"), Some("bytes"));
        assert!(resp.headers.get("last-modified").unwrap().ends_with("GMT"));
    }

    #[tokio::test]
    async fn test_head_returns_headers_without_body() {
        let gw = gateway();
        let put = request("PUT", "/bucketA/k").with_body("payload");
        gw.handle(&put).await;

        let resp = gw.handle(&request("HEAD", "/bucketA/k")).await;
        assert_eq!(resp.status, 200);
        assert!(resp.body.is_empty());
        assert_eq!(resp.headers.get("content-length"), Some("7"));
    }

    #[tokio::test]
    async fn test_get_missing_key_is_no_such_key_xml() {
        let gw = gateway();
        let resp = gw.handle(&request("GET", "/bucketA/missing")).await;
        assert_eq!(resp.status, 404);
        let text = std::str::from_utf8(&resp.body).unwrap();
        assert!(text.contains("<Code>NoSuchKey</Code>"));
        assert!(text.contains("<RequestId>"));
        assert!(text.contains("<HostId>"));
    }

    #[tokio::test]
    async fn test_if_match_mismatch_is_412() {
        let gw = gateway();
        gw.handle(&request("PUT", "/bucketA/k").with_body("v1")).await;

        let get = request("GET", "/bucketA/k").with_header("If-Match", "\"wrong\"");
        let resp = gw.handle(&get).await;
        assert_eq!(resp.status, 412);
        assert!(std::str::from_utf8(&resp.body)
            .unwrap()
            .contains("PreconditionFailed"));
    }

    #[tokio::test]
    async fn test_if_none_match_hit_is_304() {
        let gw = gateway();
        let put_resp = gw.handle(&request("PUT", "/bucketA/k").with_body("v1")).await;
        let etag = put_resp.headers.get("etag").unwrap().to_string();

        let get = request("GET", "/bucketA/k").with_header("If-None-Match", etag.clone());
        let resp = gw.handle(&get).await;
        assert_eq!(resp.status, 304);
        assert!(resp.body.is_empty());
        assert_eq!(resp.headers.get("etag"), Some(etag.as_str()));
    }

    #[tokio::test]
    async fn test_custom_metadata_echoed() {
        let gw = gateway();
        let put = request("PUT", "/bucketA/k")
            .with_header("x-amz-meta-md5", "deadbeef")
            .with_body("v");
        gw.handle(&put).await;

        let resp = gw.handle(&request("GET", "/bucketA/k")).await;
        assert_eq!(resp.headers.get("x-amz-meta-md5"), Some("deadbeef"));
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let gw = gateway();
        gw.handle(&request("PUT", "/bucketA/k").with_body("v")).await;
        assert_eq!(gw.handle(&request("DELETE", "/bucketA/k")).await.status, 204);
        assert_eq!(gw.handle(&request("DELETE", "/bucketA/k")).await.status, 204);
    }

    #[tokio::test]
    async fn test_list_returns_xml_document() {
        let gw = gateway();
        gw.handle(&request("PUT", "/bucketA/saves/slot1").with_body("a")).await;
        gw.handle(&request("PUT", "/bucketA/saves/slot2").with_body("b")).await;
        gw.handle(&request("PUT", "/bucketA/logs/today").with_body("c")).await;

        let resp = gw
            .handle(&request("GET", "/bucketA?prefix=saves/&max-keys=10"))
            .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.headers.get("content-type"), Some("application/xml"));
        let text = std::str::from_utf8(&resp.body).unwrap();
        assert!(text.contains("<Key>saves/slot1</Key>"));
        assert!(text.contains("<Key>saves/slot2</Key>"));
        assert!(!text.contains("logs/today"));
        assert!(text.contains("<KeyCount>2</KeyCount>"));
        assert!(text.contains("<IsTruncated>false</IsTruncated>"));
    }

    #[tokio::test]
    async fn test_list_with_delimiter() {
        let gw = gateway();
        gw.handle(&request("PUT", "/bucketA/a/1").with_body("x")).await;
        gw.handle(&request("PUT", "/bucketA/a/2").with_body("x")).await;
        gw.handle(&request("PUT", "/bucketA/top").with_body("x")).await;

        let resp = gw
            .handle(&request("GET", "/bucketA?delimiter=%2F"))
            .await;
        let text = std::str::from_utf8(&resp.body).unwrap();
        assert!(text.contains("<CommonPrefixes><Prefix>a/</Prefix></CommonPrefixes>"));
        assert!(text.contains("<Key>top</Key>"));
    }

    #[tokio::test]
    async fn test_explicit_multipart_lifecycle() {
        let gw = gateway();

        let resp = gw.handle(&request("POST", "/bucketA/big?uploads")).await;
        assert_eq!(resp.status, 200);
        let text = std::str::from_utf8(&resp.body).unwrap().to_string();
        let upload_id = text
            .split("<UploadId>")
            .nth(1)
            .unwrap()
            .split("</UploadId>")
            .next()
            .unwrap()
            .to_string();

        let part1 = request(
            "PUT",
            &format!("/bucketA/big?uploadId={upload_id}&partNumber=1"),
        )
        .with_body("aaaa");
        let resp1 = gw.handle(&part1).await;
        assert_eq!(resp1.status, 200);
        let etag1 = resp1.headers.get("etag").unwrap().to_string();

        let part2 = request(
            "PUT",
            &format!("/bucketA/big?uploadId={upload_id}&partNumber=2"),
        )
        .with_body("bb");
        let resp2 = gw.handle(&part2).await;
        let etag2 = resp2.headers.get("etag").unwrap().to_string();

        let complete_body = format!(
            "<CompleteMultipartUpload>\
             <Part><PartNumber>1</PartNumber><ETag>{etag1}</ETag></Part>\
             <Part><PartNumber>2</PartNumber><ETag>{etag2}</ETag></Part>\
             </CompleteMultipartUpload>"
        );
        let complete = request("POST", &format!("/bucketA/big?uploadId={upload_id}"))
            .with_body(complete_body);
        let resp = gw.handle(&complete).await;
        assert_eq!(resp.status, 200);
        assert!(std::str::from_utf8(&resp.body)
            .unwrap()
            .contains("<CompleteMultipartUploadResult"));

        let got = gw.handle(&request("GET", "/bucketA/big")).await;
        assert_eq!(&got.body[..], b"aaaabb");
    }

    #[tokio::test]
    async fn test_malformed_complete_is_malformed_xml() {
        let gw = gateway();
        let init = gw.handle(&request("POST", "/bucketA/k?uploads")).await;
        let text = std::str::from_utf8(&init.body).unwrap().to_string();
        let upload_id = text
            .split("<UploadId>")
            .nth(1)
            .unwrap()
            .split("</UploadId>")
            .next()
            .unwrap()
            .to_string();

        let complete = request("POST", &format!("/bucketA/k?uploadId={upload_id}"))
            .with_body("this is not xml");
        let resp = gw.handle(&complete).await;
        assert_eq!(resp.status, 400);
        assert!(std::str::from_utf8(&resp.body)
            .unwrap()
            .contains("<Code>MalformedXML</Code>"));
    }

    #[tokio::test]
    async fn test_abort_multipart() {
        let gw = gateway();
        let init = gw.handle(&request("POST", "/bucketA/k?uploads")).await;
        let text = std::str::from_utf8(&init.body).unwrap().to_string();
        let upload_id = text
            .split("<UploadId>")
            .nth(1)
            .unwrap()
            .split("</UploadId>")
            .next()
            .unwrap()
            .to_string();

        let abort = request("DELETE", &format!("/bucketA/k?uploadId={upload_id}"));
        assert_eq!(gw.handle(&abort).await.status, 204);
        // A second abort refers to a gone upload.
        assert_eq!(gw.handle(&abort).await.status, 404);
    }

    #[tokio::test]
    async fn test_invalid_part_number_rejected() {
        let gw = gateway();
        let resp = gw
            .handle(&request("PUT", "/bucketA/k?uploadId=u&partNumber=0").with_body("x"))
            .await;
        assert_eq!(resp.status, 400);
        assert!(std::str::from_utf8(&resp.body)
            .unwrap()
            .contains("between 1 and 10000"));

        let resp = gw
            .handle(&request("PUT", "/bucketA/k?uploadId=u&partNumber=10001").with_body("x"))
            .await;
        assert_eq!(resp.status, 400);
    }

    #[tokio::test]
    async fn test_transparent_multipart_for_oversized_put() {
        let store = Arc::new(MemoryStore::with_min_part_size(4));
        let gw = ObjectGateway::new(
            store.clone(),
            GatewayConfig {
                buckets: vec!["bucketA".to_string()],
                default_bucket: "game-data".to_string(),
                multipart_threshold: 8,
                multipart_part_size: 4,
            },
        );

        let body: Vec<u8> = (0..22u8).collect();
        let put = request("PUT", "/bucketA/large").with_body(body.clone());
        let resp = gw.handle(&put).await;
        assert_eq!(resp.status, 204);
        assert!(resp.headers.contains("etag"));
        assert_eq!(store.pending_upload_count().await, 0);

        let got = gw.handle(&request("GET", "/bucketA/large")).await;
        assert_eq!(&got.body[..], &body[..]);
    }

    #[tokio::test]
    async fn test_transparent_multipart_equals_single_put() {
        let store = Arc::new(MemoryStore::with_min_part_size(4));
        let config = GatewayConfig {
            buckets: vec!["bucketA".to_string()],
            default_bucket: "game-data".to_string(),
            multipart_threshold: 8,
            multipart_part_size: 4,
        };
        let gw = ObjectGateway::new(store.clone(), config);

        let body: Vec<u8> = (0..20u8).cycle().take(30).collect();
        gw.handle(&request("PUT", "/bucketA/via-multipart").with_body(body.clone())).await;

        // The same bytes under the threshold-free path.
        let gw_plain = ObjectGateway::new(
            store.clone(),
            GatewayConfig {
                buckets: vec!["bucketA".to_string()],
                default_bucket: "game-data".to_string(),
                ..Default::default()
            },
        );
        gw_plain
            .handle(&request("PUT", "/bucketA/via-put").with_body(body.clone()))
            .await;

        let a = gw.handle(&request("GET", "/bucketA/via-multipart")).await;
        let b = gw.handle(&request("GET", "/bucketA/via-put")).await;
        assert_eq!(a.body, b.body);
        assert_eq!(a.headers.get("etag"), b.headers.get("etag"));
    }

    #[tokio::test]
    async fn test_unknown_method_is_405() {
        let gw = gateway();
        let resp = gw.handle(&request("PATCH", "/bucketA/k")).await;
        assert_eq!(resp.status, 405);
        assert!(std::str::from_utf8(&resp.body)
            .unwrap()
            .contains("MethodNotAllowed"));
    }
}
