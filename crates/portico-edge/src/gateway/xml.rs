// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! S3-style XML documents.
//!
//! The gateway's XML surface is small and fixed: four response documents and
//! one request document (`CompleteMultipartUpload`). Both directions are
//! handled here with plain string building and tag scanning; the documents
//! carry no nesting beyond one repeated element, so a full XML parser buys
//! nothing.

use chrono::{DateTime, Utc};
use thiserror::Error;

use portico_store::{CompletedPart, ListResult};

/// The request body of a multipart completion could not be interpreted.
#[derive(Debug, Error)]
#[error("malformed XML")]
pub struct MalformedXml;

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

pub fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn text_between<'a>(s: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = s.find(&open)? + open.len();
    let end = s[start..].find(&close)? + start;
    Some(&s[start..end])
}

/// Parse the `CompleteMultipartUpload` request document into its part list.
pub fn parse_complete_multipart(body: &str) -> Result<Vec<CompletedPart>, MalformedXml> {
    if !body.contains("<CompleteMultipartUpload") {
        return Err(MalformedXml);
    }

    let mut parts = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("<Part>") {
        let after = &rest[start + "<Part>".len()..];
        let end = after.find("</Part>").ok_or(MalformedXml)?;
        let part = &after[..end];

        let part_number: u16 = text_between(part, "PartNumber")
            .and_then(|n| n.trim().parse().ok())
            .ok_or(MalformedXml)?;
        let etag = text_between(part, "ETag").ok_or(MalformedXml)?;

        parts.push(CompletedPart {
            part_number,
            etag: unescape(etag.trim()),
        });
        rest = &after[end + "</Part>".len()..];
    }

    if parts.is_empty() {
        return Err(MalformedXml);
    }
    Ok(parts)
}

fn iso8601(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// `Error` document. Every error body carries a request id and host id so a
/// failure can be traced from the caller's side.
pub fn error_document(code: &str, message: &str, request_id: &str, host_id: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <Error>\
         <Code>{}</Code>\
         <Message>{}</Message>\
         <RequestId>{}</RequestId>\
         <HostId>{}</HostId>\
         </Error>",
        escape(code),
        escape(message),
        escape(request_id),
        escape(host_id),
    )
}

pub fn initiate_multipart_result(bucket: &str, key: &str, upload_id: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <InitiateMultipartUploadResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
         <Bucket>{}</Bucket>\
         <Key>{}</Key>\
         <UploadId>{}</UploadId>\
         </InitiateMultipartUploadResult>",
        escape(bucket),
        escape(key),
        escape(upload_id),
    )
}

pub fn complete_multipart_result(location: &str, bucket: &str, key: &str, etag: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <CompleteMultipartUploadResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
         <Location>{}</Location>\
         <Bucket>{}</Bucket>\
         <Key>{}</Key>\
         <ETag>{}</ETag>\
         </CompleteMultipartUploadResult>",
        escape(location),
        escape(bucket),
        escape(key),
        escape(etag),
    )
}

/// `ListBucketResult` document.
pub fn list_bucket_result(
    bucket: &str,
    prefix: Option<&str>,
    delimiter: Option<&str>,
    max_keys: usize,
    result: &ListResult,
) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">",
    );
    out.push_str(&format!("<Name>{}</Name>", escape(bucket)));
    out.push_str(&format!(
        "<Prefix>{}</Prefix>",
        escape(prefix.unwrap_or(""))
    ));
    if let Some(delimiter) = delimiter {
        out.push_str(&format!("<Delimiter>{}</Delimiter>", escape(delimiter)));
    }
    out.push_str(&format!("<MaxKeys>{max_keys}</MaxKeys>"));
    out.push_str(&format!(
        "<KeyCount>{}</KeyCount>",
        result.objects.len() + result.common_prefixes.len()
    ));
    out.push_str(&format!("<IsTruncated>{}</IsTruncated>", result.is_truncated));
    if let Some(token) = &result.next_continuation_token {
        out.push_str(&format!(
            "<NextContinuationToken>{}</NextContinuationToken>",
            escape(token)
        ));
    }
    for entry in &result.objects {
        out.push_str(&format!(
            "<Contents><Key>{}</Key><LastModified>{}</LastModified><ETag>{}</ETag><Size>{}</Size></Contents>",
            escape(&entry.key),
            iso8601(&entry.last_modified),
            escape(&entry.etag),
            entry.size,
        ));
    }
    for prefix in &result.common_prefixes {
        out.push_str(&format!(
            "<CommonPrefixes><Prefix>{}</Prefix></CommonPrefixes>",
            escape(prefix)
        ));
    }
    out.push_str("</ListBucketResult>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_store::ListEntry;

    #[test]
    fn test_escape_round_trip() {
        let raw = "a<b>&\"c'";
        assert_eq!(unescape(&escape(raw)), raw);
    }

    #[test]
    fn test_parse_complete_multipart() {
        let body = "<CompleteMultipartUpload>\
                    <Part><PartNumber>1</PartNumber><ETag>&quot;aaa&quot;</ETag></Part>\
                    <Part><PartNumber>2</PartNumber><ETag>\"bbb\"</ETag></Part>\
                    </CompleteMultipartUpload>";
        let parts = parse_complete_multipart(body).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_number, 1);
        assert_eq!(parts[0].etag, "\"aaa\"");
        assert_eq!(parts[1].etag, "\"bbb\"");
    }

    #[test]
    fn test_parse_rejects_missing_root() {
        assert!(parse_complete_multipart("<Whatever/>").is_err());
    }

    #[test]
    fn test_parse_rejects_incomplete_part() {
        let body = "<CompleteMultipartUpload>\
                    <Part><PartNumber>1</PartNumber></Part>\
                    </CompleteMultipartUpload>";
        assert!(parse_complete_multipart(body).is_err());
    }

    #[test]
    fn test_parse_rejects_empty_part_list() {
        assert!(parse_complete_multipart("<CompleteMultipartUpload></CompleteMultipartUpload>").is_err());
    }

    #[test]
    fn test_error_document_contains_fields() {
        let doc = error_document("NoSuchKey", "The specified key does not exist.", "r-1", "h-1");
        assert!(doc.contains("<Code>NoSuchKey</Code>"));
        assert!(doc.contains("<Message>The specified key does not exist.</Message>"));
        assert!(doc.contains("<RequestId>r-1</RequestId>"));
        assert!(doc.contains("<HostId>h-1</HostId>"));
    }

    #[test]
    fn test_list_document_shape() {
        let result = ListResult {
            objects: vec![ListEntry {
                key: "saves/slot1".to_string(),
                size: 42,
                etag: "\"abc\"".to_string(),
                last_modified: Utc::now(),
            }],
            common_prefixes: vec!["saves/".to_string()],
            is_truncated: true,
            next_continuation_token: Some("tok".to_string()),
        };
        let doc = list_bucket_result("bucket", Some("s"), Some("/"), 100, &result);
        assert!(doc.contains("<Name>bucket</Name>"));
        assert!(doc.contains("<KeyCount>2</KeyCount>"));
        assert!(doc.contains("<IsTruncated>true</IsTruncated>"));
        assert!(doc.contains("<NextContinuationToken>tok</NextContinuationToken>"));
        assert!(doc.contains("<Key>saves/slot1</Key>"));
        assert!(doc.contains("<ETag>&quot;abc&quot;</ETag>"));
        assert!(doc.contains("<CommonPrefixes><Prefix>saves/</Prefix></CommonPrefixes>"));
    }
}
