// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP/1.1 response parsing and serialization.
//!
//! The container side reads responses off a data channel with
//! [`ResponseReader`]; the edge side writes them with [`write_response`].
//! Three body delimitations are understood: `Content-Length`, chunked, and
//! close-delimited (a response with no framing headers is valid and its
//! length is defined by the peer closing). Status `204`, `304`, and `1xx`
//! finalize immediately with an empty body regardless of declared framing.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::body::{BodyFraming, response_framing};
use crate::chunked;
use crate::error::{HttpError, Result};
use crate::headers::Headers;
use crate::wire::{WireReader, split_head};

/// A fully-read response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// A plaintext response with `Content-Type: text/plain`.
    pub fn text(status: u16, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let mut resp = Self::new(status);
        resp.headers.set("Content-Type", "text/plain");
        resp.headers.set("Content-Length", body.len().to_string());
        resp.body = body;
        resp
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Canonical reason phrase for the statuses this fabric produces.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        412 => "Precondition Failed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// Pull-parser for responses on one data channel.
pub struct ResponseReader<R> {
    wire: WireReader<R>,
}

impl<R: AsyncRead + Unpin> ResponseReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            wire: WireReader::new(reader),
        }
    }

    /// Read one response. `head_request` must be true when the request this
    /// response answers was a `HEAD`: such responses carry framing headers
    /// describing the body they are *not* sending (RFC 7230 §3.3.3).
    ///
    /// After a chunked or close-delimited body the headers are normalized to
    /// an accurate `Content-Length` so the response can be re-serialized
    /// without re-deciding framing.
    pub async fn read_response(&mut self, head_request: bool) -> Result<Response> {
        let Some(head) = self.wire.read_head().await? else {
            return Err(HttpError::UnexpectedEof);
        };
        let (start, header_lines) = split_head(&head)?;

        let rest = start
            .strip_prefix("HTTP/1.")
            .and_then(|r| r.split_once(' '))
            .map(|(_, rest)| rest)
            .ok_or_else(|| HttpError::MalformedStartLine(start.clone()))?;
        let (code, reason) = match rest.split_once(' ') {
            Some((code, reason)) => (code, reason),
            None => (rest, ""),
        };
        let status: u16 = code
            .parse()
            .map_err(|_| HttpError::MalformedStartLine(start.clone()))?;

        let mut headers = Headers::new();
        for line in header_lines {
            headers.parse_line(&line)?;
        }

        let framing = if head_request {
            BodyFraming::None
        } else {
            response_framing(status, &headers)?
        };

        let body = match framing {
            BodyFraming::None => Bytes::new(),
            BodyFraming::ContentLength(n) => self.wire.read_exact_bytes(n as usize).await?,
            BodyFraming::Chunked => {
                let body = chunked::read_chunked_body(&mut self.wire).await?;
                headers.remove("transfer-encoding");
                headers.set("Content-Length", body.len().to_string());
                body
            }
            BodyFraming::UntilClose => {
                let body = self.wire.read_until_close().await?;
                headers.set("Content-Length", body.len().to_string());
                body
            }
        };

        Ok(Response {
            status,
            reason: reason.to_string(),
            headers,
            body,
        })
    }
}

/// Serialize a response. Framing is resolved the way the edge side must:
/// - a body with neither `Content-Length` nor chunked encoding is sent
///   chunk-encoded (`Transfer-Encoding: chunked` added);
/// - no body and no `Content-Length` gets `Content-Length: 0`.
pub async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, resp: &Response) -> Result<()> {
    let mut headers = resp.headers.clone();
    let has_length = headers.contains("content-length");
    let declares_chunked = headers
        .get_all("transfer-encoding")
        .flat_map(|v| v.split(','))
        .any(|c| c.trim().eq_ignore_ascii_case("chunked"));

    let chunk_body = if !resp.body.is_empty() && !has_length && !declares_chunked {
        headers.set("Transfer-Encoding", "chunked");
        true
    } else if resp.body.is_empty() && !has_length && !declares_chunked {
        headers.set("Content-Length", "0");
        false
    } else {
        declares_chunked
    };

    let reason = if resp.reason.is_empty() {
        reason_phrase(resp.status)
    } else {
        &resp.reason
    };
    let mut out = format!("HTTP/1.1 {} {}\r\n", resp.status, reason);
    for (name, value) in headers.iter() {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    writer.write_all(out.as_bytes()).await?;

    if chunk_body {
        let mut offset = 0;
        while offset < resp.body.len() {
            let end = (offset + crate::BODY_SEGMENT_BYTES).min(resp.body.len());
            chunked::write_chunk(writer, &resp.body[offset..end]).await?;
            offset = end;
        }
        chunked::write_chunk_terminator(writer).await?;
    } else if !resp.body.is_empty() {
        writer.write_all(&resp.body).await?;
    }
    writer.flush().await?;
    Ok(())
}
