// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP/1.1 request parsing and serialization.
//!
//! The container side forwards requests without buffering where the inbound
//! framing allows it, so the reader exposes two levels:
//! - [`RequestReader::read_head`] plus the streaming body accessors
//!   ([`RequestReader::next_body_segment`], [`RequestReader::next_chunk`])
//!   for the forwarding path;
//! - [`RequestReader::read_request`] for the edge side, which needs the whole
//!   request in hand before invoking the object-store gateway. Chunked bodies
//!   are decoded and the headers normalized to `Content-Length`.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::body::{BodyFraming, request_framing};
use crate::chunked;
use crate::error::{HttpError, Result};
use crate::headers::Headers;
use crate::wire::{WireReader, split_head};

/// Request line and headers, body not yet consumed.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    /// Origin-form or absolute-form target exactly as received.
    pub target: String,
    pub headers: Headers,
}

impl RequestHead {
    pub fn body_framing(&self) -> Result<BodyFraming> {
        request_framing(&self.headers)
    }
}

/// A fully-read request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Pull-parser for requests on one connection, keep-alive aware.
pub struct RequestReader<R> {
    wire: WireReader<R>,
}

impl<R: AsyncRead + Unpin> RequestReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            wire: WireReader::new(reader),
        }
    }

    /// Parse the next request line and headers. `Ok(None)` means the peer
    /// closed cleanly between requests.
    pub async fn read_head(&mut self) -> Result<Option<RequestHead>> {
        let Some(head) = self.wire.read_head().await? else {
            return Ok(None);
        };
        let (start, header_lines) = split_head(&head)?;

        let mut parts = start.splitn(3, ' ');
        let method = parts
            .next()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| HttpError::MalformedStartLine(start.clone()))?;
        let target = parts
            .next()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| HttpError::MalformedStartLine(start.clone()))?;
        let version = parts
            .next()
            .ok_or_else(|| HttpError::MalformedStartLine(start.clone()))?;
        if !version.starts_with("HTTP/1.") {
            return Err(HttpError::MalformedStartLine(start.clone()));
        }

        let mut headers = Headers::new();
        for line in header_lines {
            headers.parse_line(&line)?;
        }

        Ok(Some(RequestHead {
            method: method.to_string(),
            target: target.to_string(),
            headers,
        }))
    }

    /// Read the body that follows a head, fully buffered. Chunked bodies are
    /// returned decoded.
    pub async fn read_body(&mut self, framing: BodyFraming) -> Result<Bytes> {
        match framing {
            BodyFraming::None => Ok(Bytes::new()),
            BodyFraming::ContentLength(n) => self.wire.read_exact_bytes(n as usize).await,
            BodyFraming::Chunked => chunked::read_chunked_body(&mut self.wire).await,
            // Requests are never close-delimited.
            BodyFraming::UntilClose => Err(HttpError::MalformedHeader(
                "close-delimited request body".to_string(),
            )),
        }
    }

    /// Read one whole request, with headers normalized so that the body's
    /// framing is always an accurate `Content-Length` (the transfer encoding
    /// is consumed here and must not be forwarded).
    pub async fn read_request(&mut self) -> Result<Option<Request>> {
        let Some(head) = self.read_head().await? else {
            return Ok(None);
        };
        let framing = head.body_framing()?;
        let body = self.read_body(framing).await?;

        let mut headers = head.headers;
        if framing == BodyFraming::Chunked {
            headers.remove("transfer-encoding");
            headers.set("Content-Length", body.len().to_string());
        }

        Ok(Some(Request {
            method: head.method,
            target: head.target,
            headers,
            body,
        }))
    }

    /// Next segment of a Content-Length body. `remaining` is decremented;
    /// returns `None` once it reaches zero.
    pub async fn next_body_segment(&mut self, remaining: &mut u64) -> Result<Option<Bytes>> {
        if *remaining == 0 {
            return Ok(None);
        }
        let max = (*remaining).min(crate::BODY_SEGMENT_BYTES as u64) as usize;
        match self.wire.next_segment(max).await? {
            Some(segment) => {
                *remaining -= segment.len() as u64;
                Ok(Some(segment))
            }
            None => Err(HttpError::UnexpectedEof),
        }
    }

    /// Next decoded chunk of a chunked body; `None` after the terminal chunk.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        chunked::next_chunk(&mut self.wire).await
    }
}

/// Write a request line and headers (no body, no framing adjustments).
pub async fn write_request_head<W: AsyncWrite + Unpin>(
    writer: &mut W,
    head: &RequestHead,
) -> Result<()> {
    let mut out = format!("{} {} HTTP/1.1\r\n", head.method, head.target);
    for (name, value) in head.headers.iter() {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    writer.write_all(out.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a fully-buffered request, resolving body framing:
/// - `Content-Length` present: body written unchanged;
/// - `Transfer-Encoding: chunked`: body re-chunked on the wire;
/// - neither, with a body: `Content-Length` is set to the buffered size.
pub async fn write_request<W: AsyncWrite + Unpin>(writer: &mut W, req: &Request) -> Result<()> {
    let mut headers = req.headers.clone();
    let framing = request_framing(&headers)?;
    if framing == BodyFraming::None && !req.body.is_empty() {
        headers.set("Content-Length", req.body.len().to_string());
    }

    let head = RequestHead {
        method: req.method.clone(),
        target: req.target.clone(),
        headers,
    };
    write_request_head(writer, &head).await?;

    match framing {
        BodyFraming::Chunked => {
            chunked::write_chunk(writer, &req.body).await?;
            chunked::write_chunk_terminator(writer).await?;
        }
        _ => {
            if !req.body.is_empty() {
                writer.write_all(&req.body).await?;
            }
        }
    }
    writer.flush().await?;
    Ok(())
}
