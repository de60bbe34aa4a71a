// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request forwarding onto a data channel.
//!
//! The writer streams where the inbound framing allows it: Content-Length
//! bodies are pumped segment by segment, chunked bodies are decoded and
//! re-chunked on the wire chunk by chunk. Each discrete unit is flushed so
//! the edge is never stalled on a partially-filled buffer. Absolute-form
//! targets are rewritten to origin-form, and a `Host` header is inserted if
//! the workload omitted one.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

use portico_http::chunked::{write_chunk, write_chunk_terminator};
use portico_http::{BodyFraming, RequestHead, RequestReader, write_request_head};

use crate::error::{ContainerError, Result};

/// Write one request (head plus streamed body) to a data channel.
pub async fn write_request_to_channel<R, W>(
    head: &RequestHead,
    framing: BodyFraming,
    reader: &mut RequestReader<R>,
    mut writer: W,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let outbound = build_outbound_head(head)?;
    write_request_head(&mut writer, &outbound).await?;

    match framing {
        BodyFraming::None => {}
        BodyFraming::ContentLength(n) => {
            let mut remaining = n;
            loop {
                // A failure reading the inbound body means the workload went
                // away; a failure writing means the channel did.
                let segment = reader
                    .next_body_segment(&mut remaining)
                    .await
                    .map_err(|e| ContainerError::ClientAborted(e.to_string()))?;
                let Some(segment) = segment else { break };
                writer.write_all(&segment).await?;
                writer.flush().await?;
            }
        }
        BodyFraming::Chunked => {
            loop {
                let chunk = reader
                    .next_chunk()
                    .await
                    .map_err(|e| ContainerError::ClientAborted(e.to_string()))?;
                let Some(chunk) = chunk else { break };
                write_chunk(&mut writer, &chunk).await?;
                writer.flush().await?;
            }
            write_chunk_terminator(&mut writer).await?;
            writer.flush().await?;
        }
        BodyFraming::UntilClose => {
            return Err(ContainerError::InvalidTarget(
                "close-delimited request body".to_string(),
            ));
        }
    }
    Ok(())
}

/// Rewrite the head for the wire: origin-form target, `Host` present.
fn build_outbound_head(head: &RequestHead) -> Result<RequestHead> {
    let (target, url_host) = if head.target.starts_with("http://")
        || head.target.starts_with("https://")
    {
        let url = Url::parse(&head.target)
            .map_err(|_| ContainerError::InvalidTarget(head.target.clone()))?;
        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        let host = url.host_str().map(|h| match url.port() {
            Some(p) => format!("{h}:{p}"),
            None => h.to_string(),
        });
        (target, host)
    } else {
        (head.target.clone(), None)
    };

    let mut headers = head.headers.clone();
    if !headers.contains("host") {
        headers.push("Host", url_host.unwrap_or_else(|| "localhost".to_string()));
    }

    Ok(RequestHead {
        method: head.method.clone(),
        target,
        headers,
    })
}
