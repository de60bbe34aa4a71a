// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Internal buffered reader shared by the request and response parsers.
//!
//! Keeps a rolling buffer over the socket so header sections, chunk-size
//! lines, and body segments can be extracted regardless of how the bytes
//! were split across TCP reads. Bytes past whatever a method consumed stay
//! buffered for the next call, which is what makes keep-alive parsing work.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::MAX_HEADER_BYTES;
use crate::error::{HttpError, Result};

/// Cap on a single chunk-size line.
const MAX_LINE_BYTES: usize = 8 * 1024;

pub(crate) struct WireReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> WireReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Read more bytes from the socket into the buffer. Returns the number
    /// of bytes read; zero means EOF.
    async fn fill(&mut self) -> Result<usize> {
        Ok(self.reader.read_buf(&mut self.buf).await?)
    }

    /// Accumulate until the `\r\n\r\n` header terminator and return the head
    /// block (terminator excluded). Bytes past the terminator stay buffered.
    ///
    /// Returns `Ok(None)` when the peer closed cleanly before sending
    /// anything, i.e. the idle end of a keep-alive connection.
    pub(crate) async fn read_head(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(pos) = find_terminator(&self.buf) {
                let head = self.buf.split_to(pos).freeze();
                self.buf.advance(4);
                return Ok(Some(head));
            }
            if self.buf.len() > MAX_HEADER_BYTES {
                return Err(HttpError::HeadersTooLarge {
                    max: MAX_HEADER_BYTES,
                });
            }
            if self.fill().await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(HttpError::UnexpectedEof);
            }
        }
    }

    /// Read exactly `n` bytes.
    pub(crate) async fn read_exact_bytes(&mut self, n: usize) -> Result<Bytes> {
        while self.buf.len() < n {
            if self.fill().await? == 0 {
                return Err(HttpError::UnexpectedEof);
            }
        }
        Ok(self.buf.split_to(n).freeze())
    }

    /// Read up to `max` bytes, returning `None` at EOF. Used for streaming
    /// Content-Length bodies and close-delimited bodies.
    pub(crate) async fn next_segment(&mut self, max: usize) -> Result<Option<Bytes>> {
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Ok(None);
        }
        let take = self.buf.len().min(max);
        Ok(Some(self.buf.split_to(take).freeze()))
    }

    /// Read everything until the peer closes.
    pub(crate) async fn read_until_close(&mut self) -> Result<Bytes> {
        loop {
            if self.fill().await? == 0 {
                return Ok(self.buf.split().freeze());
            }
        }
    }

    /// Read one CRLF-terminated line (terminator stripped).
    pub(crate) async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = find_crlf(&self.buf) {
                let line = self.buf.split_to(pos);
                self.buf.advance(2);
                return String::from_utf8(line.to_vec())
                    .map_err(|_| HttpError::MalformedHeader("<non-utf8 line>".to_string()));
            }
            if self.buf.len() > MAX_LINE_BYTES {
                return Err(HttpError::InvalidChunkSize("<line too long>".to_string()));
            }
            if self.fill().await? == 0 {
                return Err(HttpError::UnexpectedEof);
            }
        }
    }

    /// Consume an expected CRLF (the separator after chunk data).
    pub(crate) async fn expect_crlf(&mut self) -> Result<()> {
        let sep = self.read_exact_bytes(2).await?;
        if &sep[..] != b"\r\n" {
            return Err(HttpError::InvalidChunkSize(format!(
                "expected CRLF after chunk data, got {:?}",
                &sep[..]
            )));
        }
        Ok(())
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Split a head block into its start line and header lines.
pub(crate) fn split_head(head: &[u8]) -> Result<(String, Vec<String>)> {
    let text = std::str::from_utf8(head)
        .map_err(|_| HttpError::MalformedStartLine("<non-utf8 head>".to_string()))?;
    let mut lines = text.split("\r\n");
    let start = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| HttpError::MalformedStartLine(String::new()))?
        .to_string();
    Ok((start, lines.map(str::to_string).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_head_leaves_remainder_buffered() {
        let data = b"GET / HTTP/1.1\r\nHost: x\r\n\r\nBODYBYTES".to_vec();
        let mut wire = WireReader::new(Cursor::new(data));
        let head = wire.read_head().await.unwrap().unwrap();
        assert_eq!(&head[..], b"GET / HTTP/1.1\r\nHost: x");
        let rest = wire.read_exact_bytes(9).await.unwrap();
        assert_eq!(&rest[..], b"BODYBYTES");
    }

    #[tokio::test]
    async fn test_read_head_clean_eof_is_none() {
        let mut wire = WireReader::new(Cursor::new(Vec::new()));
        assert!(wire.read_head().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_head_partial_eof_is_error() {
        let mut wire = WireReader::new(Cursor::new(b"GET / HT".to_vec()));
        assert!(matches!(
            wire.read_head().await,
            Err(HttpError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_read_line() {
        let mut wire = WireReader::new(Cursor::new(b"5;ext=1\r\nrest".to_vec()));
        assert_eq!(wire.read_line().await.unwrap(), "5;ext=1");
    }

    #[test]
    fn test_split_head() {
        let (start, lines) = split_head(b"HTTP/1.1 200 OK\r\nA: 1\r\nB: 2").unwrap();
        assert_eq!(start, "HTTP/1.1 200 OK");
        assert_eq!(lines, vec!["A: 1", "B: 2"]);
    }
}
