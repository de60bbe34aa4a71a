// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chunked transfer-encoding codec.
//!
//! Decoder accepts `hex-size[;extensions]\r\n data \r\n`, stops at the zero
//! chunk, and discards any trailer lines up to the final blank line. Sizes
//! are strict hex with no whitespace tolerance. The encoder writes one chunk
//! per call so the forwarding path can re-chunk a stream as it arrives.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{HttpError, Result};
use crate::wire::WireReader;

/// Parse a chunk-size line: hex digits, optionally followed by `;extensions`.
pub fn parse_chunk_size(line: &str) -> Result<usize> {
    let size_part = line.split(';').next().unwrap_or("");
    if size_part.is_empty() || !size_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(HttpError::InvalidChunkSize(line.to_string()));
    }
    usize::from_str_radix(size_part, 16)
        .map_err(|_| HttpError::InvalidChunkSize(line.to_string()))
}

/// Read one decoded chunk. Returns `None` after the terminal zero chunk
/// (trailers consumed).
pub(crate) async fn next_chunk<R: AsyncRead + Unpin>(
    wire: &mut WireReader<R>,
) -> Result<Option<Bytes>> {
    let line = wire.read_line().await?;
    let size = parse_chunk_size(&line)?;
    if size == 0 {
        // Trailer section: header lines until a blank line.
        loop {
            let trailer = wire.read_line().await?;
            if trailer.is_empty() {
                return Ok(None);
            }
        }
    }
    let data = wire.read_exact_bytes(size).await?;
    wire.expect_crlf().await?;
    Ok(Some(data))
}

/// Decode a whole chunked body.
pub(crate) async fn read_chunked_body<R: AsyncRead + Unpin>(
    wire: &mut WireReader<R>,
) -> Result<Bytes> {
    let mut body = Vec::new();
    while let Some(chunk) = next_chunk(wire).await? {
        body.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(body))
}

/// Write one chunk: `hex(len)\r\n data \r\n`. Empty input writes nothing;
/// a zero-size chunk on the wire would terminate the body.
pub async fn write_chunk<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    writer
        .write_all(format!("{:x}\r\n", data.len()).as_bytes())
        .await?;
    writer.write_all(data).await?;
    writer.write_all(b"\r\n").await?;
    Ok(())
}

/// Terminate a chunked body: `0\r\n\r\n`.
pub async fn write_chunk_terminator<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(b"0\r\n\r\n").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_parse_chunk_size_plain() {
        assert_eq!(parse_chunk_size("0").unwrap(), 0);
        assert_eq!(parse_chunk_size("a").unwrap(), 10);
        assert_eq!(parse_chunk_size("1F").unwrap(), 31);
    }

    #[test]
    fn test_parse_chunk_size_with_extension() {
        assert_eq!(parse_chunk_size("5;name=value").unwrap(), 5);
    }

    #[test]
    fn test_parse_chunk_size_rejects_whitespace() {
        assert!(parse_chunk_size(" 5").is_err());
        assert!(parse_chunk_size("5 ").is_err());
        assert!(parse_chunk_size("").is_err());
        assert!(parse_chunk_size("zz").is_err());
    }

    #[tokio::test]
    async fn test_decode_whole_body() {
        let wire_bytes = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n".to_vec();
        let mut wire = WireReader::new(Cursor::new(wire_bytes));
        let body = read_chunked_body(&mut wire).await.unwrap();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_decode_discards_trailers() {
        let wire_bytes = b"2\r\nhi\r\n0\r\nX-Trailer: 1\r\n\r\n".to_vec();
        let mut wire = WireReader::new(Cursor::new(wire_bytes));
        let body = read_chunked_body(&mut wire).await.unwrap();
        assert_eq!(&body[..], b"hi");
    }

    #[tokio::test]
    async fn test_final_chunk_split_across_reads() {
        // The terminator arrives in a separate write; decoding must still
        // produce one body.
        let (mut client, server) = tokio::io::duplex(64);
        let writer_task = tokio::spawn(async move {
            client.write_all(b"5\r\nhello\r\n").await.unwrap();
            client.flush().await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"0\r\n\r\n").await.unwrap();
        });

        let mut wire = WireReader::new(server);
        let body = read_chunked_body(&mut wire).await.unwrap();
        assert_eq!(&body[..], b"hello");
        writer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_crlf_after_data_rejected() {
        let wire_bytes = b"2\r\nhiXX0\r\n\r\n".to_vec();
        let mut wire = WireReader::new(Cursor::new(wire_bytes));
        assert!(matches!(
            read_chunked_body(&mut wire).await,
            Err(HttpError::InvalidChunkSize(_))
        ));
    }

    #[tokio::test]
    async fn test_encode_round_trip() {
        let mut out = Vec::new();
        write_chunk(&mut out, b"hello").await.unwrap();
        write_chunk(&mut out, b" world").await.unwrap();
        write_chunk_terminator(&mut out).await.unwrap();

        let mut wire = WireReader::new(Cursor::new(out));
        let body = read_chunked_body(&mut wire).await.unwrap();
        assert_eq!(&body[..], b"hello world");
    }
}
