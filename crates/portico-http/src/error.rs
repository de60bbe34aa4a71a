// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP wire errors.

use thiserror::Error;

/// Errors that can occur while parsing or writing HTTP/1.1 messages.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed start line: {0:?}")]
    MalformedStartLine(String),

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("header section exceeds {max} bytes")]
    HeadersTooLarge { max: usize },

    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    #[error("invalid chunk size line: {0:?}")]
    InvalidChunkSize(String),

    #[error("connection closed mid-message")]
    UnexpectedEof,
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, HttpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = HttpError::MalformedStartLine("GARBAGE".to_string());
        assert_eq!(format!("{}", err), "malformed start line: \"GARBAGE\"");

        let err = HttpError::HeadersTooLarge { max: 65536 };
        assert_eq!(format!("{}", err), "header section exceeds 65536 bytes");

        let err = HttpError::UnexpectedEof;
        assert_eq!(format!("{}", err), "connection closed mid-message");
    }
}
