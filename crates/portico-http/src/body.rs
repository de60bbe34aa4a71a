// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Body framing resolution.

use crate::error::{HttpError, Result};
use crate::headers::Headers;

/// How a message body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// Exactly this many bytes follow the header section.
    ContentLength(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// No body.
    None,
    /// Responses only: the body runs until the peer closes the connection.
    UntilClose,
}

/// Resolve framing for a request. A request with neither `Content-Length`
/// nor `Transfer-Encoding: chunked` has no body.
pub fn request_framing(headers: &Headers) -> Result<BodyFraming> {
    if is_chunked(headers) {
        return Ok(BodyFraming::Chunked);
    }
    if let Some(len) = content_length(headers)? {
        return Ok(BodyFraming::ContentLength(len));
    }
    Ok(BodyFraming::None)
}

/// Resolve framing for a response. `204`, `304`, and `1xx` never carry a
/// body; a response without framing headers is delimited by close.
pub fn response_framing(status: u16, headers: &Headers) -> Result<BodyFraming> {
    if status == 204 || status == 304 || (100..200).contains(&status) {
        return Ok(BodyFraming::None);
    }
    if is_chunked(headers) {
        return Ok(BodyFraming::Chunked);
    }
    if let Some(len) = content_length(headers)? {
        return Ok(BodyFraming::ContentLength(len));
    }
    Ok(BodyFraming::UntilClose)
}

fn is_chunked(headers: &Headers) -> bool {
    headers
        .get_all("transfer-encoding")
        .flat_map(|v| v.split(','))
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn content_length(headers: &Headers) -> Result<Option<u64>> {
    match headers.get("content-length") {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| HttpError::InvalidContentLength(raw.to_string())),
    }
}
