// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Portico HTTP - HTTP/1.1 wire handling for the proxy fabric
//!
//! The data channels carry raw HTTP/1.1 in both directions: the container
//! side writes requests and reads responses; the edge side is the mirror.
//! This crate holds the parsers, writers, and chunked codec both sides share:
//!
//! - [`RequestReader`]: pull-parser for requests, keep-alive aware, with
//!   head-only parsing plus streaming body access for the forwarding path
//! - [`ResponseReader`]: pull-parser for responses, including the
//!   early-completion statuses (`204`, `304`, `1xx`) and close-delimited
//!   bodies
//! - [`write_request`] / [`write_response`]: serializers that resolve body
//!   framing the way a general-purpose proxy must (buffer-and-measure for
//!   unframed request bodies, chunk-encode unframed response bodies)
//!
//! Chunk-size parsing is strict RFC 7230: hex digits, optional extensions
//! after `;`, no whitespace tolerance.

pub mod body;
pub mod chunked;
pub mod error;
pub mod headers;
pub mod request;
pub mod response;

mod wire;

pub use body::BodyFraming;
pub use error::HttpError;
pub use headers::Headers;
pub use request::{Request, RequestHead, RequestReader, write_request, write_request_head};
pub use response::{Response, ResponseReader, write_response};

/// Cap on the header section of a single message.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Segment size used when streaming bodies between sockets.
pub const BODY_SEGMENT_BYTES: usize = 64 * 1024;
