//! Response construction and wire encoding.
//!
//! Every response is `text/plain` and displayed inline, whatever its status.

use bytes::{Bytes, BytesMut};

const CONTENT_TYPE: &str = "text/plain";
const CONTENT_DISPOSITION: &str = "inline";

/// Body sent when a request cannot be dumped.
pub const UNEXPECTED_ERROR: &str = "Unexpected error";

/// Interim response for `Expect: 100-continue`.
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Response status codes this server produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    PayloadTooLarge,
    HeaderFieldsTooLarge,
    InternalServerError,
    VersionNotSupported,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::PayloadTooLarge => 413,
            Status::HeaderFieldsTooLarge => 431,
            Status::InternalServerError => 500,
            Status::VersionNotSupported => 505,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::HeaderFieldsTooLarge => "Request Header Fields Too Large",
            Status::InternalServerError => "Internal Server Error",
            Status::VersionNotSupported => "HTTP Version Not Supported",
        }
    }
}

/// What the `Connection` header should announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// HTTP/1.1 default, no header needed.
    KeepAlive,
    /// HTTP/1.0 client that asked for keep-alive.
    ExplicitKeepAlive,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: Status,
    body: Bytes,
}

impl Response {
    pub fn new(status: Status, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(Status::Ok, body)
    }

    pub fn internal_error() -> Self {
        Self::new(Status::InternalServerError, UNEXPECTED_ERROR)
    }

    /// Response for a request the connection refuses to pass to a handler.
    pub fn rejection(status: Status) -> Self {
        Self::new(status, status.reason())
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Get the body for testing
    #[cfg(test)]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Serialize into `out`. `include_body` is false for HEAD requests;
    /// Content-Length still reports the full body length.
    pub fn encode(&self, persistence: Persistence, include_body: bool, out: &mut BytesMut) {
        let content_length = self.body.len().to_string();
        out.reserve(128 + self.body.len());

        out.extend_from_slice(b"HTTP/1.1 ");
        out.extend_from_slice(self.status.code().to_string().as_bytes());
        out.extend_from_slice(b" ");
        out.extend_from_slice(self.status.reason().as_bytes());
        out.extend_from_slice(b"\r\n");

        write_header(out, "Content-Type", CONTENT_TYPE);
        write_header(out, "Content-Disposition", CONTENT_DISPOSITION);
        write_header(out, "Content-Length", &content_length);
        match persistence {
            Persistence::KeepAlive => {}
            Persistence::ExplicitKeepAlive => write_header(out, "Connection", "keep-alive"),
            Persistence::Close => write_header(out, "Connection", "close"),
        }
        out.extend_from_slice(b"\r\n");

        if include_body {
            out.extend_from_slice(&self.body);
        }
    }
}

fn write_header(out: &mut BytesMut, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}
