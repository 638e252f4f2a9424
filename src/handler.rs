//! Request handlers.
//!
//! The server is constructed with an explicit handler instance rather than a
//! process-wide route table. `EchoHandler` is the only production handler:
//! it answers every method and path with the request's own wire bytes.

use crate::http::{BodyError, Request, Response};
use bytes::{Bytes, BytesMut};
use std::future::Future;
use tracing::error;

/// Maps one request to one response.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> impl Future<Output = Response> + Send;
}

/// Errors producing a wire dump of a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DumpError {
    #[error("failed to read request body: {0}")]
    Body(#[from] BodyError),
}

/// Echoes each request back as `text/plain`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl Handler for EchoHandler {
    async fn handle(&self, request: Request) -> Response {
        match dump(&request) {
            Ok(wire) => Response::ok(wire),
            Err(e) => {
                error!(
                    error = %e,
                    peer = %request.peer,
                    received = request.body.received(),
                    "Unexpected error"
                );
                Response::internal_error()
            }
        }
    }
}

/// Reproduce the request exactly as it arrived: request line, headers in
/// received order, blank line, body.
pub fn dump(request: &Request) -> Result<Bytes, DumpError> {
    let body = request.body.bytes().map_err(|e| e.clone())?;
    if body.is_empty() {
        return Ok(request.raw_head.clone());
    }

    let mut wire = BytesMut::with_capacity(request.raw_head.len() + body.len());
    wire.extend_from_slice(&request.raw_head);
    wire.extend_from_slice(body);
    Ok(wire.freeze())
}
