//! Inbound request as handed to a handler.

use super::parser::RequestHead;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;

/// A single request, consumed once by the handler.
#[derive(Debug)]
pub struct Request {
    /// Parsed view of the head, used for logging and framing decisions.
    pub head: RequestHead,
    /// The head exactly as read from the socket, blank line included.
    pub raw_head: Bytes,
    pub body: Body,
    pub peer: SocketAddr,
}

/// Request body as framed on the wire.
#[derive(Debug)]
pub enum Body {
    Complete(Bytes),
    /// Reading stopped early; `partial` holds whatever did arrive.
    Failed { partial: Bytes, error: BodyError },
}

/// Reasons a body could not be read in full.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BodyError {
    #[error("connection closed after {received} body bytes")]
    UnexpectedEof { received: usize },
    #[error("malformed chunked encoding")]
    InvalidChunk,
    #[error("read failed: {0}")]
    Io(io::ErrorKind),
}

impl Body {
    #[cfg(test)]
    pub fn empty() -> Self {
        Body::Complete(Bytes::new())
    }

    pub fn bytes(&self) -> Result<&Bytes, &BodyError> {
        match self {
            Body::Complete(bytes) => Ok(bytes),
            Body::Failed { error, .. } => Err(error),
        }
    }

    /// Body bytes that arrived, complete or not.
    pub fn received(&self) -> usize {
        match self {
            Body::Complete(bytes) => bytes.len(),
            Body::Failed { partial, .. } => partial.len(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Body::Failed { .. })
    }
}
