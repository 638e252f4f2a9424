//! HTTP/1.x wire handling.
//!
//! Requests are read straight off the socket rather than through an HTTP
//! library so the raw head bytes survive untouched:
//!
//! - `parser`: request head and body framing
//! - `request`: the request handed to a `Handler`
//! - `response`: status codes and response encoding
//! - `connection`: the per-connection read/handle/write loop

pub mod connection;
pub mod parser;
mod request;
mod response;

pub use connection::serve_connection;
pub use request::{Body, BodyError, Request};
pub use response::{Persistence, Response, Status};

use crate::config::Config;

/// Size limits applied while reading a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_header_size: usize,
    /// `None` accepts bodies of any size.
    pub max_body_size: Option<usize>,
}

impl From<&Config> for Limits {
    fn from(config: &Config) -> Self {
        Self {
            max_header_size: config.max_header_size,
            max_body_size: config.max_body_size,
        }
    }
}
