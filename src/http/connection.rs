//! Per-connection serving loop.
//!
//! Reads a request head, frames the body, hands the request to the handler
//! and writes the response, then repeats for keep-alive connections. An idle
//! connection closes as soon as shutdown is triggered; a request already in
//! flight is answered with `Connection: close`.

use super::parser::{self, BodyKind, ChunkedResult, ParseError, ParseResult, RequestHead, Version};
use super::response::CONTINUE;
use super::{Body, BodyError, Limits, Persistence, Request, Response, Status};
use crate::handler::Handler;
use crate::shutdown::ShutdownListener;
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

/// Initial read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Outcome of reading a request head.
enum HeadRead {
    Complete(RequestHead, usize),
    /// Peer closed before a full head arrived.
    Closed,
    Rejected(Status),
}

/// Outcome of reading a request body. Lengths count bytes after the head.
enum BodyRead {
    Complete(usize),
    Failed(usize, BodyError),
    TooLarge,
}

/// Serve requests on one connection until either side closes it.
pub async fn serve_connection<S, H>(
    mut stream: S,
    peer: SocketAddr,
    handler: Arc<H>,
    limits: Limits,
    mut shutdown: ShutdownListener,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        // Between requests the connection is idle
        if buffer.is_empty() {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    trace!(%peer, "Closing idle connection");
                    return Ok(());
                }
                n = stream.read_buf(&mut buffer) => {
                    if n? == 0 {
                        trace!(%peer, "Connection closed by client");
                        return Ok(());
                    }
                }
            }
        }

        let (head, head_len) = match read_head(&mut stream, &mut buffer, limits.max_header_size).await? {
            HeadRead::Complete(head, len) => (head, len),
            HeadRead::Closed => {
                trace!(%peer, "Connection closed mid-request");
                return Ok(());
            }
            HeadRead::Rejected(status) => return reject(&mut stream, peer, status).await,
        };

        info!(
            method = %head.method,
            target = %head.target,
            version = head.version.as_str(),
            user_agent = ?head.user_agent(),
            %peer,
            "Serving request"
        );

        let kind = match head.body_kind() {
            Ok(kind) => kind,
            Err(e) => {
                debug!(%peer, error = %e, "Malformed request framing");
                return reject(&mut stream, peer, Status::BadRequest).await;
            }
        };

        let body_read = read_body(
            &mut stream,
            &mut buffer,
            head_len,
            kind,
            head.expects_continue(),
            limits.max_body_size,
        )
        .await;

        let raw_head = buffer.split_to(head_len).freeze();
        let body = match body_read {
            BodyRead::Complete(len) => Body::Complete(buffer.split_to(len).freeze()),
            BodyRead::Failed(len, error) => {
                debug!(%peer, %error, "Request body incomplete");
                Body::Failed {
                    partial: buffer.split_to(len).freeze(),
                    error,
                }
            }
            BodyRead::TooLarge => return reject(&mut stream, peer, Status::PayloadTooLarge).await,
        };

        // Framing is lost after a failed body
        let reusable = !body.is_failed() && head.keep_alive();
        let version = head.version;
        let include_body = head.method != "HEAD";

        let response = handler
            .handle(Request {
                head,
                raw_head,
                body,
                peer,
            })
            .await;

        let persistence = if !reusable || shutdown.is_triggered() {
            Persistence::Close
        } else if version == Version::Http10 {
            Persistence::ExplicitKeepAlive
        } else {
            Persistence::KeepAlive
        };

        let mut out = BytesMut::new();
        response.encode(persistence, include_body, &mut out);
        if let Err(e) = write_all(&mut stream, &out).await {
            warn!(%peer, error = %e, "Error writing response");
            return Ok(());
        }
        trace!(%peer, status = response.status().code(), bytes = out.len(), "Response written");

        if persistence == Persistence::Close {
            return Ok(());
        }
    }
}

async fn read_head<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    max_header_size: usize,
) -> io::Result<HeadRead>
where
    S: AsyncRead + Unpin,
{
    loop {
        match parser::parse(&buffer[..]) {
            ParseResult::Complete(_, len) if len > max_header_size => {
                return Ok(HeadRead::Rejected(Status::HeaderFieldsTooLarge));
            }
            ParseResult::Complete(head, len) => return Ok(HeadRead::Complete(head, len)),
            ParseResult::Error(e) => {
                debug!(error = %e, "Malformed request head");
                let status = match e {
                    ParseError::Version => Status::VersionNotSupported,
                    _ => Status::BadRequest,
                };
                return Ok(HeadRead::Rejected(status));
            }
            ParseResult::Incomplete => {
                if buffer.len() > max_header_size {
                    return Ok(HeadRead::Rejected(Status::HeaderFieldsTooLarge));
                }
                if stream.read_buf(buffer).await? == 0 {
                    return Ok(HeadRead::Closed);
                }
            }
        }
    }
}

/// Read until the whole body is buffered after the head.
///
/// Errors are reported inside `BodyRead` so the handler still gets the
/// request and decides the response.
async fn read_body<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    head_len: usize,
    kind: BodyKind,
    expects_continue: bool,
    max_body_size: Option<usize>,
) -> BodyRead
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut continue_sent = !expects_continue;
    let too_large = |length: usize| max_body_size.is_some_and(|max| length > max);

    loop {
        let available = buffer.len() - head_len;

        match kind {
            BodyKind::Empty => return BodyRead::Complete(0),
            BodyKind::Length(length) => {
                let length = match usize::try_from(length) {
                    Ok(length) if !too_large(length) => length,
                    _ => return BodyRead::TooLarge,
                };
                if available >= length {
                    return BodyRead::Complete(length);
                }
                buffer.reserve(length - available);
            }
            BodyKind::Chunked => match parser::chunked_len(&buffer[head_len..]) {
                ChunkedResult::Complete(length) if too_large(length) => {
                    return BodyRead::TooLarge;
                }
                ChunkedResult::Complete(length) => return BodyRead::Complete(length),
                ChunkedResult::Error => return BodyRead::Failed(available, BodyError::InvalidChunk),
                ChunkedResult::Incomplete if too_large(available) => return BodyRead::TooLarge,
                ChunkedResult::Incomplete => {}
            },
        }

        // Only ask for the body once it is known to be acceptable
        if !continue_sent {
            continue_sent = true;
            if let Err(e) = write_all(stream, CONTINUE).await {
                return BodyRead::Failed(available, BodyError::Io(e.kind()));
            }
        }

        match stream.read_buf(buffer).await {
            Ok(0) => {
                return BodyRead::Failed(available, BodyError::UnexpectedEof { received: available });
            }
            Ok(_) => {}
            Err(e) => return BodyRead::Failed(available, BodyError::Io(e.kind())),
        }
    }
}

async fn reject<S>(stream: &mut S, peer: SocketAddr, status: Status) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    info!(%peer, status = status.code(), "Rejecting request");
    let mut out = BytesMut::new();
    Response::rejection(status).encode(Persistence::Close, true, &mut out);
    write_all(stream, &out).await
}

async fn write_all<S>(stream: &mut S, data: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(data).await?;
    stream.flush().await
}
