//! TCP server for the echo handler.
//!
//! Accepts connections, serves each one on its own task, and on shutdown
//! stops accepting and waits for the open connections to finish.

use crate::config::Config;
use crate::handler::Handler;
use crate::http::{serve_connection, Limits};
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownListener;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("server already started")]
    AlreadyStarted,
    #[error("listener task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Server instance: a bound listener plus the handler it serves.
pub struct Server<H> {
    listener: TcpListener,
    handler: Arc<H>,
    limits: Limits,
    connection_limit: Arc<Semaphore>,
}

impl<H: Handler> Server<H> {
    /// Bind the configured address. Must be called within a tokio runtime.
    pub fn bind(config: &Config, handler: Arc<H>) -> Result<Self, ServerError> {
        let addr = config.listen;
        let listener = create_listener(addr)
            .and_then(TcpListener::from_std)
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Server {
            listener,
            handler,
            limits: Limits::from(config),
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown, then drain.
    ///
    /// Returns once every connection task has finished. The listener is
    /// closed before draining starts, so no new connection can extend the
    /// drain.
    pub async fn serve(self, mut shutdown: ShutdownListener) {
        let Server {
            listener,
            handler,
            limits,
            connection_limit,
        } = self;
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<usize>();
        let mut registry = ConnectionRegistry::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                Some(id) = done_rx.recv() => {
                    registry.remove(id);
                }
                accepted = accept(&listener, &connection_limit) => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    debug!(%peer, active = registry.len() + 1, "New connection");

                    let handler = Arc::clone(&handler);
                    let conn_shutdown = shutdown.clone();
                    let done = done_tx.clone();
                    registry.insert_with(|id| {
                        tokio::spawn(async move {
                            let served =
                                serve_connection(stream, peer, handler, limits, conn_shutdown).await;
                            if let Err(e) = served {
                                debug!(%peer, error = %e, "Connection error");
                            }
                            drop(permit);
                            let _ = done.send(id);
                        })
                        .abort_handle()
                    });
                }
            }
        }

        drop(listener);
        drop(done_tx);
        info!(in_flight = registry.len(), "Stopped accepting connections");

        // Each task holds a sender; the channel closes when the last one ends
        while let Some(id) = done_rx.recv().await {
            registry.remove(id);
        }
        debug!("All connections closed");
    }
}

/// Wait for a connection slot, then accept. Cancel safe.
async fn accept(
    listener: &TcpListener,
    connection_limit: &Arc<Semaphore>,
) -> io::Result<(TcpStream, SocketAddr, OwnedSemaphorePermit)> {
    let permit = Arc::clone(connection_limit)
        .acquire_owned()
        .await
        .map_err(io::Error::other)?;
    let (stream, peer) = listener.accept().await?;
    Ok((stream, peer, permit))
}

/// Create a nonblocking TCP listener with SO_REUSEADDR.
///
/// SO_REUSEPORT is left off so a port already in use fails the bind.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;
    use crate::shutdown::Shutdown;
    use crate::testing::{exchange, test_config, RawResponse, SlowHandler};
    use tokio::sync::Notify;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = Server::bind(&test_config(), Arc::new(EchoHandler)).unwrap();
        let addr = server.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_port_in_use() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = test_config();
        config.listen = occupied.local_addr().unwrap();

        match Server::bind(&config, Arc::new(EchoHandler)) {
            Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, config.listen),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("bind should fail"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_isolated() {
        let server = Server::bind(&test_config(), Arc::new(EchoHandler)).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let serve = tokio::spawn(server.serve(shutdown.subscribe()));

        let clients: Vec<_> = (0..16)
            .map(|i| {
                tokio::spawn(async move {
                    let request = format!(
                        "POST /?id={i} HTTP/1.1\r\n\
                         Host: test\r\n\
                         X-Request-Id: {i}\r\n\
                         Content-Length: {}\r\n\
                         Connection: close\r\n\
                         \r\n\
                         body-{i}",
                        format!("body-{i}").len()
                    );
                    let raw = exchange(addr, request.as_bytes()).await;
                    (request, RawResponse::parse(&raw))
                })
            })
            .collect();

        for client in clients {
            let (request, response) = client.await.unwrap();
            assert_eq!(response.status, 200);
            assert_eq!(response.header("content-type"), Some("text/plain"));
            assert_eq!(response.header("content-disposition"), Some("inline"));
            assert_eq!(response.body, request.as_bytes());
        }

        shutdown.trigger();
        timeout(Duration::from_secs(1), serve)
            .await
            .expect("serve loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight_request() {
        let started = Arc::new(Notify::new());
        let handler = Arc::new(SlowHandler::new(
            Duration::from_millis(200),
            Arc::clone(&started),
        ));
        let server = Server::bind(&test_config(), handler).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let mut serve = tokio::spawn(server.serve(shutdown.subscribe()));

        let request = b"GET /in-flight HTTP/1.1\r\nHost: test\r\n\r\n";
        let client = tokio::spawn(exchange(addr, request));
        started.notified().await;
        shutdown.trigger();

        // The serve loop must still be draining while the handler sleeps
        assert!(timeout(Duration::from_millis(50), &mut serve).await.is_err());

        let response = RawResponse::parse(&client.await.unwrap());
        assert_eq!(response.status, 200);
        assert_eq!(response.header("connection"), Some("close"));
        assert_eq!(response.body, request);

        timeout(Duration::from_secs(1), serve)
            .await
            .expect("drain did not finish")
            .unwrap();
    }

    #[tokio::test]
    async fn test_new_connections_refused_after_shutdown() {
        let server = Server::bind(&test_config(), Arc::new(EchoHandler)).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let serve = tokio::spawn(server.serve(shutdown.subscribe()));

        shutdown.trigger();
        timeout(Duration::from_secs(1), serve).await.unwrap().unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_aborting_serve_aborts_connections() {
        let started = Arc::new(Notify::new());
        let handler = Arc::new(SlowHandler::new(
            Duration::from_secs(60),
            Arc::clone(&started),
        ));
        let server = Server::bind(&test_config(), handler).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let serve = tokio::spawn(server.serve(shutdown.subscribe()));

        let client = tokio::spawn(exchange(addr, b"GET / HTTP/1.1\r\nHost: t\r\n\r\n"));
        started.notified().await;
        serve.abort();

        let raw = timeout(Duration::from_secs(1), client)
            .await
            .expect("connection was not torn down")
            .unwrap();
        assert!(raw.is_empty());
    }
}
