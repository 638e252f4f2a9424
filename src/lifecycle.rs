//! Server lifecycle: `Starting → Running → Draining → Stopped`.
//!
//! The coordinator owns the shutdown context and the serve task. It never
//! touches connections itself; it starts the serve loop, triggers the drain
//! and then races the serve loop's completion against the drain deadline.

use crate::config::Config;
use crate::handler::Handler;
use crate::server::{Server, ServerError};
use crate::shutdown::Shutdown;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// How the drain ended.
#[derive(Debug)]
pub enum DrainOutcome {
    /// The serve task finished: every connection closed, or the task failed.
    Completed(Result<(), ServerError>),
    /// The deadline passed first; remaining connections were aborted.
    TimedOut,
}

pub struct Coordinator<H> {
    config: Config,
    handler: Arc<H>,
    state: State,
    shutdown: Shutdown,
    serve_task: Option<JoinHandle<()>>,
}

impl<H: Handler> Coordinator<H> {
    pub fn new(config: Config, handler: H) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
            state: State::Starting,
            shutdown: Shutdown::new(),
            serve_task: None,
        }
    }

    /// Get the current state for testing
    #[cfg(test)]
    pub fn state(&self) -> State {
        self.state
    }

    /// Bind and spawn the serve loop. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.state != State::Starting {
            return Err(ServerError::AlreadyStarted);
        }

        let server = Server::bind(&self.config, Arc::clone(&self.handler))?;
        let addr = server
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: self.config.listen,
                source,
            })?;

        info!(address = %addr, "Begin listening");
        self.serve_task = Some(tokio::spawn(server.serve(self.shutdown.subscribe())));
        self.transition(State::Running);
        Ok(addr)
    }

    /// Suspend until `signal` resolves, then enter `Draining`.
    pub async fn await_shutdown_signal<F: Future>(&mut self, signal: F) -> F::Output {
        let received = signal.await;
        info!("Shutting down server...");
        self.transition(State::Draining);
        received
    }

    /// Trigger the drain and wait for it, at most `deadline`.
    pub async fn drain(&mut self, deadline: Duration) -> DrainOutcome {
        self.shutdown.trigger();

        let Some(mut serve_task) = self.serve_task.take() else {
            return DrainOutcome::Completed(Ok(()));
        };

        tokio::select! {
            joined = &mut serve_task => DrainOutcome::Completed(joined.map_err(ServerError::from)),
            _ = tokio::time::sleep(deadline) => {
                serve_task.abort();
                DrainOutcome::TimedOut
            }
        }
    }

    /// Log how the drain ended and enter `Stopped`.
    pub fn report_outcome(&mut self, outcome: &DrainOutcome) {
        match outcome {
            DrainOutcome::Completed(Ok(())) => info!("Finished listening"),
            DrainOutcome::Completed(Err(e)) => error!(error = %e, "Finished listening"),
            DrainOutcome::TimedOut => warn!(
                timeout = ?self.config.shutdown_timeout,
                "Graceful shutdown timed out"
            ),
        }
        self.transition(State::Stopped);
        info!("Server stopped");
    }

    /// Wait for `signal`, drain with the configured deadline and report.
    pub async fn shutdown_on<F: Future>(mut self, signal: F) -> DrainOutcome {
        self.await_shutdown_signal(signal).await;
        let outcome = self.drain(self.config.shutdown_timeout).await;
        self.report_outcome(&outcome);
        outcome
    }

    /// Full lifecycle. Only a failed start is an error; a drain timeout is
    /// reported through the outcome.
    pub async fn run<F: Future>(mut self, signal: F) -> Result<DrainOutcome, ServerError> {
        self.start().await?;
        Ok(self.shutdown_on(signal).await)
    }

    fn transition(&mut self, next: State) {
        debug_assert!(next > self.state, "{:?} -> {:?}", self.state, next);
        debug!(from = ?self.state, to = ?next, "Lifecycle transition");
        self.state = next;
    }
}
