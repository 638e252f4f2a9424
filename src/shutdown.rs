//! Shutdown coordination.
//!
//! `Shutdown` is a single-shot cancellation context: it is triggered at most
//! once and every `ShutdownListener` observes the trigger. In production the
//! trigger follows an OS termination signal delivered through `Signals`;
//! tests trigger it directly.

use std::io;
use tokio::sync::watch;

/// Owner side of the shutdown context.
#[derive(Debug)]
pub struct Shutdown {
    sender: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Trigger shutdown. Returns `true` only for the call that actually
    /// initiated it.
    pub fn trigger(&self) -> bool {
        !self.sender.send_replace(true)
    }

    /// Whether shutdown has been triggered, for testing
    #[cfg(test)]
    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Create a listener that resolves once shutdown is triggered.
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of the shutdown context.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Wait until shutdown is triggered.
    ///
    /// A dropped `Shutdown` counts as triggered: nobody is left to keep the
    /// server running. Cancel safe.
    pub async fn triggered(&mut self) {
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Termination signal that started a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

/// OS termination signal subscription (SIGINT and SIGTERM).
///
/// Registering replaces the default disposition, so this must happen before
/// the listener starts: a signal arriving in between would otherwise kill the
/// process instead of draining it.
pub struct Signals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Signals {
    #[cfg(unix)]
    pub fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn register() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the first termination signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> TerminationSignal {
        tokio::select! {
            _ = self.interrupt.recv() => TerminationSignal::Interrupt,
            _ = self.terminate.recv() => TerminationSignal::Terminate,
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> TerminationSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        TerminationSignal::Interrupt
    }
}
