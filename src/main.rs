//! request-echo: a diagnostic HTTP server
//!
//! Every request, whatever its method or path, is answered with its own
//! wire representation: request line, headers in received order, blank line
//! and body, as `text/plain`. Useful behind proxies and load balancers to see
//! exactly what arrived.
//!
//! Features:
//! - Byte-faithful request dumps (header case and order preserved)
//! - Graceful shutdown on SIGINT/SIGTERM with a bounded drain period
//! - Configuration via `PORT`, CLI arguments or a TOML file

mod config;
mod handler;
mod http;
mod lifecycle;
mod registry;
mod server;
mod shutdown;
#[cfg(test)]
mod testing;

use config::Config;
use handler::EchoHandler;
use lifecycle::Coordinator;
use shutdown::Signals;
use std::io::IsTerminal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    info!(
        listen = %config.listen,
        shutdown_timeout = ?config.shutdown_timeout,
        max_connections = config.max_connections,
        workers = ?config.workers,
        "Starting request-echo server"
    );

    let runtime = build_runtime(&config)?;
    let result = runtime.block_on(run(config));

    // Connections left behind by a timed-out drain are not waited for
    runtime.shutdown_background();

    if let Err(e) = &result {
        error!(error = %e, "Server failed");
    }
    result
}

fn build_runtime(config: &Config) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("request-echo-worker");
    if let Some(workers) = config.workers {
        builder.worker_threads(workers.max(1));
    }
    builder.build()
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // Handlers go in before the listener so an early signal drains instead
    // of killing the process
    let mut signals = Signals::register()?;

    let coordinator = Coordinator::new(config, EchoHandler);
    coordinator
        .run(async move {
            let signal = signals.recv().await;
            info!(?signal, "Received termination signal");
        })
        .await?;
    Ok(())
}
