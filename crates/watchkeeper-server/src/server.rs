// crates/watchkeeper-server/src/server.rs
// ============================================================================
// Module: Watchkeeper Server Assembly
// Description: Process wiring, task spawning, and graceful shutdown.
// Purpose: Open the store, assemble the runtime, spawn the supervisor and
//          ingest gate, and serve HTTP until shutdown.
// Dependencies: watchkeeper-core, watchkeeper-store-sqlite, axum, tokio, tracing
// ============================================================================

//! ## Overview
//! Startup is fail-fast: store schema mismatch, unusable addresses, or policy
//! parse failures abort before anything serves. Shutdown is cooperative:
//! loops observe the watch flag at their next tick, pending HTTP handlers
//! finish within the grace window, the UDP socket closes with its task, and
//! the managed parser child is stopped by the registry that started it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::info;
use tracing::warn;
use watchkeeper_store_sqlite::SqliteControlStore;

use crate::config::WatchkeeperConfig;
use crate::http::AppState;
use crate::http::router;
use crate::ingest;
use crate::pipeline::ExecutionPipeline;
use crate::runtime::Runtime;
use crate::supervisor;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Fatal server errors.
///
/// # Invariants
/// - Every variant is fatal at startup or teardown; none are retried.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Store failed to open or validate.
    #[error("store initialization failed: {0}")]
    Store(String),
    /// Runtime assembly failed.
    #[error("runtime initialization failed: {0}")]
    Runtime(String),
    /// Listener could not bind.
    #[error("listener bind failed: {0}")]
    Bind(String),
    /// HTTP serving failed.
    #[error("server failure: {0}")]
    Serve(String),
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Runs the Watchkeeper server until an interrupt arrives.
///
/// # Errors
///
/// Returns [`ServerError`] on fatal initialization or serving failure.
pub async fn run(config: WatchkeeperConfig) -> Result<(), ServerError> {
    let store = tokio::task::spawn_blocking({
        let store_config = config.store.clone();
        move || SqliteControlStore::new(&store_config)
    })
    .await
    .map_err(|err| ServerError::Store(err.to_string()))?
    .map_err(|err| ServerError::Store(err.to_string()))?;

    let runtime =
        Arc::new(Runtime::new(config, Arc::new(store)).map_err(ServerError::Runtime)?);
    let pipeline = Arc::new(ExecutionPipeline::new(Arc::clone(&runtime)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = supervisor::spawn_all(&runtime, &shutdown_rx);
    tasks.push(tokio::spawn(ingest::run(Arc::clone(&runtime), shutdown_rx.clone())));

    let listener = tokio::net::TcpListener::bind(&runtime.config.server.bind_addr)
        .await
        .map_err(|err| ServerError::Bind(err.to_string()))?;
    info!(addr = runtime.config.server.bind_addr.as_str(), "watchkeeper serving");

    let app = router(AppState {
        runtime: Arc::clone(&runtime),
        pipeline,
    });
    let grace = Duration::from_millis(runtime.config.server.shutdown_grace_ms);
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_interrupt())
        .await;

    // Serving has ended; flip the flag so every loop exits at its next tick.
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if tokio::time::timeout(grace, task).await.is_err() {
            warn!("supervisor task did not exit within the grace window");
        }
    }
    if let Err(err) = runtime.parser.stop() {
        warn!(error = %err, "parser stop on shutdown failed");
    }
    serve_result.map_err(|err| ServerError::Serve(err.to_string()))
}

/// Resolves when the process receives an interrupt.
async fn wait_for_interrupt() {
    let _ = tokio::signal::ctrl_c().await;
    info!("interrupt received, shutting down");
}
