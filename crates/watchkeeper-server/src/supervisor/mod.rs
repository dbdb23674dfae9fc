// crates/watchkeeper-server/src/supervisor/mod.rs
// ============================================================================
// Module: Watchkeeper Supervisor
// Description: Deterministic event-driven pollers over external collectors.
// Purpose: Translate process, telemetry, hardware, and music observations
//          into state updates and derived events.
// Dependencies: watchkeeper-core, tokio, tracing
// ============================================================================

//! ## Overview
//! The supervisor owns independent cooperative loops, each with its own
//! cadence. No loop blocks on another; all state mutations go through the
//! store. Every loop swallows its own errors, logs them, and retries at the
//! next tick — the process never aborts on a collector failure. Shutdown is a
//! watch flag checked at every cadence tick.

/// Watch-condition derivation and handover notes.
pub mod condition;
/// Hardware probe ingestion.
pub mod hardware;
/// Music now-playing ingestion.
pub mod music;
/// Overlay variable bridging.
pub mod overlay;
/// Parser lifecycle coupling.
pub mod parser_link;
/// Process presence detection.
pub mod presence;
/// Telemetry file ingestion.
pub mod telemetry;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::runtime::Runtime;

// ============================================================================
// SECTION: Assembly
// ============================================================================

/// Spawns every supervisor loop and returns their join handles.
#[must_use]
pub fn spawn_all(
    runtime: &Arc<Runtime>,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(presence::run(Arc::clone(runtime), shutdown.clone())),
        tokio::spawn(telemetry::run(Arc::clone(runtime), shutdown.clone())),
        tokio::spawn(hardware::run(Arc::clone(runtime), shutdown.clone())),
        tokio::spawn(music::run(Arc::clone(runtime), shutdown.clone())),
        tokio::spawn(parser_link::run(Arc::clone(runtime), shutdown.clone())),
        tokio::spawn(condition::run(Arc::clone(runtime), shutdown.clone())),
        tokio::spawn(overlay::run(Arc::clone(runtime), shutdown.clone())),
    ]
}

/// Sleeps one cadence tick, returning false when shutdown was requested.
pub(crate) async fn tick(shutdown: &mut watch::Receiver<bool>, cadence_ms: u64) -> bool {
    tokio::select! {
        () = tokio::time::sleep(Duration::from_millis(cadence_ms)) => true,
        _ = shutdown.changed() => !*shutdown.borrow(),
    }
}

/// Reads a boolean state key, defaulting to false.
pub(crate) fn read_bool_state(runtime: &Runtime, key: &str) -> bool {
    use watchkeeper_core::StateKey;
    use watchkeeper_core::StateStore;
    StateKey::parse(key)
        .ok()
        .and_then(|key| runtime.store.get_state(&key).ok().flatten())
        .and_then(|entry| entry.value.as_bool())
        .unwrap_or(false)
}
