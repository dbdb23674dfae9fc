// crates/watchkeeper-server/src/supervisor/parser_link.rs
// ============================================================================
// Module: Parser Lifecycle Coupling
// Description: Start and stop the telemetry parser with the game.
// Purpose: Invoke `edparser.start` on a false-to-true `ed.running` transition
//          and `edparser.stop` on the reverse, debounced by the active cadence.
// Dependencies: watchkeeper-core, watchkeeper-actuators, tokio, tracing
// ============================================================================

//! ## Overview
//! When auto-run is enabled, the parser follows the game: one start per
//! rising edge, one stop per falling edge. A transition must survive one full
//! cadence tick before acting, so a flapping probe cannot thrash the child.
//! The parser supervisor itself refuses duplicate starts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::info;
use tracing::warn;
use watchkeeper_core::ToolName;

use crate::runtime::Runtime;
use crate::supervisor::read_bool_state;
use crate::supervisor::tick;

// ============================================================================
// SECTION: Loop
// ============================================================================

/// Runs the parser coupling loop until shutdown.
pub async fn run(runtime: Arc<Runtime>, mut shutdown: watch::Receiver<bool>) {
    if !runtime.config.supervisor.parser_auto_run {
        return;
    }
    let cadence_ms = runtime.config.supervisor.active_cadence_ms;
    let mut settled = read_bool_state(&runtime, "ed.running");
    let mut pending: Option<bool> = None;
    loop {
        if !tick(&mut shutdown, cadence_ms).await {
            return;
        }
        let observed = read_bool_state(&runtime, "ed.running");
        if observed == settled {
            pending = None;
            continue;
        }
        // Debounce: act only when the new value survives a second tick.
        if pending != Some(observed) {
            pending = Some(observed);
            continue;
        }
        pending = None;
        settled = observed;
        let tool = if observed {
            ToolName::new("edparser.start")
        } else {
            ToolName::new("edparser.stop")
        };
        invoke(&runtime, tool).await;
    }
}

/// Dispatches one parser lifecycle tool through the router.
async fn invoke(runtime: &Arc<Runtime>, tool: ToolName) {
    let router = Arc::clone(&runtime.router);
    let label = tool.as_str().to_string();
    let dispatched =
        tokio::task::spawn_blocking(move || router.dispatch(&tool, &Value::Null)).await;
    match dispatched {
        Ok(Ok(outcome)) => {
            info!(tool = label, status = outcome.status.as_str(), "parser coupling");
        }
        Ok(Err(err)) => warn!(tool = label, error = %err, "parser coupling refused"),
        Err(err) => warn!(tool = label, error = %err, "parser coupling join failed"),
    }
}
