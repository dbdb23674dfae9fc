// crates/watchkeeper-server/src/supervisor/telemetry.rs
// ============================================================================
// Module: Telemetry Ingest Loop
// Description: Curated ingest of the on-disk telemetry snapshot.
// Purpose: Publish `ed.telemetry.*` state keys from the parser's JSON file.
// Dependencies: watchkeeper-core, serde_json, tokio, tracing
// ============================================================================

//! ## Overview
//! The external parser writes a JSON telemetry document; this loop consumes a
//! curated subset of its keys and publishes them under `ed.telemetry.*`. The
//! loop runs at the active cadence while the game is running and drops to the
//! idle cadence otherwise. High-frequency numeric fields are written quiet.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;
use watchkeeper_core::CapabilityEntry;
use watchkeeper_core::CapabilityRegistry;
use watchkeeper_core::CapabilityStatus;
use watchkeeper_core::SetState;
use watchkeeper_core::StateKey;

use crate::runtime::Runtime;
use crate::supervisor::read_bool_state;
use crate::supervisor::tick;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Event source label for telemetry writes.
const SOURCE: &str = "supervisor.telemetry";
/// Capability name maintained by this loop.
const CAPABILITY: &str = "telemetry";
/// Curated telemetry fields published as state keys.
const CURATED_FIELDS: &[&str] = &[
    "docked",
    "landed",
    "supercruise",
    "in_srv",
    "system",
    "station",
    "body",
    "ship",
    "fuel_level",
    "hull_health",
];
/// Fields written quiet (high-frequency numeric deltas).
const QUIET_FIELDS: &[&str] = &["fuel_level", "hull_health"];

// ============================================================================
// SECTION: Loop
// ============================================================================

/// Runs the telemetry ingest loop until shutdown.
pub async fn run(runtime: Arc<Runtime>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let cadence_ms = if read_bool_state(&runtime, "ed.running") {
            runtime.config.supervisor.active_cadence_ms
        } else {
            runtime.config.supervisor.idle_cadence_ms
        };
        if !tick(&mut shutdown, cadence_ms).await {
            return;
        }
        match sample(&runtime) {
            Ok(()) => mark_capability(&runtime, CapabilityStatus::Available, None),
            Err(detail) => {
                // A missing file while the game is down is expected quiet.
                if read_bool_state(&runtime, "ed.running") {
                    warn!(detail = %detail, "telemetry sample failed");
                    mark_capability(&runtime, CapabilityStatus::Degraded, Some(detail));
                }
            }
        }
    }
}

/// Reads the telemetry document and publishes curated fields.
fn sample(runtime: &Runtime) -> Result<(), String> {
    let path = &runtime.config.supervisor.telemetry_path;
    let raw = std::fs::read_to_string(path).map_err(|err| err.to_string())?;
    let document: Value = serde_json::from_str(&raw).map_err(|err| err.to_string())?;
    let observed_at = runtime.now();
    for field in CURATED_FIELDS {
        let Some(value) = document.get(*field) else {
            continue;
        };
        let key = StateKey::parse(&format!("ed.telemetry.{field}"))
            .map_err(|err| err.to_string())?;
        runtime
            .write_state(SetState {
                key,
                value: value.clone(),
                source: SOURCE.to_string(),
                confidence: None,
                observed_at,
                quiet: QUIET_FIELDS.contains(field),
            })
            .map_err(|err| err.to_string())?;
    }
    Ok(())
}

/// Updates the telemetry capability entry.
fn mark_capability(runtime: &Runtime, status: CapabilityStatus, detail: Option<String>) {
    let entry = CapabilityEntry {
        name: CAPABILITY.to_string(),
        status,
        detail,
        updated_at: runtime.now(),
    };
    if let Err(err) = runtime.store.set_capability(entry) {
        warn!(error = %err, "capability write failed");
    }
}
