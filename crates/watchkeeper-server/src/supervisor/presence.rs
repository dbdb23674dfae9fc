// crates/watchkeeper-server/src/supervisor/presence.rs
// ============================================================================
// Module: Process Presence Loop
// Description: Detect target external processes from the probe snapshot.
// Purpose: Maintain `ed.running`, `app.*.running`, and `app.foreground`, and
//          emit game start/stop events on transitions.
// Dependencies: watchkeeper-core, serde, serde_json, tokio, tracing
// ============================================================================

//! ## Overview
//! An OS-specific prober writes a small JSON snapshot (`foreground` plus the
//! list of running executables); this loop consumes it at the active cadence.
//! `ed.running` transitions emit `ED_STARTED` / `ED_STOPPED`. Foreground
//! writes are quiet — they change too often to journal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::warn;
use watchkeeper_core::CapabilityEntry;
use watchkeeper_core::CapabilityRegistry;
use watchkeeper_core::CapabilityStatus;
use watchkeeper_core::EventType;
use watchkeeper_core::SetState;
use watchkeeper_core::Severity;
use watchkeeper_core::StateKey;

use crate::runtime::EmitEvent;
use crate::runtime::Runtime;
use crate::supervisor::tick;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Event source label for presence emissions.
const SOURCE: &str = "supervisor.presence";
/// Capability name maintained by this loop.
const CAPABILITY: &str = "process_probe";

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Process probe snapshot document (consumed).
#[derive(Debug, Clone, Default, Deserialize)]
struct ProbeSnapshot {
    /// Foreground executable name, when known.
    #[serde(default)]
    foreground: Option<String>,
    /// Running executable names.
    #[serde(default)]
    running: Vec<String>,
}

impl ProbeSnapshot {
    /// Returns true when the executable appears in the running list.
    fn is_running(&self, exe: &str) -> bool {
        self.running.iter().any(|name| name.eq_ignore_ascii_case(exe))
    }
}

// ============================================================================
// SECTION: Loop
// ============================================================================

/// Runs the presence loop until shutdown.
pub async fn run(runtime: Arc<Runtime>, mut shutdown: watch::Receiver<bool>) {
    let cadence_ms = runtime.config.supervisor.active_cadence_ms;
    let mut prev_ed_running: Option<bool> = None;
    loop {
        if !tick(&mut shutdown, cadence_ms).await {
            return;
        }
        if let Err(detail) = sample(&runtime, &mut prev_ed_running) {
            warn!(detail = %detail, "presence sample failed");
            mark_capability(&runtime, CapabilityStatus::Degraded, Some(detail));
        } else {
            mark_capability(&runtime, CapabilityStatus::Available, None);
        }
    }
}

/// Samples the probe snapshot and publishes presence state.
fn sample(runtime: &Runtime, prev_ed_running: &mut Option<bool>) -> Result<(), String> {
    let path = &runtime.config.supervisor.process_probe_path;
    let raw = std::fs::read_to_string(path).map_err(|err| err.to_string())?;
    let snapshot: ProbeSnapshot = serde_json::from_str(&raw).map_err(|err| err.to_string())?;

    let ed_running = snapshot.is_running(&runtime.config.supervisor.game_exe);
    write_bool(runtime, "ed.running", ed_running, false)?;
    for (app_name, exe) in &runtime.config.supervisor.sidecars {
        let key = format!("app.{app_name}.running");
        write_bool(runtime, &key, snapshot.is_running(exe), false)?;
    }
    if let Some(foreground) = &snapshot.foreground {
        let key = StateKey::parse("app.foreground").map_err(|err| err.to_string())?;
        runtime
            .write_state(SetState {
                key,
                value: serde_json::Value::String(foreground.clone()),
                source: SOURCE.to_string(),
                confidence: None,
                observed_at: runtime.now(),
                quiet: true,
            })
            .map_err(|err| err.to_string())?;
    }

    if let Some(prev) = *prev_ed_running
        && prev != ed_running
    {
        let event_type = if ed_running { EventType::EdStarted } else { EventType::EdStopped };
        let emitted = runtime.emit_event(EmitEvent {
            event_type,
            severity: Severity::Info,
            source: SOURCE,
            correlation_id: None,
            incident_id: None,
            payload: json!({ "game_exe": runtime.config.supervisor.game_exe }),
        });
        if let Err(err) = emitted {
            warn!(error = %err, "game transition event append failed");
        }
    }
    *prev_ed_running = Some(ed_running);
    Ok(())
}

/// Writes one boolean state key.
fn write_bool(runtime: &Runtime, key: &str, value: bool, quiet: bool) -> Result<(), String> {
    let key = StateKey::parse(key).map_err(|err| err.to_string())?;
    runtime
        .write_state(SetState {
            key,
            value: serde_json::Value::Bool(value),
            source: SOURCE.to_string(),
            confidence: None,
            observed_at: runtime.now(),
            quiet,
        })
        .map_err(|err| err.to_string())?;
    Ok(())
}

/// Updates the probe capability entry.
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
