// crates/watchkeeper-server/src/supervisor/condition.rs
// ============================================================================
// Module: Watch-Condition Loop
// Description: Deterministic watch-condition derivation and handover notes.
// Purpose: Maintain `app.watch_condition` and emit exactly one transition
//          pair (`WATCH_CONDITION_CHANGED` + `HANDOVER_NOTE`) per change.
// Dependencies: watchkeeper-core, serde_json, tokio, tracing
// ============================================================================

//! ## Overview
//! Each tick reads three facts (game running, streaming active, degraded
//! capabilities), derives the condition, and compares it to the stored
//! value. On change, the new condition is written first — so both events are
//! stamped with it — followed by the transition event and a handover note
//! summarizing apps, latched alarms, and degraded capabilities.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tracing::warn;
use watchkeeper_core::AppsSnapshot;
use watchkeeper_core::CapabilityRegistry;
use watchkeeper_core::CapabilityStatus;
use watchkeeper_core::ConditionFacts;
use watchkeeper_core::EventType;
use watchkeeper_core::HandoverNote;
use watchkeeper_core::SetState;
use watchkeeper_core::Severity;
use watchkeeper_core::StateKey;
use watchkeeper_core::StateStore;
use watchkeeper_core::WatchCondition;
use watchkeeper_core::derive_condition;

use crate::runtime::EmitEvent;
use crate::runtime::Runtime;
use crate::supervisor::read_bool_state;
use crate::supervisor::tick;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Event source label for condition emissions.
const SOURCE: &str = "supervisor.condition";

// ============================================================================
// SECTION: Loop
// ============================================================================

/// Runs the watch-condition loop until shutdown.
pub async fn run(runtime: Arc<Runtime>, mut shutdown: watch::Receiver<bool>) {
    let cadence_ms = runtime.config.supervisor.active_cadence_ms;
    loop {
        if !tick(&mut shutdown, cadence_ms).await {
            return;
        }
        if let Err(detail) = derive_and_publish(&runtime) {
            warn!(detail = %detail, "condition derivation failed");
        }
    }
}

/// Derives the condition and publishes a transition when it changed.
fn derive_and_publish(runtime: &Runtime) -> Result<(), String> {
    let ed_running = read_bool_state(runtime, "ed.running");
    let streaming_active = runtime
        .config
        .supervisor
        .streaming_app
        .as_ref()
        .is_some_and(|app| read_bool_state(runtime, &format!("app.{app}.running")));
    let degraded_names = degraded_capabilities(runtime);
    let derived = derive_condition(ConditionFacts {
        ed_running,
        streaming_active,
        degraded_services: !degraded_names.is_empty(),
    });

    let previous = runtime.watch_condition();
    let initialized = read_condition_key(runtime).is_some();
    if initialized && previous == derived {
        return Ok(());
    }

    let key = StateKey::parse("app.watch_condition").map_err(|err| err.to_string())?;
    runtime
        .write_state(SetState {
            key,
            value: json!(derived.as_str()),
            source: SOURCE.to_string(),
            confidence: None,
            observed_at: runtime.now(),
            quiet: true,
        })
        .map_err(|err| err.to_string())?;
    if !initialized && derived == previous {
        // First derivation matching the default is a seed, not a transition.
        return Ok(());
    }

    runtime
        .emit_event(EmitEvent {
            event_type: EventType::WatchConditionChanged,
            severity: Severity::Info,
            source: SOURCE,
            correlation_id: None,
            incident_id: None,
            payload: json!({ "from": previous.as_str(), "to": derived.as_str() }),
        })
        .map_err(|err| err.to_string())?;

    let note = HandoverNote {
        from: previous,
        to: derived,
        apps: AppsSnapshot {
            ed_running,
            music_playing: read_bool_state(runtime, "music.playing"),
            sidecars: running_sidecars(runtime),
        },
        active_alarms: active_alarms(runtime),
        degraded_capabilities: degraded_names,
        at: runtime.now(),
    };
    let payload =
        serde_json::to_value(&note).map_err(|err| format!("handover encode: {err}"))?;
    runtime
        .emit_event(EmitEvent {
            event_type: EventType::HandoverNote,
            severity: Severity::Info,
            source: SOURCE,
            correlation_id: None,
            incident_id: None,
            payload,
        })
        .map_err(|err| err.to_string())?;
    Ok(())
}

/// Reads the raw maintained condition key.
fn read_condition_key(runtime: &Runtime) -> Option<WatchCondition> {
    let key = StateKey::parse("app.watch_condition").ok()?;
    let entry = runtime.store.get_state(&key).ok()??;
    entry.value.as_str().and_then(WatchCondition::parse)
}

/// Returns names of capabilities not currently available.
fn degraded_capabilities(runtime: &Runtime) -> Vec<String> {
    runtime
        .store
        .list_capabilities()
        .unwrap_or_default()
        .into_iter()
        .filter(|entry| entry.status != CapabilityStatus::Available)
        .map(|entry| entry.name)
        .collect()
}

/// Returns names of running sidecar apps.
fn running_sidecars(runtime: &Runtime) -> Vec<String> {
    runtime
        .config
        .supervisor
        .sidecars
        .keys()
        .filter(|name| read_bool_state(runtime, &format!("app.{name}.running")))
        .cloned()
        .collect()
}

/// Returns the latched hardware alarm names.
fn active_alarms(runtime: &Runtime) -> Vec<String> {
    StateKey::parse("hw.alarms")
        .ok()
        .and_then(|key| runtime.store.get_state(&key).ok().flatten())
        .and_then(|entry| serde_json::from_value(entry.value).ok())
        .unwrap_or_default()
}
