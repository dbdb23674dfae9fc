// crates/watchkeeper-server/src/supervisor/hardware.rs
// ============================================================================
// Module: Hardware Probe Loop
// Description: CPU/memory sampling with edge-triggered threshold alarms.
// Purpose: Publish `hw.*` state keys and latch `HARDWARE_THRESHOLD` alarms
//          with hysteresis.
// Dependencies: watchkeeper-core, serde, serde_json, tokio, tracing
// ============================================================================

//! ## Overview
//! The hardware prober writes a JSON snapshot of CPU and memory percentages;
//! this loop publishes them quiet (they change every sample) and fires one
//! `HARDWARE_THRESHOLD` event per crossing. An alarm re-arms only after the
//! metric returns under `threshold - hysteresis`, so a value oscillating on
//! the threshold cannot flood the log. Latched alarm names are mirrored to
//! `hw.alarms` for handover notes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::warn;
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

/// Event source label for hardware emissions.
const SOURCE: &str = "supervisor.hardware";

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Hardware probe snapshot document (consumed).
#[derive(Debug, Clone, Copy, Deserialize)]
struct HardwareSnapshot {
    /// CPU utilization percent.
    cpu_pct: f64,
    /// Memory utilization percent.
    mem_pct: f64,
}

// ============================================================================
// SECTION: Loop
// ============================================================================

/// Runs the hardware probe loop until shutdown.
pub async fn run(runtime: Arc<Runtime>, mut shutdown: watch::Receiver<bool>) {
    let cadence_ms = runtime.config.supervisor.idle_cadence_ms;
    let mut latched: BTreeSet<String> = BTreeSet::new();
    loop {
        if !tick(&mut shutdown, cadence_ms).await {
            return;
        }
        if let Err(detail) = sample(&runtime, &mut latched) {
            warn!(detail = %detail, "hardware sample failed");
        }
    }
}

/// Samples the snapshot, publishes metrics, and manages alarm latches.
fn sample(runtime: &Runtime, latched: &mut BTreeSet<String>) -> Result<(), String> {
    let path = &runtime.config.supervisor.hardware_path;
    let raw = std::fs::read_to_string(path).map_err(|err| err.to_string())?;
    let snapshot: HardwareSnapshot = serde_json::from_str(&raw).map_err(|err| err.to_string())?;
    let observed_at = runtime.now();

    write_metric(runtime, "hw.cpu.pct", snapshot.cpu_pct, observed_at)?;
    write_metric(runtime, "hw.mem.pct", snapshot.mem_pct, observed_at)?;

    let config = &runtime.config.supervisor;
    update_alarm(runtime, latched, "cpu", snapshot.cpu_pct, config.cpu_warn_pct)?;
    update_alarm(runtime, latched, "mem", snapshot.mem_pct, config.mem_warn_pct)?;

    let alarms: Vec<String> = latched.iter().cloned().collect();
    let key = StateKey::parse("hw.alarms").map_err(|err| err.to_string())?;
    runtime
        .write_state(SetState {
            key,
            value: json!(alarms),
            source: SOURCE.to_string(),
            confidence: None,
            observed_at,
            quiet: true,
        })
        .map_err(|err| err.to_string())?;
    Ok(())
}

/// Writes one quiet metric state key.
fn write_metric(
    runtime: &Runtime,
    key: &str,
    value: f64,
    observed_at: watchkeeper_core::UtcMillis,
) -> Result<(), String> {
    let key = StateKey::parse(key).map_err(|err| err.to_string())?;
    runtime
        .write_state(SetState {
            key,
            value: json!(value),
            source: SOURCE.to_string(),
            confidence: None,
            observed_at,
            quiet: true,
        })
        .map_err(|err| err.to_string())?;
    Ok(())
}

/// Latches or re-arms one alarm, emitting on the rising edge only.
fn update_alarm(
    runtime: &Runtime,
    latched: &mut BTreeSet<String>,
    name: &str,
    value: f64,
    threshold: f64,
) -> Result<(), String> {
    let hysteresis = runtime.config.supervisor.hysteresis_pct;
    if value >= threshold && !latched.contains(name) {
        latched.insert(name.to_string());
        runtime
            .emit_event(EmitEvent {
                event_type: EventType::HardwareThreshold,
                severity: Severity::Warn,
                source: SOURCE,
                correlation_id: None,
                incident_id: None,
                payload: json!({ "metric": name, "value": value, "threshold": threshold }),
            })
            .map_err(|err| err.to_string())?;
    } else if value < threshold - hysteresis {
        latched.remove(name);
    }
    Ok(())
}
