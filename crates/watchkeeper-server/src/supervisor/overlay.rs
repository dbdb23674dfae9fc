// crates/watchkeeper-server/src/supervisor/overlay.rs
// ============================================================================
// Module: Overlay Variable Bridge Loop
// Description: Mirror selected state keys to the stream-overlay bridge.
// Purpose: Diff against the last-sent snapshot, push changed variables under
//          a per-cycle cap, and pulse a new-write marker on meaningful change.
// Dependencies: watchkeeper-core, tokio, serde_json, tracing
// ============================================================================

//! ## Overview
//! The overlay mirror runs only while enabled and gated by `ed.running`. Each
//! cycle diffs the configured keys against the last values actually sent;
//! only changed variables are pushed, at most `max_updates_per_cycle`, each
//! under the bridge's short timeout. The new-write marker pulses once per
//! cycle when any non-noisy key changed — never on every write. Bridge calls
//! run on the blocking pool.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;
use watchkeeper_core::StateKey;
use watchkeeper_core::StateStore;

use crate::runtime::Runtime;
use crate::supervisor::read_bool_state;
use crate::supervisor::tick;

// ============================================================================
// SECTION: Loop
// ============================================================================

/// Runs the overlay bridge loop until shutdown.
pub async fn run(runtime: Arc<Runtime>, mut shutdown: watch::Receiver<bool>) {
    if !runtime.config.overlay.enabled {
        return;
    }
    let cadence_ms = runtime.config.supervisor.active_cadence_ms;
    let mut last_sent: BTreeMap<String, Value> = BTreeMap::new();
    loop {
        if !tick(&mut shutdown, cadence_ms).await {
            return;
        }
        if !read_bool_state(&runtime, "ed.running") {
            continue;
        }
        let runtime_for_cycle = Arc::clone(&runtime);
        let snapshot = last_sent.clone();
        let cycled =
            tokio::task::spawn_blocking(move || cycle(&runtime_for_cycle, snapshot)).await;
        match cycled {
            Ok(updated) => last_sent = updated,
            Err(err) => warn!(error = %err, "overlay cycle join failed"),
        }
    }
}

/// Pushes one cycle of changed variables; returns the updated snapshot.
fn cycle(runtime: &Runtime, mut last_sent: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let overlay = &runtime.config.overlay;
    let mut pushed = 0_usize;
    let mut meaningful_change = false;

    for key_name in &overlay.keys {
        if pushed >= overlay.max_updates_per_cycle {
            // Remaining diffs wait for the next cycle.
            break;
        }
        let Ok(key) = StateKey::parse(key_name) else {
            continue;
        };
        let Ok(Some(entry)) = runtime.store.get_state(&key) else {
            continue;
        };
        if last_sent.get(key_name) == Some(&entry.value) {
            continue;
        }
        let variable = runtime
            .config
            .variable_index
            .overlay_variables
            .get(key_name)
            .cloned()
            .unwrap_or_else(|| key_name.replace('.', "_"));
        match runtime.bridge.set_variable(&variable, &entry.value) {
            Ok(()) => {
                pushed += 1;
                if !overlay.noisy_keys.contains(key_name) {
                    meaningful_change = true;
                }
                last_sent.insert(key_name.clone(), entry.value);
            }
            Err(err) => {
                warn!(key = key_name.as_str(), error = %err, "overlay push failed");
                // Leave the key out of the snapshot so it retries next cycle.
            }
        }
    }

    if meaningful_change
        && let Some(button) = &overlay.pulse_button
        && let Err(err) = runtime.bridge.trigger_button(button)
    {
        warn!(error = %err, "overlay pulse failed");
    }
    last_sent
}
