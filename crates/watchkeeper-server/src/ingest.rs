// crates/watchkeeper-server/src/ingest.rs
// ============================================================================
// Module: Twitch Ingest Gate
// Description: UDP doorbell listener with gated bind lifecycle.
// Purpose: Bind only while `app.sammi.running` is true, dedupe by the
//          monotonic commit marker, and normalize events via the bridge.
// Dependencies: watchkeeper-core, tokio, serde_json, tracing
// ============================================================================

//! ## Overview
//! No bridge running means no socket bound and no ingest: the gate task owns
//! the bind/unbind transitions, re-checking the gating key every interval so
//! the socket state matches the key at each observation point. Packets parse
//! in either doorbell form; malformed tokens drop silently (debug log only).
//! Dedupe is single-pass: the configured marker variable wins over the packet
//! timestamp, a non-advancing marker drops the packet, and the cursor moves
//! only after the event row is written.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;
use watchkeeper_core::CapabilityEntry;
use watchkeeper_core::CapabilityRegistry;
use watchkeeper_core::CapabilityStatus;
use watchkeeper_core::DoorbellToken;
use watchkeeper_core::EventId;
use watchkeeper_core::EventType;
use watchkeeper_core::Severity;
use watchkeeper_core::TwitchCategory;
use watchkeeper_core::TwitchEventRecord;
use watchkeeper_core::TwitchLog;

use crate::config::CategoryVars;
use crate::runtime::EmitEvent;
use crate::runtime::Runtime;
use crate::supervisor::read_bool_state;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Event source label for ingest emissions.
const SOURCE: &str = "ingest.twitch";
/// Gating state key controlling the bind lifecycle.
const GATING_KEY: &str = "app.sammi.running";
/// Capability name maintained by this task.
const CAPABILITY: &str = "sammi_bridge";
/// Gating re-check interval in milliseconds.
const GATE_POLL_MS: u64 = 500;
/// Maximum doorbell datagram size.
const MAX_DATAGRAM: usize = 256;

// ============================================================================
// SECTION: Gate Task
// ============================================================================

/// Runs the ingest gate until shutdown.
pub async fn run(runtime: Arc<Runtime>, mut shutdown: watch::Receiver<bool>) {
    if !runtime.config.features.twitch_udp_enabled {
        return;
    }
    let mut socket: Option<UdpSocket> = None;
    let mut debounce: HashMap<TwitchCategory, Instant> = HashMap::new();
    let mut buffer = [0_u8; MAX_DATAGRAM];

    loop {
        if *shutdown.borrow() {
            return;
        }
        let gated_on = read_bool_state(&runtime, GATING_KEY);
        if gated_on && socket.is_none() {
            match UdpSocket::bind(&runtime.config.twitch.udp_bind_addr).await {
                Ok(bound) => {
                    info!(addr = runtime.config.twitch.udp_bind_addr.as_str(), "doorbell bound");
                    socket = Some(bound);
                }
                Err(err) => {
                    warn!(error = %err, "doorbell bind failed");
                }
            }
        } else if !gated_on && socket.is_some() {
            info!("doorbell unbound");
            socket = None;
        }

        let Some(bound) = &socket else {
            // Unbound: idle until the gating key flips.
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(GATE_POLL_MS)) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        };

        tokio::select! {
            received = tokio::time::timeout(
                Duration::from_millis(GATE_POLL_MS),
                bound.recv_from(&mut buffer),
            ) => {
                match received {
                    Err(_) => {} // re-check the gate
                    Ok(Err(err)) => warn!(error = %err, "doorbell recv failed"),
                    Ok(Ok((length, _peer))) => {
                        let datagram = String::from_utf8_lossy(&buffer[..length]).into_owned();
                        handle_datagram(&runtime, &datagram, &mut debounce).await;
                    }
                }
            }
            _ = shutdown.changed() => {}
        }
    }
}

// ============================================================================
// SECTION: Packet Handling
// ============================================================================

/// Parses, debounces, dedupes, and ingests one doorbell datagram.
async fn handle_datagram(
    runtime: &Arc<Runtime>,
    datagram: &str,
    debounce: &mut HashMap<TwitchCategory, Instant>,
) {
    let token = match DoorbellToken::parse(datagram) {
        Ok(token) => token,
        Err(err) => {
            // Malformed tokens drop silently.
            debug!(error = %err, "doorbell malformed");
            return;
        }
    };
    let vars = category_vars(runtime, token.category);

    if vars.debounce_ms > 0
        && let Some(last) = debounce.get(&token.category)
        && last.elapsed() < Duration::from_millis(vars.debounce_ms)
    {
        debug!(category = token.category.as_str(), "doorbell debounced");
        return;
    }
    debounce.insert(token.category, Instant::now());

    let runtime_for_ingest = Arc::clone(runtime);
    let ingested =
        tokio::task::spawn_blocking(move || ingest(&runtime_for_ingest, token, &vars)).await;
    match ingested {
        Ok(Ok(())) => {}
        Ok(Err(detail)) => debug!(detail = %detail, "doorbell dropped"),
        Err(err) => warn!(error = %err, "doorbell ingest join failed"),
    }
}

/// Resolves configured ingest settings for a category.
fn category_vars(runtime: &Runtime, category: TwitchCategory) -> CategoryVars {
    runtime
        .config
        .variable_index
        .categories
        .get(category.as_str())
        .cloned()
        .unwrap_or_default()
}

/// Performs the blocking half of one ingest: marker check, bridge fetch,
/// record write, cursor advance.
fn ingest(
    runtime: &Runtime,
    token: DoorbellToken,
    vars: &CategoryVars,
) -> Result<(), String> {
    // When a marker variable is configured it wins over the packet
    // timestamp; single pass, no retry.
    let marker = match &vars.marker_variable {
        None => token.timestamp_ms,
        Some(variable) => match runtime.bridge.get_variable(variable) {
            Ok(value) => value.as_i64().unwrap_or(token.timestamp_ms),
            Err(err) => {
                mark_capability(runtime, CapabilityStatus::Degraded, Some(err.to_string()));
                return Err(format!("marker fetch failed: {err}"));
            }
        },
    };
    let cursor = runtime.store.twitch_cursor(token.category).map_err(|err| err.to_string())?;
    if let Some(cursor) = cursor
        && marker <= cursor
    {
        return Err(format!("duplicate marker {marker} <= {cursor}"));
    }

    let mut payload = Map::new();
    for variable in &vars.variables {
        match runtime.bridge.get_variable(variable) {
            Ok(value) => {
                payload.insert(variable.clone(), value);
            }
            Err(err) => {
                mark_capability(runtime, CapabilityStatus::Degraded, Some(err.to_string()));
                return Err(format!("variable fetch failed: {err}"));
            }
        }
    }
    mark_capability(runtime, CapabilityStatus::Available, None);
    if let Some(seq) = token.seq {
        payload.insert("doorbell_seq".to_string(), json!(seq));
    }
    let payload = Value::Object(payload);

    let received_at = runtime.now();
    let record = TwitchEventRecord {
        event_id: EventId::new(format!("tw-{}-{marker}", token.category.as_str().to_lowercase())),
        category: token.category,
        received_at,
        marker,
        user_id: string_field(&payload, "user_id"),
        user_login: string_field(&payload, "user_login"),
        redeem_title: string_field(&payload, "redeem_title"),
        payload: payload.clone(),
    };
    runtime.store.append_twitch_event(record).map_err(|err| err.to_string())?;
    runtime
        .store
        .advance_twitch_cursor(token.category, marker, received_at)
        .map_err(|err| err.to_string())?;
    runtime
        .emit_event(EmitEvent {
            event_type: EventType::TwitchEvent,
            severity: Severity::Info,
            source: SOURCE,
            correlation_id: None,
            incident_id: None,
            payload: json!({
                "category": token.category.as_str(),
                "marker": marker,
                "variables": payload,
            }),
        })
        .map_err(|err| err.to_string())?;
    Ok(())
}

/// Extracts an optional string field from the normalized payload.
fn string_field(payload: &Value, field: &str) -> Option<String> {
    payload.get(field).and_then(Value::as_str).map(ToString::to_string)
}

/// Updates the bridge capability entry.
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
