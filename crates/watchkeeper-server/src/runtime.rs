// crates/watchkeeper-server/src/runtime.rs
// ============================================================================
// Module: Watchkeeper Runtime Context
// Description: Shared wiring passed explicitly to every component.
// Purpose: Assemble the store, tool router, Standing Orders, bridge client,
//          and event emission helpers without ambient singletons.
// Dependencies: watchkeeper-core, watchkeeper-actuators, watchkeeper-store-sqlite,
//               rand, serde_json, tracing
// ============================================================================

//! ## Overview
//! The runtime context is constructed once at startup and handed to the HTTP
//! surface, execution pipeline, supervisor loops, and ingest gate. The
//! supervisor and pipeline never talk to each other — both read and write
//! through the store capabilities here. Event emission stamps the current
//! watch condition and a random stable event id at the boundary, keeping the
//! core clock- and randomness-free.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rand::RngCore;
use serde_json::Value;
use tracing::warn;
use watchkeeper_actuators::CommandKeySynth;
use watchkeeper_actuators::ForegroundProbe;
use watchkeeper_actuators::KeypressActuator;
use watchkeeper_actuators::MediaKeyActuator;
use watchkeeper_actuators::ParserActuator;
use watchkeeper_actuators::ParserOp;
use watchkeeper_actuators::ParserSupervisor;
use watchkeeper_actuators::ToolRouter;
use watchkeeper_actuators::WebhookEmitter;
use watchkeeper_core::CorrelationId;
use watchkeeper_core::EventDraft;
use watchkeeper_core::EventId;
use watchkeeper_core::EventLog;
use watchkeeper_core::EventRecord;
use watchkeeper_core::EventType;
use watchkeeper_core::IncidentId;
use watchkeeper_core::SafetyClass;
use watchkeeper_core::SetState;
use watchkeeper_core::Severity;
use watchkeeper_core::StateKey;
use watchkeeper_core::StateStore;
use watchkeeper_core::StateWriteOutcome;
use watchkeeper_core::StoreError;
use watchkeeper_core::UtcMillis;
use watchkeeper_core::WatchCondition;
use watchkeeper_store_sqlite::SqliteControlStore;

use crate::bridge::SammiBridge;
use crate::config::WatchkeeperConfig;

// ============================================================================
// SECTION: Runtime Context
// ============================================================================

/// Shared runtime context for all server components.
///
/// # Invariants
/// - Configuration is immutable after construction.
/// - All state mutations pass through the store.
pub struct Runtime {
    /// Immutable configuration.
    pub config: WatchkeeperConfig,
    /// Durable control store.
    pub store: Arc<SqliteControlStore>,
    /// Tool router with kill-switches applied.
    pub router: Arc<ToolRouter>,
    /// Parser lifecycle supervisor (single owner of the child).
    pub parser: Arc<ParserSupervisor>,
    /// SAMMI bridge client.
    pub bridge: Arc<SammiBridge>,
    /// Process start instant for uptime reporting.
    pub started_at: Instant,
}

impl Runtime {
    /// Assembles the runtime from configuration and an opened store.
    ///
    /// # Errors
    ///
    /// Returns a message when an actuator endpoint cannot be constructed.
    pub fn new(config: WatchkeeperConfig, store: Arc<SqliteControlStore>) -> Result<Self, String> {
        let parser = Arc::new(
            ParserSupervisor::new(config.parser.clone()).map_err(|err| err.to_string())?,
        );
        let bridge = Arc::new(SammiBridge::new(
            &config.twitch.bridge_url,
            config.twitch.bridge_timeout_ms,
        )?);
        let router = Arc::new(build_router(&config, &store, &parser, &bridge)?);
        Ok(Self {
            config,
            store,
            router,
            parser,
            bridge,
            started_at: Instant::now(),
        })
    }

    /// Returns the current wall clock.
    #[must_use]
    pub fn now(&self) -> UtcMillis {
        now_millis()
    }

    /// Returns the current watch condition from the store (standby fallback).
    #[must_use]
    pub fn watch_condition(&self) -> WatchCondition {
        self.read_condition().unwrap_or(WatchCondition::Standby)
    }

    /// Reads the maintained watch-condition state key.
    fn read_condition(&self) -> Option<WatchCondition> {
        let key = StateKey::parse("app.watch_condition").ok()?;
        let entry = self.store.get_state(&key).ok()??;
        entry.value.as_str().and_then(WatchCondition::parse)
    }

    /// Emits an event with a fresh stable id and the current condition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the append fails.
    pub fn emit_event(&self, params: EmitEvent) -> Result<EventRecord, StoreError> {
        let draft = EventDraft {
            event_id: EventId::new(format!("ev-{}", random_hex())),
            ts: self.now(),
            event_type: params.event_type,
            source: params.source.to_string(),
            session_id: None,
            correlation_id: params.correlation_id,
            incident_id: params.incident_id,
            watch_condition: self.watch_condition(),
            severity: params.severity,
            payload: params.payload,
            tags: Vec::new(),
        };
        self.store.append_event(draft)
    }

    /// Writes a state entry and emits `STATE_CHANGED` on material change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails; event emission failures
    /// are logged and swallowed.
    pub fn write_state(&self, request: SetState) -> Result<StateWriteOutcome, StoreError> {
        let quiet = request.quiet;
        let source = request.source.clone();
        let key = request.key.clone();
        let outcome = self.store.set_state(request)?;
        if outcome.changed && !quiet {
            let emitted = self.emit_event(EmitEvent {
                event_type: EventType::StateChanged,
                severity: Severity::Debug,
                source: &source,
                correlation_id: None,
                incident_id: None,
                payload: serde_json::json!({
                    "state_key": key.as_str(),
                    "value": outcome.entry.value,
                }),
            });
            if let Err(err) = emitted {
                warn!(key = key.as_str(), error = %err, "state change event append failed");
            }
        }
        Ok(outcome)
    }

    /// Mints a random confirm token string.
    #[must_use]
    pub fn mint_token(&self) -> String {
        random_hex()
    }

    /// Returns process uptime in whole seconds.
    #[must_use]
    pub fn uptime_sec(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Parameters for one event emission.
///
/// # Invariants
/// - `correlation_id` equals the incident id for pipeline-emitted events.
pub struct EmitEvent<'a> {
    /// Event type tag.
    pub event_type: EventType,
    /// Event severity.
    pub severity: Severity,
    /// Emitting component label.
    pub source: &'a str,
    /// Optional correlation identifier.
    pub correlation_id: Option<CorrelationId>,
    /// Optional incident identifier.
    pub incident_id: Option<IncidentId>,
    /// JSON payload.
    pub payload: Value,
}

// ============================================================================
// SECTION: Router Assembly
// ============================================================================

/// Store-backed foreground probe for the guarded keypress adapter.
struct StoreForegroundProbe {
    /// Store read capability.
    store: Arc<SqliteControlStore>,
}

impl ForegroundProbe for StoreForegroundProbe {
    fn foreground(&self) -> Option<String> {
        let key = StateKey::parse("app.foreground").ok()?;
        let entry = self.store.get_state(&key).ok()??;
        entry.value.as_str().map(ToString::to_string)
    }
}

/// Builds the closed tool registry from configuration.
fn build_router(
    config: &WatchkeeperConfig,
    store: &Arc<SqliteControlStore>,
    parser: &Arc<ParserSupervisor>,
    bridge: &Arc<SammiBridge>,
) -> Result<ToolRouter, String> {
    let lights =
        WebhookEmitter::new(&config.actuators.lights_url, config.actuators.lights_timeout_ms)?;
    let media = MediaKeyActuator::new(CommandKeySynth::new(config.actuators.key_commands.clone()));
    let keypress = KeypressActuator::new(
        CommandKeySynth::new(config.actuators.key_commands.clone()),
        StoreForegroundProbe {
            store: Arc::clone(store),
        },
        config.actuators.keypress_foreground_allowlist.clone(),
    );
    let chat = crate::bridge::BridgeChatActuator::new(Arc::clone(bridge));

    Ok(ToolRouter::builder()
        .switches(config.features.actuators_enabled, config.features.keypress_enabled)
        .tool("lights.scene", SafetyClass::LowRisk, Arc::new(lights))
        .tool("media.key", SafetyClass::LowRisk, Arc::new(media))
        .synthetic_input_tool("input.keypress", SafetyClass::HighRisk, Arc::new(keypress))
        .tool(
            "edparser.start",
            SafetyClass::LowRisk,
            Arc::new(ParserActuator::new(Arc::clone(parser), ParserOp::Start)),
        )
        .tool(
            "edparser.stop",
            SafetyClass::LowRisk,
            Arc::new(ParserActuator::new(Arc::clone(parser), ParserOp::Stop)),
        )
        .tool(
            "edparser.status",
            SafetyClass::ReadOnly,
            Arc::new(ParserActuator::new(Arc::clone(parser), ParserOp::Status)),
        )
        .tool("twitch.send_chat", SafetyClass::HighRisk, Arc::new(chat))
        .build())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the current wall clock as [`UtcMillis`].
#[must_use]
pub fn now_millis() -> UtcMillis {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0);
    UtcMillis::from_unix_millis(millis)
}

/// Returns 16 bytes of randomness as lowercase hex.
fn random_hex() -> String {
    let mut bytes = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(32);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
