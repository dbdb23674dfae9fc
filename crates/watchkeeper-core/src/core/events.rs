// crates/watchkeeper-core/src/core/events.rs
// ============================================================================
// Module: Watchkeeper Event Records
// Description: Append-only event records, severities, types, and filters.
// Purpose: Capture the globally ordered audit history of the control plane.
// Dependencies: crate::core::{condition, identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Events are the append-only ground truth for everything the control plane
//! observed or decided. Records are never rewritten; the store assigns a
//! monotonically increasing sequence at append time. Correlation ids join
//! events to the incident that produced them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::condition::WatchCondition;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::IncidentId;
use crate::core::identifiers::SessionId;
use crate::core::time::UtcMillis;

// ============================================================================
// SECTION: Severity
// ============================================================================

/// Event severity levels.
///
/// # Invariants
/// - Variants are stable for serialization and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Diagnostic detail.
    Debug,
    /// Normal operational signal.
    Info,
    /// Unexpected but recoverable condition.
    Warn,
    /// Failure requiring operator attention.
    Error,
}

impl Severity {
    /// Returns the stable wire label for the severity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

// ============================================================================
// SECTION: Event Types
// ============================================================================

/// Closed event type tags emitted by the control plane.
///
/// # Invariants
/// - Variants are stable for serialization and log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A state entry materially changed value.
    StateChanged,
    /// The policy engine rendered a per-action decision.
    PolicyDecision,
    /// An approved action finished dispatch.
    ActionExecuted,
    /// An action was denied by policy or routing.
    ActionDenied,
    /// The game process started.
    EdStarted,
    /// The game process stopped.
    EdStopped,
    /// A hardware metric crossed its configured threshold.
    HardwareThreshold,
    /// The now-playing track changed.
    TrackChanged,
    /// Music playback started.
    MusicStarted,
    /// Music playback stopped.
    MusicStopped,
    /// The derived watch condition transitioned.
    WatchConditionChanged,
    /// Structured operational summary at a condition transition.
    HandoverNote,
    /// A doorbell-triggered stream event was ingested.
    TwitchEvent,
    /// A capability changed status.
    CapabilityChanged,
}

impl EventType {
    /// Returns the stable wire label for the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StateChanged => "STATE_CHANGED",
            Self::PolicyDecision => "POLICY_DECISION",
            Self::ActionExecuted => "ACTION_EXECUTED",
            Self::ActionDenied => "ACTION_DENIED",
            Self::EdStarted => "ED_STARTED",
            Self::EdStopped => "ED_STOPPED",
            Self::HardwareThreshold => "HARDWARE_THRESHOLD",
            Self::TrackChanged => "TRACK_CHANGED",
            Self::MusicStarted => "MUSIC_STARTED",
            Self::MusicStopped => "MUSIC_STOPPED",
            Self::WatchConditionChanged => "WATCH_CONDITION_CHANGED",
            Self::HandoverNote => "HANDOVER_NOTE",
            Self::TwitchEvent => "TWITCH_EVENT",
            Self::CapabilityChanged => "CAPABILITY_CHANGED",
        }
    }

    /// Parses a stable wire label into an event type.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "STATE_CHANGED" => Some(Self::StateChanged),
            "POLICY_DECISION" => Some(Self::PolicyDecision),
            "ACTION_EXECUTED" => Some(Self::ActionExecuted),
            "ACTION_DENIED" => Some(Self::ActionDenied),
            "ED_STARTED" => Some(Self::EdStarted),
            "ED_STOPPED" => Some(Self::EdStopped),
            "HARDWARE_THRESHOLD" => Some(Self::HardwareThreshold),
            "TRACK_CHANGED" => Some(Self::TrackChanged),
            "MUSIC_STARTED" => Some(Self::MusicStarted),
            "MUSIC_STOPPED" => Some(Self::MusicStopped),
            "WATCH_CONDITION_CHANGED" => Some(Self::WatchConditionChanged),
            "HANDOVER_NOTE" => Some(Self::HandoverNote),
            "TWITCH_EVENT" => Some(Self::TwitchEvent),
            "CAPABILITY_CHANGED" => Some(Self::CapabilityChanged),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Event Records
// ============================================================================

/// Event submitted for append; the store assigns the sequence.
///
/// # Invariants
/// - `event_id` is globally unique; the store rejects duplicates.
/// - `correlation_id` equals the incident id for pipeline-emitted events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Stable unique event identifier.
    pub event_id: EventId,
    /// UTC timestamp at emission.
    pub ts: UtcMillis,
    /// Event type tag.
    pub event_type: EventType,
    /// Component or adapter that emitted the event.
    pub source: String,
    /// Optional assist session identifier.
    pub session_id: Option<SessionId>,
    /// Optional correlation identifier for log joins.
    pub correlation_id: Option<CorrelationId>,
    /// Optional incident identifier.
    pub incident_id: Option<IncidentId>,
    /// Watch condition at emission.
    pub watch_condition: WatchCondition,
    /// Event severity.
    pub severity: Severity,
    /// Arbitrary JSON payload.
    pub payload: Value,
    /// Optional free-form tags.
    pub tags: Vec<String>,
}

/// Committed event record with its store-assigned sequence.
///
/// # Invariants
/// - `seq` is strictly increasing across the whole log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Store-assigned monotonic sequence.
    pub seq: u64,
    /// Submitted event content.
    #[serde(flatten)]
    pub draft: EventDraft,
}

// ============================================================================
// SECTION: Filters
// ============================================================================

/// Filter for event log reads.
///
/// # Invariants
/// - `limit` of zero returns an empty page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Maximum number of records to return.
    pub limit: Option<u64>,
    /// Only return records with sequence strictly greater than this value.
    pub since_seq: Option<u64>,
    /// Only return records with this correlation id.
    pub correlation_id: Option<CorrelationId>,
    /// Only return records with this event type.
    pub event_type: Option<EventType>,
}
