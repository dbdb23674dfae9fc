// crates/watchkeeper-core/src/core/sitrep.rs
// ============================================================================
// Module: Watchkeeper Situation Reports
// Description: Handover note and sitrep aggregate payloads.
// Purpose: Summarize the operational picture at condition transitions and on
//          operator request.
// Dependencies: crate::core::{capability, condition, time}, serde
// ============================================================================

//! ## Overview
//! A handover note is emitted exactly once per watch-condition transition and
//! summarizes running apps, latched alarms, and degraded capabilities. The
//! sitrep is the on-demand aggregate served over HTTP.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::capability::CapabilityEntry;
use crate::core::condition::WatchCondition;
use crate::core::time::UtcMillis;

// ============================================================================
// SECTION: Handover Notes
// ============================================================================

/// Snapshot of running applications at a transition.
///
/// # Invariants
/// - Fields are point-in-time reads of the corresponding state keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppsSnapshot {
    /// Whether the game is running.
    pub ed_running: bool,
    /// Whether music playback is active.
    pub music_playing: bool,
    /// Names of running sidecar processes.
    pub sidecars: Vec<String>,
}

/// Structured payload of a `HANDOVER_NOTE` event.
///
/// # Invariants
/// - `to` equals the condition carried by the paired
///   `WATCH_CONDITION_CHANGED` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoverNote {
    /// Condition before the transition.
    pub from: WatchCondition,
    /// Condition after the transition.
    pub to: WatchCondition,
    /// Running applications at the transition.
    pub apps: AppsSnapshot,
    /// Hardware alarms currently latched.
    pub active_alarms: Vec<String>,
    /// Names of degraded or unavailable capabilities.
    pub degraded_capabilities: Vec<String>,
    /// Transition time.
    pub at: UtcMillis,
}

// ============================================================================
// SECTION: Sitrep
// ============================================================================

/// On-demand operational aggregate.
///
/// # Invariants
/// - `handover` is the most recent note, when any transition has occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sitrep {
    /// Current watch condition.
    pub watch_condition: WatchCondition,
    /// Most recent handover note.
    pub handover: Option<HandoverNote>,
    /// Capability health table.
    pub capabilities: Vec<CapabilityEntry>,
    /// Process uptime in seconds.
    pub uptime_sec: u64,
    /// Report time.
    pub at: UtcMillis,
}
