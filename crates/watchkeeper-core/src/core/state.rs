// crates/watchkeeper-core/src/core/state.rs
// ============================================================================
// Module: Watchkeeper State Entries
// Description: Latest-truth state entries and write requests.
// Purpose: Model the canonical keyed store that every component reads.
// Dependencies: crate::core::{statekey, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! State entries carry the latest value per key with provenance. Upserts are
//! idempotent by key; last-write-wins by `observed_at`, ties broken by
//! `updated_at`. A write that materially changes the value produces a
//! `STATE_CHANGED` event unless the writer opts out for high-frequency
//! numeric deltas.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::statekey::StateKey;
use crate::core::time::UtcMillis;

// ============================================================================
// SECTION: State Entries
// ============================================================================

/// Latest-truth entry for one state key.
///
/// # Invariants
/// - `confidence`, when present, is in `[0, 1]`.
/// - `updated_at` is the store write time; `observed_at` is the source's claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Validated state key.
    pub key: StateKey,
    /// Latest JSON value.
    pub value: Value,
    /// Source tag of the last accepted write.
    pub source: String,
    /// Optional source confidence in `[0, 1]`.
    pub confidence: Option<f64>,
    /// Timestamp the source observed the value.
    pub observed_at: UtcMillis,
    /// Timestamp the store accepted the write.
    pub updated_at: UtcMillis,
}

/// Write request for one state key.
///
/// # Invariants
/// - `quiet` suppresses the `STATE_CHANGED` event for this write only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetState {
    /// Validated state key.
    pub key: StateKey,
    /// New JSON value.
    pub value: Value,
    /// Source tag for provenance.
    pub source: String,
    /// Optional source confidence in `[0, 1]`.
    pub confidence: Option<f64>,
    /// Timestamp the source observed the value.
    pub observed_at: UtcMillis,
    /// Suppress the change event for this write.
    #[serde(default)]
    pub quiet: bool,
}

/// Outcome of a state upsert.
///
/// # Invariants
/// - `changed` is true only when the stored value materially differs from the
///   prior value for the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateWriteOutcome {
    /// Whether the value materially changed.
    pub changed: bool,
    /// Whether the write was accepted (last-write-wins by `observed_at`).
    pub accepted: bool,
    /// The entry now stored for the key.
    pub entry: StateEntry,
}
