// crates/watchkeeper-core/src/core/twitch.rs
// ============================================================================
// Module: Watchkeeper Twitch Records
// Description: Normalized stream-event records and per-category cursors.
// Purpose: Model doorbell-ingested events and the monotonic dedupe cursor.
// Dependencies: crate::core::{doorbell, identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Each accepted doorbell produces one normalized event record; dedupe is by
//! the per-category commit marker, which only advances forward. Records carry
//! the user identity fields needed for per-user rollups without scanning raw
//! payloads.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::doorbell::TwitchCategory;
use crate::core::identifiers::EventId;
use crate::core::time::UtcMillis;

// ============================================================================
// SECTION: Event Records
// ============================================================================

/// Normalized stream-event record.
///
/// # Invariants
/// - `marker` equals the commit marker that advanced the category cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwitchEventRecord {
    /// Stable unique event identifier.
    pub event_id: EventId,
    /// Event category.
    pub category: TwitchCategory,
    /// Receipt time.
    pub received_at: UtcMillis,
    /// Commit marker that accepted this event.
    pub marker: i64,
    /// Platform user identifier, when present in the payload.
    pub user_id: Option<String>,
    /// Platform user login, when present in the payload.
    pub user_login: Option<String>,
    /// Redeem title for `REDEEM` events.
    pub redeem_title: Option<String>,
    /// Normalized bridge variables payload.
    pub payload: Value,
}

// ============================================================================
// SECTION: Cursors
// ============================================================================

/// Per-category monotonic ingest cursor.
///
/// # Invariants
/// - `marker` only advances forward for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwitchCursor {
    /// Cursor category.
    pub category: TwitchCategory,
    /// Highest accepted commit marker.
    pub marker: i64,
    /// Time of the last advance.
    pub advanced_at: UtcMillis,
}

// ============================================================================
// SECTION: Rollups
// ============================================================================

/// Per-user aggregate over the stream-event log.
///
/// # Invariants
/// - Counts cover the whole retained log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwitchUserSummary {
    /// Platform user identifier.
    pub user_id: String,
    /// Most recent login seen for the user.
    pub user_login: Option<String>,
    /// Total events attributed to the user.
    pub event_count: u64,
    /// Events per category label.
    pub by_category: Vec<CategoryCount>,
    /// Time of the most recent event.
    pub last_seen: Option<UtcMillis>,
}

/// Count of events for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    /// Category label.
    pub category: TwitchCategory,
    /// Event count.
    pub count: u64,
}

/// Redeem frequency entry for per-user rollups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemCount {
    /// Redeem title.
    pub title: String,
    /// Redemption count.
    pub count: u64,
}
