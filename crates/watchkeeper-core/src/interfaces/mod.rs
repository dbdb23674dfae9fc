// crates/watchkeeper-core/src/interfaces/mod.rs
// ============================================================================
// Module: Watchkeeper Interfaces
// Description: Backend-agnostic store capability traits.
// Purpose: Define the contract surfaces consumed by the pipeline, supervisor,
//          ingest gate, and HTTP layer.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Every component takes store capabilities at construction rather than
//! reaching for ambient singletons; the supervisor and the execution pipeline
//! never talk to each other directly, only through these seams.
//! Implementations must serialize writes (single-writer discipline) and fail
//! closed on invalid data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::bias::BiasEntry;
use crate::core::capability::CapabilityEntry;
use crate::core::doorbell::TwitchCategory;
use crate::core::events::EventDraft;
use crate::core::events::EventFilter;
use crate::core::events::EventRecord;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::RequestId;
use crate::core::intent::ActionRecord;
use crate::core::intent::FeedbackRecord;
use crate::core::intent::IntentRecord;
use crate::core::state::SetState;
use crate::core::state::StateEntry;
use crate::core::state::StateWriteOutcome;
use crate::core::statekey::StateKey;
use crate::core::time::UtcMillis;
use crate::core::twitch::RedeemCount;
use crate::core::twitch::TwitchEventRecord;
use crate::core::twitch::TwitchUserSummary;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Store capability errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Messages avoid embedding raw state payloads.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Storage engine error.
    #[error("store engine error: {0}")]
    Store(String),
    /// Stored data failed integrity checks.
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or arguments.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Event id already present in the append-only log.
    #[error("duplicate event id: {0}")]
    DuplicateEventId(String),
    /// Referenced record does not exist.
    #[error("store record not found: {0}")]
    NotFound(String),
    /// Store is unavailable; the caller may retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// SECTION: State Store
// ============================================================================

/// Latest-truth keyed state capability.
pub trait StateStore: Send + Sync {
    /// Returns the entry for a key, when present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn get_state(&self, key: &StateKey) -> Result<Option<StateEntry>, StoreError>;

    /// Upserts one state entry (last-write-wins by `observed_at`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn set_state(&self, request: SetState) -> Result<StateWriteOutcome, StoreError>;

    /// Upserts a batch of entries under one correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when any write fails; prior writes in the batch
    /// remain applied.
    fn batch_set_state(
        &self,
        items: Vec<SetState>,
        correlation_id: Option<CorrelationId>,
    ) -> Result<Vec<StateWriteOutcome>, StoreError>;

    /// Lists entries whose keys start with the dotted prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list_state(&self, prefix: &str) -> Result<Vec<StateEntry>, StoreError>;
}

// ============================================================================
// SECTION: Event Log
// ============================================================================

/// Append-only event log capability.
pub trait EventLog: Send + Sync {
    /// Appends an event and returns the committed record with its sequence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateEventId`] when the stable id exists.
    fn append_event(&self, draft: EventDraft) -> Result<EventRecord, StoreError>;

    /// Reads events matching the filter, ascending by sequence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn read_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, StoreError>;
}

// ============================================================================
// SECTION: Intent Log
// ============================================================================

/// Intent, action, and feedback capability.
pub trait IntentLog: Send + Sync {
    /// Stores an intent and its queued actions; idempotent by request id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn put_intent(&self, intent: IntentRecord) -> Result<(), StoreError>;

    /// Returns an intent by request id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn get_intent(&self, request_id: &RequestId) -> Result<Option<IntentRecord>, StoreError>;

    /// Lists action records for a request, in declared order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list_actions(&self, request_id: &RequestId) -> Result<Vec<ActionRecord>, StoreError>;

    /// Replaces one action record (keyed by request id and action id).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such action exists.
    fn update_action(&self, record: &ActionRecord) -> Result<(), StoreError>;

    /// Appends a feedback record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the request id is unknown.
    fn record_feedback(&self, feedback: FeedbackRecord) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Twitch Log
// ============================================================================

/// Stream-event log and cursor capability.
pub trait TwitchLog: Send + Sync {
    /// Appends a normalized stream-event record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn append_twitch_event(&self, record: TwitchEventRecord) -> Result<(), StoreError>;

    /// Returns the cursor marker for a category, when present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn twitch_cursor(&self, category: TwitchCategory) -> Result<Option<i64>, StoreError>;

    /// Advances the cursor for a category; rejects non-forward markers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when `marker` does not advance the
    /// stored cursor.
    fn advance_twitch_cursor(
        &self,
        category: TwitchCategory,
        marker: i64,
        at: UtcMillis,
    ) -> Result<(), StoreError>;

    /// Returns the most recent stream events, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn recent_twitch_events(&self, limit: u64) -> Result<Vec<TwitchEventRecord>, StoreError>;

    /// Returns the aggregate for one platform user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn twitch_user_summary(&self, user_id: &str) -> Result<Option<TwitchUserSummary>, StoreError>;

    /// Returns the most redeemed titles for one platform user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn twitch_top_redeems(
        &self,
        user_id: &str,
        limit: u64,
    ) -> Result<Vec<RedeemCount>, StoreError>;
}

// ============================================================================
// SECTION: Registries
// ============================================================================

/// Speech bias lexicon capability.
pub trait BiasLexicon: Send + Sync {
    /// Upserts a bias entry (unique by normalized phrase and mode).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn upsert_bias(&self, entry: BiasEntry) -> Result<(), StoreError>;

    /// Lists active entries, optionally scoped to a mode.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list_bias(&self, mode: Option<&str>) -> Result<Vec<BiasEntry>, StoreError>;
}

/// Capability health registry.
pub trait CapabilityRegistry: Send + Sync {
    /// Upserts a capability entry by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn set_capability(&self, entry: CapabilityEntry) -> Result<(), StoreError>;

    /// Lists all capability entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list_capabilities(&self) -> Result<Vec<CapabilityEntry>, StoreError>;
}
