// crates/watchkeeper-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Control Store
// Description: Durable latest-truth state, append-only event log, and audit
//              tables backed by SQLite WAL.
// Purpose: Implement the core store capability traits with a single-writer
//          discipline and crash-safe journaling.
// Dependencies: watchkeeper-core, rusqlite, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! This module implements every store capability over one `SQLite` file. All
//! writes are serialized through a mutex-guarded connection and committed in
//! transactions; reads use a small round-robin pool of read-only connections
//! under WAL so they are not serialized against each other. The event log
//! assigns its monotonic sequence inside the write transaction, and committed
//! events fan out on a broadcast channel for live subscribers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use watchkeeper_core::BiasEntry;
use watchkeeper_core::BiasLexicon;
use watchkeeper_core::CapabilityEntry;
use watchkeeper_core::CapabilityRegistry;
use watchkeeper_core::CapabilityStatus;
use watchkeeper_core::CategoryCount;
use watchkeeper_core::CorrelationId;
use watchkeeper_core::EventDraft;
use watchkeeper_core::EventFilter;
use watchkeeper_core::EventId;
use watchkeeper_core::EventLog;
use watchkeeper_core::EventRecord;
use watchkeeper_core::EventType;
use watchkeeper_core::FeedbackRecord;
use watchkeeper_core::IntentLog;
use watchkeeper_core::IntentRecord;
use watchkeeper_core::RedeemCount;
use watchkeeper_core::RequestId;
use watchkeeper_core::SetState;
use watchkeeper_core::Severity;
use watchkeeper_core::StateEntry;
use watchkeeper_core::StateKey;
use watchkeeper_core::StateStore;
use watchkeeper_core::StateWriteOutcome;
use watchkeeper_core::StoreError;
use watchkeeper_core::TwitchCategory;
use watchkeeper_core::TwitchEventRecord;
use watchkeeper_core::TwitchLog;
use watchkeeper_core::TwitchUserSummary;
use watchkeeper_core::UtcMillis;
use watchkeeper_core::ActionRecord;
use watchkeeper_core::WatchCondition;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default read-connection pool size.
const DEFAULT_READ_POOL_SIZE: usize = 2;
/// Default broadcast capacity for live event subscribers.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` control store.
///
/// # Invariants
/// - `path` points at a file, never a directory.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Store file path.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// Synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Read-connection pool size.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
    /// Broadcast capacity for live event subscribers.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

/// Returns the default busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default read pool size.
const fn default_read_pool_size() -> usize {
    DEFAULT_READ_POOL_SIZE
}

/// Returns the default event channel capacity.
const fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding raw state or event payloads.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored data failed to decode.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or arguments.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Stable event id already present.
    #[error("sqlite store duplicate event id: {0}")]
    DuplicateEventId(String),
    /// Referenced record does not exist.
    #[error("sqlite store record not found: {0}")]
    NotFound(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::DuplicateEventId(id) => Self::DuplicateEventId(id),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
        }
    }
}

// ============================================================================
// SECTION: Diagnostics
// ============================================================================

/// Row counts and log position for store diagnostics.
///
/// # Invariants
/// - Values are a point-in-time snapshot from one read connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    /// Rows in `state_entries`.
    pub state_entries: u64,
    /// Rows in `event_log`.
    pub events: u64,
    /// Rows in `intent_log`.
    pub intents: u64,
    /// Rows in `action_log`.
    pub actions: u64,
    /// Rows in `feedback_log`.
    pub feedback: u64,
    /// Rows in `twitch_events`.
    pub twitch_events: u64,
    /// Highest assigned event sequence, when any exists.
    pub last_event_seq: Option<u64>,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed control store with WAL support.
///
/// # Invariants
/// - All mutations pass through the mutex-guarded write connection.
/// - Event sequences are assigned inside the write transaction and are
///   strictly increasing.
#[derive(Clone)]
pub struct SqliteControlStore {
    /// Shared writer connection guarded by a mutex.
    write_connection: Arc<Mutex<Connection>>,
    /// Read-only connection pool used for read path isolation under WAL.
    read_connections: Arc<Vec<Mutex<Connection>>>,
    /// Round-robin cursor for read connection selection.
    read_cursor: Arc<AtomicUsize>,
    /// Broadcast channel for committed events.
    events_tx: broadcast::Sender<EventRecord>,
}

impl SqliteControlStore {
    /// Opens or creates the store at the configured path.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on I/O failures, engine errors, or schema
    /// version mismatches.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config, false)?;
        initialize_schema(&mut connection)?;

        let pool_size = config.read_pool_size.max(1);
        let mut read_connections = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            read_connections.push(Mutex::new(open_connection(config, true)?));
        }

        let (events_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Ok(Self {
            write_connection: Arc::new(Mutex::new(connection)),
            read_connections: Arc::new(read_connections),
            read_cursor: Arc::new(AtomicUsize::new(0)),
            events_tx,
        })
    }

    /// Subscribes to committed events.
    ///
    /// A lagging subscriber misses events rather than blocking the writer.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events_tx.subscribe()
    }

    /// Returns row counts and the current log position.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the read fails.
    pub fn counts(&self) -> Result<StoreCounts, SqliteStoreError> {
        let connection = self.read_connection()?;
        let count = |table: &str| -> Result<u64, SqliteStoreError> {
            let value: i64 = connection
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), params![], |row| row.get(0))
                .map_err(db_error)?;
            u64::try_from(value).map_err(|_| SqliteStoreError::Corrupt("negative count".into()))
        };
        let last_event_seq: Option<i64> = connection
            .query_row("SELECT MAX(seq) FROM event_log", params![], |row| row.get(0))
            .map_err(db_error)?;
        Ok(StoreCounts {
            state_entries: count("state_entries")?,
            events: count("event_log")?,
            intents: count("intent_log")?,
            actions: count("action_log")?,
            feedback: count("feedback_log")?,
            twitch_events: count("twitch_events")?,
            last_event_seq: last_event_seq.and_then(|value| u64::try_from(value).ok()),
        })
    }

    /// Locks the write connection.
    fn write_connection(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.write_connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("write connection poisoned".to_string()))
    }

    /// Locks the next read connection in round-robin order.
    fn read_connection(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % self.read_connections.len();
        self.read_connections[index]
            .lock()
            .map_err(|_| SqliteStoreError::Db("read connection poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: State Store
// ============================================================================

impl StateStore for SqliteControlStore {
    fn get_state(&self, key: &StateKey) -> Result<Option<StateEntry>, StoreError> {
        let connection = self.read_connection()?;
        let row = connection
            .query_row(
                "SELECT key, value_json, source, confidence, observed_at, updated_at
                 FROM state_entries WHERE key = ?1",
                params![key.as_str()],
                state_entry_from_row,
            )
            .optional()
            .map_err(db_error)?;
        row.transpose().map_err(StoreError::from)
    }

    fn set_state(&self, request: SetState) -> Result<StateWriteOutcome, StoreError> {
        let mut connection = self.write_connection()?;
        let tx = connection.transaction().map_err(db_error)?;
        let outcome = apply_set_state(&tx, request)?;
        tx.commit().map_err(db_error)?;
        Ok(outcome)
    }

    fn batch_set_state(
        &self,
        items: Vec<SetState>,
        _correlation_id: Option<CorrelationId>,
    ) -> Result<Vec<StateWriteOutcome>, StoreError> {
        let mut connection = self.write_connection()?;
        let tx = connection.transaction().map_err(db_error)?;
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            outcomes.push(apply_set_state(&tx, item)?);
        }
        tx.commit().map_err(db_error)?;
        Ok(outcomes)
    }

    fn list_state(&self, prefix: &str) -> Result<Vec<StateEntry>, StoreError> {
        let connection = self.read_connection()?;
        let mut statement = connection
            .prepare(
                "SELECT key, value_json, source, confidence, observed_at, updated_at
                 FROM state_entries
                 WHERE ?1 = '' OR substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )
            .map_err(db_error)?;
        let rows = statement
            .query_map(params![prefix], state_entry_from_row)
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = row?;
            if prefix.is_empty() || entry.key.as_str() == prefix || entry.key.has_prefix(prefix) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

/// Applies one state upsert inside an open transaction.
fn apply_set_state(
    tx: &Transaction<'_>,
    request: SetState,
) -> Result<StateWriteOutcome, SqliteStoreError> {
    let existing = tx
        .query_row(
            "SELECT key, value_json, source, confidence, observed_at, updated_at
             FROM state_entries WHERE key = ?1",
            params![request.key.as_str()],
            state_entry_from_row,
        )
        .optional()
        .map_err(db_error)?
        .transpose()?;

    if let Some(existing) = &existing
        && existing.observed_at > request.observed_at
    {
        return Ok(StateWriteOutcome {
            changed: false,
            accepted: false,
            entry: existing.clone(),
        });
    }

    let changed = existing.as_ref().is_none_or(|entry| entry.value != request.value);
    let value_json = serde_json::to_string(&request.value)
        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    let updated_at = unix_millis();
    tx.execute(
        "INSERT INTO state_entries (key, value_json, source, confidence, observed_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(key) DO UPDATE SET
             value_json = excluded.value_json,
             source = excluded.source,
             confidence = excluded.confidence,
             observed_at = excluded.observed_at,
             updated_at = excluded.updated_at",
        params![
            request.key.as_str(),
            value_json,
            request.source,
            request.confidence,
            request.observed_at.as_unix_millis(),
            updated_at,
        ],
    )
    .map_err(db_error)?;

    Ok(StateWriteOutcome {
        changed,
        accepted: true,
        entry: StateEntry {
            key: request.key,
            value: request.value,
            source: request.source,
            confidence: request.confidence,
            observed_at: request.observed_at,
            updated_at: UtcMillis::from_unix_millis(updated_at),
        },
    })
}

// ============================================================================
// SECTION: Event Log
// ============================================================================

impl EventLog for SqliteControlStore {
    fn append_event(&self, draft: EventDraft) -> Result<EventRecord, StoreError> {
        let record = {
            let mut connection = self.write_connection()?;
            let tx = connection.transaction().map_err(db_error)?;
            let payload_json = serde_json::to_string(&draft.payload)
                .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
            let tags_json = serde_json::to_string(&draft.tags)
                .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
            let inserted = tx.execute(
                "INSERT INTO event_log
                     (event_id, ts, event_type, source, session_id, correlation_id,
                      incident_id, watch_condition, severity, payload_json, tags_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    draft.event_id.as_str(),
                    draft.ts.as_unix_millis(),
                    draft.event_type.as_str(),
                    draft.source,
                    draft.session_id.as_ref().map(|id| id.as_str().to_string()),
                    draft.correlation_id.as_ref().map(|id| id.as_str().to_string()),
                    draft.incident_id.as_ref().map(|id| id.as_str().to_string()),
                    draft.watch_condition.as_str(),
                    draft.severity.as_str(),
                    payload_json,
                    tags_json,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    return Err(SqliteStoreError::DuplicateEventId(
                        draft.event_id.as_str().to_string(),
                    )
                    .into());
                }
                Err(err) => return Err(db_error(err).into()),
            }
            let seq = u64::try_from(tx.last_insert_rowid())
                .map_err(|_| SqliteStoreError::Corrupt("negative event sequence".to_string()))?;
            tx.commit().map_err(db_error)?;
            EventRecord {
                seq,
                draft,
            }
        };
        let _ = self.events_tx.send(record.clone());
        Ok(record)
    }

    fn read_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, StoreError> {
        let connection = self.read_connection()?;
        let limit = i64::try_from(filter.limit.unwrap_or(100)).unwrap_or(i64::MAX);
        let correlation = filter.correlation_id.as_ref().map(|id| id.as_str().to_string());
        let event_type = filter.event_type.map(|value| value.as_str().to_string());

        // With since_seq the page reads forward; without it the newest rows
        // are selected and re-sorted ascending.
        let sql = if filter.since_seq.is_some() {
            "SELECT seq, event_id, ts, event_type, source, session_id, correlation_id,
                    incident_id, watch_condition, severity, payload_json, tags_json
             FROM event_log
             WHERE seq > ?1
               AND (?2 IS NULL OR correlation_id = ?2)
               AND (?3 IS NULL OR event_type = ?3)
             ORDER BY seq ASC LIMIT ?4"
        } else {
            "SELECT * FROM (
                 SELECT seq, event_id, ts, event_type, source, session_id, correlation_id,
                        incident_id, watch_condition, severity, payload_json, tags_json
                 FROM event_log
                 WHERE seq > ?1
                   AND (?2 IS NULL OR correlation_id = ?2)
                   AND (?3 IS NULL OR event_type = ?3)
                 ORDER BY seq DESC LIMIT ?4
             ) ORDER BY seq ASC"
        };
        let since = i64::try_from(filter.since_seq.unwrap_or(0)).unwrap_or(i64::MAX);
        let mut statement = connection.prepare(sql).map_err(db_error)?;
        let rows = statement
            .query_map(params![since, correlation, event_type, limit], event_record_from_row)
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        rows.into_iter().map(|row| row.map_err(StoreError::from)).collect()
    }
}

// ============================================================================
// SECTION: Intent Log
// ============================================================================

impl IntentLog for SqliteControlStore {
    fn put_intent(&self, intent: IntentRecord) -> Result<(), StoreError> {
        let mut connection = self.write_connection()?;
        let tx = connection.transaction().map_err(db_error)?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM intent_log WHERE request_id = ?1",
                params![intent.request_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        if exists.is_some() {
            // Idempotent by request id: replay does not duplicate actions.
            return Ok(());
        }
        let record_json = serde_json::to_string(&intent)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        tx.execute(
            "INSERT INTO intent_log (request_id, record_json, received_at) VALUES (?1, ?2, ?3)",
            params![intent.request_id.as_str(), record_json, intent.received_at.as_unix_millis()],
        )
        .map_err(db_error)?;
        for (ordinal, proposal) in intent.actions.iter().enumerate() {
            let action = ActionRecord::queued(intent.request_id.clone(), proposal);
            let action_json = serde_json::to_string(&action)
                .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
            tx.execute(
                "INSERT INTO action_log (request_id, action_id, ordinal, state, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    intent.request_id.as_str(),
                    proposal.action_id.as_str(),
                    i64::try_from(ordinal).unwrap_or(i64::MAX),
                    action.state.as_str(),
                    action_json,
                ],
            )
            .map_err(db_error)?;
        }
        tx.commit().map_err(db_error)?;
        Ok(())
    }

    fn get_intent(&self, request_id: &RequestId) -> Result<Option<IntentRecord>, StoreError> {
        let connection = self.read_connection()?;
        let record_json: Option<String> = connection
            .query_row(
                "SELECT record_json FROM intent_log WHERE request_id = ?1",
                params![request_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        match record_json {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|err| SqliteStoreError::Corrupt(err.to_string()).into()),
        }
    }

    fn list_actions(&self, request_id: &RequestId) -> Result<Vec<ActionRecord>, StoreError> {
        let connection = self.read_connection()?;
        let mut statement = connection
            .prepare(
                "SELECT record_json FROM action_log WHERE request_id = ?1 ORDER BY ordinal ASC",
            )
            .map_err(db_error)?;
        let rows = statement
            .query_map(params![request_id.as_str()], |row| row.get::<_, String>(0))
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        rows.iter()
            .map(|raw| {
                serde_json::from_str(raw)
                    .map_err(|err| SqliteStoreError::Corrupt(err.to_string()).into())
            })
            .collect()
    }

    fn update_action(&self, record: &ActionRecord) -> Result<(), StoreError> {
        let connection = self.write_connection()?;
        let record_json = serde_json::to_string(record)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let updated = connection
            .execute(
                "UPDATE action_log SET state = ?1, record_json = ?2
                 WHERE request_id = ?3 AND action_id = ?4",
                params![
                    record.state.as_str(),
                    record_json,
                    record.request_id.as_str(),
                    record.action_id.as_str(),
                ],
            )
            .map_err(db_error)?;
        if updated == 0 {
            return Err(SqliteStoreError::NotFound(format!(
                "action {}/{}",
                record.request_id, record.action_id
            ))
            .into());
        }
        Ok(())
    }

    fn record_feedback(&self, feedback: FeedbackRecord) -> Result<(), StoreError> {
        let connection = self.write_connection()?;
        let exists: Option<i64> = connection
            .query_row(
                "SELECT 1 FROM intent_log WHERE request_id = ?1",
                params![feedback.request_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        if exists.is_none() {
            return Err(SqliteStoreError::NotFound(format!(
                "intent {} for feedback",
                feedback.request_id
            ))
            .into());
        }
        connection
            .execute(
                "INSERT INTO feedback_log (request_id, rating, correction_text, received_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    feedback.request_id.as_str(),
                    i8::from(feedback.rating),
                    feedback.correction_text,
                    feedback.received_at.as_unix_millis(),
                ],
            )
            .map_err(db_error)?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Twitch Log
// ============================================================================

impl TwitchLog for SqliteControlStore {
    fn append_twitch_event(&self, record: TwitchEventRecord) -> Result<(), StoreError> {
        let connection = self.write_connection()?;
        let payload_json = serde_json::to_string(&record.payload)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        connection
            .execute(
                "INSERT INTO twitch_events
                     (event_id, category, received_at, marker, user_id, user_login,
                      redeem_title, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.event_id.as_str(),
                    record.category.as_str(),
                    record.received_at.as_unix_millis(),
                    record.marker,
                    record.user_id,
                    record.user_login,
                    record.redeem_title,
                    payload_json,
                ],
            )
            .map_err(db_error)?;
        Ok(())
    }

    fn twitch_cursor(&self, category: TwitchCategory) -> Result<Option<i64>, StoreError> {
        let connection = self.read_connection()?;
        connection
            .query_row(
                "SELECT marker FROM twitch_cursors WHERE category = ?1",
                params![category.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)
            .map_err(StoreError::from)
    }

    fn advance_twitch_cursor(
        &self,
        category: TwitchCategory,
        marker: i64,
        at: UtcMillis,
    ) -> Result<(), StoreError> {
        let mut connection = self.write_connection()?;
        let tx = connection.transaction().map_err(db_error)?;
        let current: Option<i64> = tx
            .query_row(
                "SELECT marker FROM twitch_cursors WHERE category = ?1",
                params![category.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        if let Some(current) = current
            && marker <= current
        {
            return Err(SqliteStoreError::Invalid(format!(
                "cursor for {category} must advance: {marker} <= {current}"
            ))
            .into());
        }
        tx.execute(
            "INSERT INTO twitch_cursors (category, marker, advanced_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(category) DO UPDATE SET
                 marker = excluded.marker,
                 advanced_at = excluded.advanced_at",
            params![category.as_str(), marker, at.as_unix_millis()],
        )
        .map_err(db_error)?;
        tx.commit().map_err(db_error)?;
        Ok(())
    }

    fn recent_twitch_events(&self, limit: u64) -> Result<Vec<TwitchEventRecord>, StoreError> {
        let connection = self.read_connection()?;
        let mut statement = connection
            .prepare(
                "SELECT event_id, category, received_at, marker, user_id, user_login,
                        redeem_title, payload_json
                 FROM twitch_events ORDER BY received_at DESC, rowid DESC LIMIT ?1",
            )
            .map_err(db_error)?;
        let rows = statement
            .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], twitch_event_from_row)
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        rows.into_iter().map(|row| row.map_err(StoreError::from)).collect()
    }

    fn twitch_user_summary(&self, user_id: &str) -> Result<Option<TwitchUserSummary>, StoreError> {
        let connection = self.read_connection()?;
        let mut statement = connection
            .prepare(
                "SELECT category, COUNT(*) FROM twitch_events
                 WHERE user_id = ?1 GROUP BY category ORDER BY category",
            )
            .map_err(db_error)?;
        let rows = statement
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut by_category = Vec::with_capacity(rows.len());
        let mut total = 0_u64;
        for (label, count) in rows {
            let category = parse_category(&label)?;
            let count = u64::try_from(count).unwrap_or(0);
            total += count;
            by_category.push(CategoryCount {
                category,
                count,
            });
        }
        let (user_login, last_seen): (Option<String>, Option<i64>) = connection
            .query_row(
                "SELECT user_login, received_at FROM twitch_events
                 WHERE user_id = ?1 ORDER BY received_at DESC, rowid DESC LIMIT 1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_error)?
            .unwrap_or((None, None));
        Ok(Some(TwitchUserSummary {
            user_id: user_id.to_string(),
            user_login,
            event_count: total,
            by_category,
            last_seen: last_seen.map(UtcMillis::from_unix_millis),
        }))
    }

    fn twitch_top_redeems(
        &self,
        user_id: &str,
        limit: u64,
    ) -> Result<Vec<RedeemCount>, StoreError> {
        let connection = self.read_connection()?;
        let mut statement = connection
            .prepare(
                "SELECT redeem_title, COUNT(*) AS redeem_count FROM twitch_events
                 WHERE user_id = ?1 AND category = 'REDEEM' AND redeem_title IS NOT NULL
                 GROUP BY redeem_title
                 ORDER BY redeem_count DESC, redeem_title ASC LIMIT ?2",
            )
            .map_err(db_error)?;
        let rows = statement
            .query_map(params![user_id, i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok(RedeemCount {
                    title: row.get(0)?,
                    count: u64::try_from(row.get::<_, i64>(1)?).unwrap_or(0),
                })
            })
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        Ok(rows)
    }
}

// ============================================================================
// SECTION: Registries
// ============================================================================

impl BiasLexicon for SqliteControlStore {
    fn upsert_bias(&self, entry: BiasEntry) -> Result<(), StoreError> {
        if entry.weight < 0.0 {
            return Err(
                SqliteStoreError::Invalid("bias weight must be non-negative".to_string()).into()
            );
        }
        let connection = self.write_connection()?;
        connection
            .execute(
                "INSERT INTO stt_bias (normalized, mode, phrase, weight, active)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(normalized, mode) DO UPDATE SET
                     phrase = excluded.phrase,
                     weight = excluded.weight,
                     active = excluded.active",
                params![
                    entry.normalized,
                    entry.mode.clone().unwrap_or_default(),
                    entry.phrase,
                    entry.weight,
                    i64::from(entry.active),
                ],
            )
            .map_err(db_error)?;
        Ok(())
    }

    fn list_bias(&self, mode: Option<&str>) -> Result<Vec<BiasEntry>, StoreError> {
        let connection = self.read_connection()?;
        let mut statement = connection
            .prepare(
                "SELECT normalized, mode, phrase, weight, active FROM stt_bias
                 WHERE active = 1 AND (?1 IS NULL OR mode = '' OR mode = ?1)
                 ORDER BY normalized",
            )
            .map_err(db_error)?;
        let rows = statement
            .query_map(params![mode], |row| {
                let mode: String = row.get(1)?;
                Ok(BiasEntry {
                    normalized: row.get(0)?,
                    mode: if mode.is_empty() { None } else { Some(mode) },
                    phrase: row.get(2)?,
                    weight: row.get(3)?,
                    active: row.get::<_, i64>(4)? != 0,
                })
            })
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        Ok(rows)
    }
}

impl CapabilityRegistry for SqliteControlStore {
    fn set_capability(&self, entry: CapabilityEntry) -> Result<(), StoreError> {
        let connection = self.write_connection()?;
        connection
            .execute(
                "INSERT INTO capabilities (name, status, detail, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                     status = excluded.status,
                     detail = excluded.detail,
                     updated_at = excluded.updated_at",
                params![
                    entry.name,
                    entry.status.as_str(),
                    entry.detail,
                    entry.updated_at.as_unix_millis(),
                ],
            )
            .map_err(db_error)?;
        Ok(())
    }

    fn list_capabilities(&self) -> Result<Vec<CapabilityEntry>, StoreError> {
        let connection = self.read_connection()?;
        let mut statement = connection
            .prepare("SELECT name, status, detail, updated_at FROM capabilities ORDER BY name")
            .map_err(db_error)?;
        let rows = statement
            .query_map(params![], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        rows.into_iter()
            .map(|(name, status, detail, updated_at)| {
                Ok(CapabilityEntry {
                    name,
                    status: parse_capability_status(&status)?,
                    detail,
                    updated_at: UtcMillis::from_unix_millis(updated_at),
                })
            })
            .collect()
    }
}

// ============================================================================
// SECTION: Row Decoding
// ============================================================================

/// Decodes a state entry row; JSON decoding is deferred to the caller result.
fn state_entry_from_row(
    row: &rusqlite::Row<'_>,
) -> Result<Result<StateEntry, SqliteStoreError>, rusqlite::Error> {
    let key: String = row.get(0)?;
    let value_json: String = row.get(1)?;
    let source: String = row.get(2)?;
    let confidence: Option<f64> = row.get(3)?;
    let observed_at: i64 = row.get(4)?;
    let updated_at: i64 = row.get(5)?;
    Ok(decode_state_entry(&key, &value_json, source, confidence, observed_at, updated_at))
}

/// Builds a state entry from decoded columns.
fn decode_state_entry(
    key: &str,
    value_json: &str,
    source: String,
    confidence: Option<f64>,
    observed_at: i64,
    updated_at: i64,
) -> Result<StateEntry, SqliteStoreError> {
    let key =
        StateKey::parse(key).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
    let value = serde_json::from_str(value_json)
        .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
    Ok(StateEntry {
        key,
        value,
        source,
        confidence,
        observed_at: UtcMillis::from_unix_millis(observed_at),
        updated_at: UtcMillis::from_unix_millis(updated_at),
    })
}

/// Decodes an event log row; JSON decoding is deferred to the caller result.
fn event_record_from_row(
    row: &rusqlite::Row<'_>,
) -> Result<Result<EventRecord, SqliteStoreError>, rusqlite::Error> {
    let seq: i64 = row.get(0)?;
    let event_id: String = row.get(1)?;
    let ts: i64 = row.get(2)?;
    let event_type: String = row.get(3)?;
    let source: String = row.get(4)?;
    let session_id: Option<String> = row.get(5)?;
    let correlation_id: Option<String> = row.get(6)?;
    let incident_id: Option<String> = row.get(7)?;
    let watch_condition: String = row.get(8)?;
    let severity: String = row.get(9)?;
    let payload_json: String = row.get(10)?;
    let tags_json: String = row.get(11)?;
    Ok(decode_event_record(
        seq,
        event_id,
        ts,
        &event_type,
        source,
        session_id,
        correlation_id,
        incident_id,
        &watch_condition,
        &severity,
        &payload_json,
        &tags_json,
    ))
}

/// Builds an event record from decoded columns.
#[allow(clippy::too_many_arguments, reason = "Column set mirrors the table schema.")]
fn decode_event_record(
    seq: i64,
    event_id: String,
    ts: i64,
    event_type: &str,
    source: String,
    session_id: Option<String>,
    correlation_id: Option<String>,
    incident_id: Option<String>,
    watch_condition: &str,
    severity: &str,
    payload_json: &str,
    tags_json: &str,
) -> Result<EventRecord, SqliteStoreError> {
    let seq = u64::try_from(seq)
        .map_err(|_| SqliteStoreError::Corrupt("negative event sequence".to_string()))?;
    let event_type = EventType::parse(event_type)
        .ok_or_else(|| SqliteStoreError::Corrupt(format!("unknown event type: {event_type}")))?;
    let watch_condition = WatchCondition::parse(watch_condition).ok_or_else(|| {
        SqliteStoreError::Corrupt(format!("unknown watch condition: {watch_condition}"))
    })?;
    let severity = parse_severity(severity)?;
    let payload = serde_json::from_str(payload_json)
        .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
    let tags = serde_json::from_str(tags_json)
        .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
    Ok(EventRecord {
        seq,
        draft: EventDraft {
            event_id: EventId::new(event_id),
            ts: UtcMillis::from_unix_millis(ts),
            event_type,
            source,
            session_id: session_id.map(Into::into),
            correlation_id: correlation_id.map(Into::into),
            incident_id: incident_id.map(Into::into),
            watch_condition,
            severity,
            payload,
            tags,
        },
    })
}

/// Decodes a Twitch event row; JSON decoding is deferred to the caller result.
fn twitch_event_from_row(
    row: &rusqlite::Row<'_>,
) -> Result<Result<TwitchEventRecord, SqliteStoreError>, rusqlite::Error> {
    let event_id: String = row.get(0)?;
    let category: String = row.get(1)?;
    let received_at: i64 = row.get(2)?;
    let marker: i64 = row.get(3)?;
    let user_id: Option<String> = row.get(4)?;
    let user_login: Option<String> = row.get(5)?;
    let redeem_title: Option<String> = row.get(6)?;
    let payload_json: String = row.get(7)?;
    let decoded = parse_category(&category).and_then(|category| {
        let payload = serde_json::from_str(&payload_json)
            .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
        Ok(TwitchEventRecord {
            event_id: EventId::new(event_id),
            category,
            received_at: UtcMillis::from_unix_millis(received_at),
            marker,
            user_id,
            user_login,
            redeem_title,
            payload,
        })
    });
    Ok(decoded)
}

/// Parses a stored severity label.
fn parse_severity(label: &str) -> Result<Severity, SqliteStoreError> {
    match label {
        "debug" => Ok(Severity::Debug),
        "info" => Ok(Severity::Info),
        "warn" => Ok(Severity::Warn),
        "error" => Ok(Severity::Error),
        other => Err(SqliteStoreError::Corrupt(format!("unknown severity: {other}"))),
    }
}

/// Parses a stored category label.
fn parse_category(label: &str) -> Result<TwitchCategory, SqliteStoreError> {
    TwitchCategory::from_label(label)
        .ok_or_else(|| SqliteStoreError::Corrupt(format!("unknown twitch category: {label}")))
}

/// Parses a stored capability status label.
fn parse_capability_status(label: &str) -> Result<CapabilityStatus, StoreError> {
    match label {
        "available" => Ok(CapabilityStatus::Available),
        "degraded" => Ok(CapabilityStatus::Degraded),
        "unavailable" => Ok(CapabilityStatus::Unavailable),
        other => {
            Err(SqliteStoreError::Corrupt(format!("unknown capability status: {other}")).into())
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps a `rusqlite` error into a store error.
fn db_error(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

/// Returns true when the error is a unique-constraint violation.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

/// Returns the current wall clock in unix milliseconds.
fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with durability pragmas applied.
fn open_connection(
    config: &SqliteStoreConfig,
    read_only: bool,
) -> Result<Connection, SqliteStoreError> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_FULL_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX
    };
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config, read_only)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
    read_only: bool,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    if !read_only {
        connection
            .execute_batch(&format!(
                "PRAGMA journal_mode = {};",
                config.journal_mode.pragma_value()
            ))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        connection
            .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    }
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS state_entries (
                    key TEXT NOT NULL PRIMARY KEY,
                    value_json TEXT NOT NULL,
                    source TEXT NOT NULL,
                    confidence REAL,
                    observed_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS event_log (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    event_id TEXT NOT NULL UNIQUE,
                    ts INTEGER NOT NULL,
                    event_type TEXT NOT NULL,
                    source TEXT NOT NULL,
                    session_id TEXT,
                    correlation_id TEXT,
                    incident_id TEXT,
                    watch_condition TEXT NOT NULL,
                    severity TEXT NOT NULL,
                    payload_json TEXT NOT NULL,
                    tags_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_event_log_correlation
                    ON event_log (correlation_id);
                CREATE INDEX IF NOT EXISTS idx_event_log_type
                    ON event_log (event_type);
                CREATE TABLE IF NOT EXISTS intent_log (
                    request_id TEXT NOT NULL PRIMARY KEY,
                    record_json TEXT NOT NULL,
                    received_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS action_log (
                    request_id TEXT NOT NULL,
                    action_id TEXT NOT NULL,
                    ordinal INTEGER NOT NULL,
                    state TEXT NOT NULL,
                    record_json TEXT NOT NULL,
                    PRIMARY KEY (request_id, action_id),
                    FOREIGN KEY (request_id)
                        REFERENCES intent_log(request_id) ON DELETE CASCADE
                );
                CREATE TABLE IF NOT EXISTS feedback_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    request_id TEXT NOT NULL,
                    rating INTEGER NOT NULL,
                    correction_text TEXT,
                    received_at INTEGER NOT NULL,
                    FOREIGN KEY (request_id)
                        REFERENCES intent_log(request_id) ON DELETE CASCADE
                );
                CREATE TABLE IF NOT EXISTS capabilities (
                    name TEXT NOT NULL PRIMARY KEY,
                    status TEXT NOT NULL,
                    detail TEXT,
                    updated_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS stt_bias (
                    normalized TEXT NOT NULL,
                    mode TEXT NOT NULL DEFAULT '',
                    phrase TEXT NOT NULL,
                    weight REAL NOT NULL,
                    active INTEGER NOT NULL,
                    PRIMARY KEY (normalized, mode)
                );
                CREATE TABLE IF NOT EXISTS twitch_events (
                    event_id TEXT NOT NULL PRIMARY KEY,
                    category TEXT NOT NULL,
                    received_at INTEGER NOT NULL,
                    marker INTEGER NOT NULL,
                    user_id TEXT,
                    user_login TEXT,
                    redeem_title TEXT,
                    payload_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_twitch_events_user
                    ON twitch_events (user_id, category);
                CREATE TABLE IF NOT EXISTS twitch_cursors (
                    category TEXT NOT NULL PRIMARY KEY,
                    marker INTEGER NOT NULL,
                    advanced_at INTEGER NOT NULL
                );",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(found) if found == SCHEMA_VERSION => {}
        Some(found) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "expected schema version {SCHEMA_VERSION}, found {found}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
}
