// crates/watchkeeper-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Control Store Unit Tests
// Description: Integrity tests for state, events, intents, cursors, and
//              registries.
// Purpose: Validate last-write-wins upserts, append-only dedupe, sequence
//          monotonicity, cursor advancement, and schema versioning.
// ============================================================================

//! ## Overview
//! Unit-level tests for store invariants:
//! - State upserts are idempotent with last-write-wins by `observed_at`
//! - Duplicate stable event ids are rejected; sequences are monotonic
//! - Intent storage is idempotent; action updates require existing rows
//! - Twitch cursors only advance forward
//! - Schema version mismatch fails closed on open

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use serde_json::json;
use tempfile::TempDir;
use watchkeeper_core::ActionState;
use watchkeeper_core::BiasEntry;
use watchkeeper_core::BiasLexicon;
use watchkeeper_core::EventDraft;
use watchkeeper_core::EventFilter;
use watchkeeper_core::EventId;
use watchkeeper_core::EventLog;
use watchkeeper_core::EventType;
use watchkeeper_core::FeedbackRecord;
use watchkeeper_core::IntentLog;
use watchkeeper_core::IntentRecord;
use watchkeeper_core::ProposedAction;
use watchkeeper_core::Rating;
use watchkeeper_core::RequestId;
use watchkeeper_core::SetState;
use watchkeeper_core::Severity;
use watchkeeper_core::StateKey;
use watchkeeper_core::StateStore;
use watchkeeper_core::StoreError;
use watchkeeper_core::TwitchCategory;
use watchkeeper_core::TwitchEventRecord;
use watchkeeper_core::TwitchLog;
use watchkeeper_core::UtcMillis;
use watchkeeper_core::WatchCondition;
use watchkeeper_store_sqlite::SqliteControlStore;
use watchkeeper_store_sqlite::SqliteStoreConfig;
use watchkeeper_store_sqlite::SqliteStoreError;
use watchkeeper_store_sqlite::SqliteStoreMode;
use watchkeeper_store_sqlite::SqliteSyncMode;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn config_for(dir: &TempDir) -> SqliteStoreConfig {
    SqliteStoreConfig {
        path: dir.path().join("watchkeeper.db"),
        busy_timeout_ms: 1_000,
        journal_mode: SqliteStoreMode::Wal,
        sync_mode: SqliteSyncMode::Full,
        read_pool_size: 2,
        event_channel_capacity: 16,
    }
}

fn open_store(dir: &TempDir) -> SqliteControlStore {
    SqliteControlStore::new(&config_for(dir)).expect("open store")
}

fn set(key: &str, value: serde_json::Value, observed_at: i64) -> SetState {
    SetState {
        key: StateKey::parse(key).expect("key"),
        value,
        source: "test".to_string(),
        confidence: None,
        observed_at: UtcMillis::from_unix_millis(observed_at),
        quiet: false,
    }
}

fn draft(event_id: &str, event_type: EventType) -> EventDraft {
    EventDraft {
        event_id: EventId::new(event_id),
        ts: UtcMillis::from_unix_millis(1_700_000_000_000),
        event_type,
        source: "test".to_string(),
        session_id: None,
        correlation_id: None,
        incident_id: None,
        watch_condition: WatchCondition::Standby,
        severity: Severity::Info,
        payload: json!({}),
        tags: Vec::new(),
    }
}

fn intent(request_id: &str, actions: usize) -> IntentRecord {
    IntentRecord {
        request_id: RequestId::new(request_id),
        mode: "assist".to_string(),
        domain: "lights".to_string(),
        urgency: "normal".to_string(),
        user_text: "set the mood".to_string(),
        needs_tools: true,
        clarifying_questions: Vec::new(),
        retrieval_refs: Vec::new(),
        actions: (0..actions)
            .map(|index| ProposedAction {
                action_id: format!("a{index}").into(),
                tool: "lights.scene".into(),
                params: json!({ "scene": "calm" }),
            })
            .collect(),
        response_text: "on it".to_string(),
        received_at: UtcMillis::from_unix_millis(1_700_000_000_000),
    }
}

// ============================================================================
// SECTION: State Tests
// ============================================================================

#[test]
fn state_upsert_is_last_write_wins_by_observed_at() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    let first = store.set_state(set("ed.running", json!(true), 2_000)).expect("first write");
    assert!(first.accepted);
    assert!(first.changed);

    // An older observation is rejected.
    let stale = store.set_state(set("ed.running", json!(false), 1_000)).expect("stale write");
    assert!(!stale.accepted);
    let current = store
        .get_state(&StateKey::parse("ed.running").expect("key"))
        .expect("read")
        .expect("entry");
    assert_eq!(current.value, json!(true));

    // Re-writing the same value is accepted but unchanged.
    let same = store.set_state(set("ed.running", json!(true), 3_000)).expect("same write");
    assert!(same.accepted);
    assert!(!same.changed);
}

#[test]
fn list_state_respects_segment_boundaries() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    store.set_state(set("ed.running", json!(true), 1)).expect("write");
    store.set_state(set("ed.telemetry.docked", json!(false), 1)).expect("write");
    store.set_state(set("music.playing", json!(true), 1)).expect("write");

    let entries = store.list_state("ed").expect("list");
    assert_eq!(entries.len(), 2);
    let entries = store.list_state("ed.telemetry").expect("list");
    assert_eq!(entries.len(), 1);
    let entries = store.list_state("").expect("list all");
    assert_eq!(entries.len(), 3);
}

// ============================================================================
// SECTION: Event Tests
// ============================================================================

#[test]
fn duplicate_event_ids_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    store.append_event(draft("ev-1", EventType::StateChanged)).expect("first");
    let duplicate = store.append_event(draft("ev-1", EventType::StateChanged));
    assert!(matches!(duplicate, Err(StoreError::DuplicateEventId(_))));
    let events = store.read_events(&EventFilter::default()).expect("read");
    assert_eq!(events.len(), 1);
}

#[test]
fn sequences_increase_in_emit_order() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let first = store.append_event(draft("ev-1", EventType::StateChanged)).expect("first");
    let second = store.append_event(draft("ev-2", EventType::PolicyDecision)).expect("second");
    assert!(second.seq > first.seq);

    let forward = store
        .read_events(&EventFilter {
            since_seq: Some(first.seq),
            ..EventFilter::default()
        })
        .expect("forward read");
    assert_eq!(forward.len(), 1);
    assert_eq!(forward[0].seq, second.seq);
}

#[test]
fn event_filters_select_by_type_and_correlation() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let mut tagged = draft("ev-1", EventType::ActionDenied);
    tagged.correlation_id = Some("inc-1".into());
    store.append_event(tagged).expect("tagged");
    store.append_event(draft("ev-2", EventType::StateChanged)).expect("untagged");

    let by_type = store
        .read_events(&EventFilter {
            event_type: Some(EventType::ActionDenied),
            ..EventFilter::default()
        })
        .expect("by type");
    assert_eq!(by_type.len(), 1);

    let by_correlation = store
        .read_events(&EventFilter {
            correlation_id: Some("inc-1".into()),
            ..EventFilter::default()
        })
        .expect("by correlation");
    assert_eq!(by_correlation.len(), 1);
    assert_eq!(by_correlation[0].draft.event_id.as_str(), "ev-1");
}

#[test]
fn subscribers_observe_committed_events() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let mut receiver = store.subscribe();
    let committed = store.append_event(draft("ev-1", EventType::TwitchEvent)).expect("append");
    let observed = receiver.try_recv().expect("broadcast");
    assert_eq!(observed.seq, committed.seq);
}

// ============================================================================
// SECTION: Intent Tests
// ============================================================================

#[test]
fn intent_storage_is_idempotent_by_request_id() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    store.put_intent(intent("req-1", 2)).expect("first put");
    store.put_intent(intent("req-1", 2)).expect("replay put");

    let actions = store.list_actions(&RequestId::new("req-1")).expect("actions");
    assert_eq!(actions.len(), 2);
    assert!(actions.iter().all(|action| action.state == ActionState::Queued));
    assert_eq!(actions[0].action_id.as_str(), "a0");
    assert_eq!(actions[1].action_id.as_str(), "a1");
}

#[test]
fn action_updates_require_an_existing_row() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    store.put_intent(intent("req-1", 1)).expect("put");
    let mut action =
        store.list_actions(&RequestId::new("req-1")).expect("actions").remove(0);
    action.transition(ActionState::Approved).expect("approve");
    store.update_action(&action).expect("update");

    let mut ghost = action.clone();
    ghost.action_id = "missing".into();
    assert!(matches!(store.update_action(&ghost), Err(StoreError::NotFound(_))));
}

#[test]
fn feedback_requires_a_known_request() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let feedback = FeedbackRecord {
        request_id: RequestId::new("req-missing"),
        rating: Rating::Up,
        correction_text: None,
        received_at: UtcMillis::from_unix_millis(1),
    };
    assert!(matches!(store.record_feedback(feedback), Err(StoreError::NotFound(_))));

    store.put_intent(intent("req-1", 0)).expect("put");
    let feedback = FeedbackRecord {
        request_id: RequestId::new("req-1"),
        rating: Rating::Down,
        correction_text: Some("wrong scene".to_string()),
        received_at: UtcMillis::from_unix_millis(2),
    };
    store.record_feedback(feedback).expect("record");
}

// ============================================================================
// SECTION: Twitch Tests
// ============================================================================

fn twitch_event(event_id: &str, marker: i64, user_id: &str, redeem: Option<&str>) -> TwitchEventRecord {
    TwitchEventRecord {
        event_id: EventId::new(event_id),
        category: if redeem.is_some() { TwitchCategory::Redeem } else { TwitchCategory::Chat },
        received_at: UtcMillis::from_unix_millis(marker),
        marker,
        user_id: Some(user_id.to_string()),
        user_login: Some(format!("login_{user_id}")),
        redeem_title: redeem.map(ToString::to_string),
        payload: json!({}),
    }
}

#[test]
fn cursors_only_advance_forward() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let at = UtcMillis::from_unix_millis(1);
    assert_eq!(store.twitch_cursor(TwitchCategory::Chat).expect("cursor"), None);
    store.advance_twitch_cursor(TwitchCategory::Chat, 100, at).expect("advance");
    store.advance_twitch_cursor(TwitchCategory::Chat, 101, at).expect("advance again");
    assert!(store.advance_twitch_cursor(TwitchCategory::Chat, 101, at).is_err());
    assert!(store.advance_twitch_cursor(TwitchCategory::Chat, 50, at).is_err());
    assert_eq!(store.twitch_cursor(TwitchCategory::Chat).expect("cursor"), Some(101));

    // Cursors are independent per category.
    store.advance_twitch_cursor(TwitchCategory::Redeem, 10, at).expect("other category");
}

#[test]
fn user_rollups_aggregate_without_scanning() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    store.append_twitch_event(twitch_event("tw-1", 1, "42", None)).expect("append");
    store.append_twitch_event(twitch_event("tw-2", 2, "42", Some("hydrate"))).expect("append");
    store.append_twitch_event(twitch_event("tw-3", 3, "42", Some("hydrate"))).expect("append");
    store.append_twitch_event(twitch_event("tw-4", 4, "7", Some("lurk"))).expect("append");

    let summary = store.twitch_user_summary("42").expect("summary").expect("present");
    assert_eq!(summary.event_count, 3);
    assert_eq!(summary.last_seen, Some(UtcMillis::from_unix_millis(3)));

    let redeems = store.twitch_top_redeems("42", 5).expect("redeems");
    assert_eq!(redeems.len(), 1);
    assert_eq!(redeems[0].title, "hydrate");
    assert_eq!(redeems[0].count, 2);

    assert!(store.twitch_user_summary("nobody").expect("summary").is_none());

    let recent = store.recent_twitch_events(2).expect("recent");
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].event_id.as_str(), "tw-4");
}

// ============================================================================
// SECTION: Registry Tests
// ============================================================================

#[test]
fn bias_entries_are_unique_by_phrase_and_mode() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let entry = BiasEntry {
        phrase: "Frame Shift Drive".to_string(),
        normalized: BiasEntry::normalize("Frame  Shift Drive"),
        mode: Some("GAME".to_string()),
        weight: 2.0,
        active: true,
    };
    store.upsert_bias(entry.clone()).expect("insert");
    let updated = BiasEntry {
        weight: 5.0,
        ..entry
    };
    store.upsert_bias(updated).expect("upsert");

    let listed = store.list_bias(Some("GAME")).expect("list");
    assert_eq!(listed.len(), 1);
    assert!((listed[0].weight - 5.0).abs() < f64::EPSILON);

    // Unscoped entries apply to every mode.
    let global = BiasEntry {
        phrase: "sitrep".to_string(),
        normalized: "sitrep".to_string(),
        mode: None,
        weight: 1.0,
        active: true,
    };
    store.upsert_bias(global).expect("global");
    assert_eq!(store.list_bias(Some("GAME")).expect("list").len(), 2);
    assert_eq!(store.list_bias(None).expect("list").len(), 2);
}

// ============================================================================
// SECTION: Schema Tests
// ============================================================================

#[test]
fn schema_version_mismatch_fails_closed() {
    let dir = TempDir::new().expect("tempdir");
    let config = config_for(&dir);
    drop(open_store(&dir));

    let connection = rusqlite::Connection::open(&config.path).expect("raw open");
    connection.execute("UPDATE store_meta SET version = 99", []).expect("tamper");
    drop(connection);

    let reopened = SqliteControlStore::new(&config);
    assert!(matches!(reopened, Err(SqliteStoreError::VersionMismatch(_))));
}
