// crates/watchkeeper-server/tests/pipeline_flow.rs
// ============================================================================
// Module: Execution Pipeline Flow Tests
// Description: Policy-gated execute, confirm, and journaling scenarios.
// Purpose: Validate denial reasons, confirmation round-trips, incident
//          correlation, and no-op re-execution.
// ============================================================================

//! ## Overview
//! End-to-end pipeline scenarios against a real store:
//! - Deny-in-condition produces one `ACTION_DENIED` with incident correlation
//! - A confirmation guard denies with a token, then succeeds via `/confirm`
//! - Tokens are single-use and expire at their deadline
//! - Foreground guards deny on mismatch
//! - Re-executing a successful action is a recorded no-op
//! - Dry runs evaluate policy without transitions or dispatch

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use watchkeeper_actuators::ParserConfig;
use watchkeeper_core::ActionState;
use watchkeeper_core::EventFilter;
use watchkeeper_core::EventLog;
use watchkeeper_core::EventType;
use watchkeeper_core::IncidentId;
use watchkeeper_core::IntentLog;
use watchkeeper_core::ProposedAction;
use watchkeeper_core::ReasonCode;
use watchkeeper_core::RequestId;
use watchkeeper_core::SetState;
use watchkeeper_core::StandingOrders;
use watchkeeper_core::StateKey;
use watchkeeper_server::ExecutionPipeline;
use watchkeeper_server::Runtime;
use watchkeeper_server::WatchkeeperConfig;
use watchkeeper_server::config::ActuatorSection;
use watchkeeper_server::config::FeatureFlags;
use watchkeeper_server::config::OverlaySection;
use watchkeeper_server::config::ServerSection;
use watchkeeper_server::config::SupervisorSection;
use watchkeeper_server::config::TwitchSection;
use watchkeeper_server::config::VariableIndex;
use watchkeeper_server::pipeline::ConfirmRequest;
use watchkeeper_server::pipeline::ExecuteRequest;
use watchkeeper_server::pipeline::IntentRequest;
use watchkeeper_server::pipeline::PipelineError;
use watchkeeper_store_sqlite::SqliteControlStore;
use watchkeeper_store_sqlite::SqliteStoreConfig;
use watchkeeper_store_sqlite::SqliteStoreMode;
use watchkeeper_store_sqlite::SqliteSyncMode;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn test_config(dir: &TempDir, orders_json: &str) -> WatchkeeperConfig {
    WatchkeeperConfig {
        server: ServerSection {
            bind_addr: "127.0.0.1:8799".to_string(),
            ui_dir: None,
            shutdown_grace_ms: 500,
        },
        store: SqliteStoreConfig {
            path: dir.path().join("watchkeeper.db"),
            busy_timeout_ms: 1_000,
            journal_mode: SqliteStoreMode::Wal,
            sync_mode: SqliteSyncMode::Full,
            read_pool_size: 2,
            event_channel_capacity: 16,
        },
        features: FeatureFlags {
            actuators_enabled: true,
            keypress_enabled: false,
            twitch_udp_enabled: false,
            strict_confirm: false,
            dev_ingest: true,
        },
        standing_orders: StandingOrders::from_json(orders_json).expect("orders"),
        supervisor: SupervisorSection {
            active_cadence_ms: 100,
            idle_cadence_ms: 500,
            process_probe_path: dir.path().join("probe.json"),
            telemetry_path: dir.path().join("telemetry.json"),
            hardware_path: dir.path().join("hardware.json"),
            music_dir: dir.path().join("music"),
            game_exe: "EliteDangerous64.exe".to_string(),
            sidecars: BTreeMap::new(),
            streaming_app: None,
            parser_auto_run: false,
            cpu_warn_pct: 90.0,
            mem_warn_pct: 90.0,
            hysteresis_pct: 5.0,
        },
        overlay: OverlaySection::default(),
        twitch: TwitchSection {
            udp_bind_addr: "127.0.0.1:9971".to_string(),
            bridge_url: "http://127.0.0.1:9451/api".to_string(),
            bridge_timeout_ms: 100,
            variable_index_path: dir.path().join("varindex.json"),
        },
        variable_index: VariableIndex::default(),
        actuators: ActuatorSection {
            lights_url: "http://127.0.0.1:9452/lights/{scene}".to_string(),
            lights_timeout_ms: 100,
            env_map_path: None,
            key_commands: BTreeMap::new(),
            keypress_foreground_allowlist: Vec::new(),
        },
        env_map: BTreeMap::new(),
        parser: ParserConfig {
            start_command: vec!["edparser".to_string()],
            stop_command: None,
            stop_timeout_ms: 200,
            log_path: None,
        },
        apps: BTreeMap::new(),
    }
}

fn build_pipeline(dir: &TempDir, orders_json: &str) -> (Arc<Runtime>, ExecutionPipeline) {
    let config = test_config(dir, orders_json);
    tokio::task::block_in_place(|| {
        let store = SqliteControlStore::new(&config.store).expect("store");
        let runtime = Arc::new(Runtime::new(config, Arc::new(store)).expect("runtime"));
        let pipeline = ExecutionPipeline::new(Arc::clone(&runtime));
        (runtime, pipeline)
    })
}

fn intent_for(tool: &str) -> IntentRequest {
    IntentRequest {
        request_id: RequestId::new("req-1"),
        mode: "assist".to_string(),
        domain: "ops".to_string(),
        urgency: "normal".to_string(),
        user_text: "do the thing".to_string(),
        needs_tools: true,
        clarifying_questions: Vec::new(),
        retrieval_refs: Vec::new(),
        actions: vec![ProposedAction {
            action_id: "a1".into(),
            tool: tool.into(),
            params: json!({}),
        }],
        response_text: "on it".to_string(),
    }
}

fn execute_for(incident: &str) -> ExecuteRequest {
    ExecuteRequest {
        request_id: RequestId::new("req-1"),
        incident_id: Some(IncidentId::new(incident)),
        watch_condition: None,
        stt_confidence: None,
        dry_run: false,
        allow_high_risk: false,
        user_confirmed: false,
        confirmed_at_utc: None,
    }
}

fn events_of(runtime: &Runtime, incident: &str, event_type: EventType) -> usize {
    runtime
        .store
        .read_events(&EventFilter {
            limit: Some(100),
            since_seq: None,
            correlation_id: Some(incident.into()),
            event_type: Some(event_type),
        })
        .expect("events")
        .len()
}

// ============================================================================
// SECTION: Denial Scenarios
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deny_in_condition_emits_one_denied_event() {
    let dir = TempDir::new().expect("tempdir");
    let orders = r#"{
        "conditions": { "STANDBY": { "allow": [], "deny": ["twitch.*"] } },
        "guards": {}
    }"#;
    let (runtime, pipeline) = build_pipeline(&dir, orders);

    pipeline.intent(intent_for("twitch.send_chat")).expect("intent");
    let response = pipeline.execute(execute_for("inc-1")).await.expect("execute");
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].status, "denied");
    assert_eq!(response.results[0].reason_code, Some(ReasonCode::DenyExplicitlyDenied));

    assert_eq!(events_of(&runtime, "inc-1", EventType::ActionDenied), 1);
    assert_eq!(events_of(&runtime, "inc-1", EventType::PolicyDecision), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn execute_without_incident_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let orders = r#"{ "conditions": {}, "guards": {} }"#;
    let (_runtime, pipeline) = build_pipeline(&dir, orders);
    pipeline.intent(intent_for("edparser.status")).expect("intent");

    let mut request = execute_for("inc-1");
    request.incident_id = None;
    let result = pipeline.execute(request).await;
    assert!(matches!(result, Err(PipelineError::MissingIncidentId)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn foreground_guard_denies_on_mismatch() {
    let dir = TempDir::new().expect("tempdir");
    let orders = r#"{
        "conditions": { "STANDBY": { "allow": ["edparser.*"], "deny": [] } },
        "guards": {
            "edparser.status": {
                "safety_class": "read_only",
                "foreground_process_required": ["EliteDangerous64.exe"]
            }
        }
    }"#;
    let (runtime, pipeline) = build_pipeline(&dir, orders);
    runtime
        .write_state(SetState {
            key: StateKey::parse("app.foreground").expect("key"),
            value: json!("notepad.exe"),
            source: "test".to_string(),
            confidence: None,
            observed_at: runtime.now(),
            quiet: true,
        })
        .expect("foreground");

    pipeline.intent(intent_for("edparser.status")).expect("intent");
    let response = pipeline.execute(execute_for("inc-fg")).await.expect("execute");
    assert_eq!(response.results[0].reason_code, Some(ReasonCode::DenyForegroundMismatch));
}

// ============================================================================
// SECTION: Confirmation Scenarios
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn confirmation_guard_denies_then_confirms() {
    let dir = TempDir::new().expect("tempdir");
    let orders = r#"{
        "conditions": { "STANDBY": { "allow": ["edparser.*"], "deny": [] } },
        "guards": {
            "edparser.status": { "safety_class": "read_only", "requires_confirmation": true }
        }
    }"#;
    let (runtime, pipeline) = build_pipeline(&dir, orders);

    pipeline.intent(intent_for("edparser.status")).expect("intent");
    let response = pipeline.execute(execute_for("inc-2")).await.expect("execute");
    assert_eq!(response.results[0].status, "denied");
    assert_eq!(response.results[0].reason_code, Some(ReasonCode::DenyNeedsConfirmation));
    let token = response.results[0].confirm_token.clone().expect("token");
    let deadline = response.results[0].confirm_by_ts.expect("deadline");
    assert!(deadline > runtime.now().as_unix_millis());

    let confirmed = pipeline
        .confirm(ConfirmRequest {
            incident_id: IncidentId::new("inc-2"),
            confirm_token: token.clone(),
        })
        .await
        .expect("confirm");
    assert_eq!(confirmed.result.status, "success");

    // The action record reached its terminal state.
    let actions = runtime.store.list_actions(&RequestId::new("req-1")).expect("actions");
    assert_eq!(actions[0].state, ActionState::Success);

    // A second presentation of the same token is unknown.
    let replayed = pipeline
        .confirm(ConfirmRequest {
            incident_id: IncidentId::new("inc-2"),
            confirm_token: token,
        })
        .await
        .expect("replay");
    assert_eq!(replayed.result.reason_code, Some(ReasonCode::ConfirmTokenUnknown));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn confirm_tokens_expire_at_their_deadline() {
    let dir = TempDir::new().expect("tempdir");
    let orders = r#"{
        "conditions": { "STANDBY": { "allow": ["edparser.*"], "deny": [] } },
        "guards": {
            "edparser.status": {
                "safety_class": "read_only",
                "requires_confirmation": true,
                "confirm_window_ms": 1
            }
        }
    }"#;
    let (_runtime, pipeline) = build_pipeline(&dir, orders);

    pipeline.intent(intent_for("edparser.status")).expect("intent");
    let response = pipeline.execute(execute_for("inc-3")).await.expect("execute");
    let token = response.results[0].confirm_token.clone().expect("token");

    tokio::time::sleep(Duration::from_millis(25)).await;
    let expired = pipeline
        .confirm(ConfirmRequest {
            incident_id: IncidentId::new("inc-3"),
            confirm_token: token,
        })
        .await
        .expect("confirm");
    assert_eq!(expired.result.reason_code, Some(ReasonCode::ConfirmExpired));
}

// ============================================================================
// SECTION: Execution Scenarios
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn successful_actions_skip_on_re_execute() {
    let dir = TempDir::new().expect("tempdir");
    let orders = r#"{
        "conditions": { "STANDBY": { "allow": ["edparser.*"], "deny": [] } },
        "guards": {}
    }"#;
    let (runtime, pipeline) = build_pipeline(&dir, orders);

    pipeline.intent(intent_for("edparser.status")).expect("intent");
    let first = pipeline.execute(execute_for("inc-4")).await.expect("first execute");
    assert_eq!(first.results[0].status, "success");
    assert!(!first.results[0].skipped);
    assert_eq!(events_of(&runtime, "inc-4", EventType::ActionExecuted), 1);

    let second = pipeline.execute(execute_for("inc-4")).await.expect("second execute");
    assert!(second.results[0].skipped);
    assert_eq!(events_of(&runtime, "inc-4", EventType::ActionExecuted), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dry_run_evaluates_without_dispatch() {
    let dir = TempDir::new().expect("tempdir");
    let orders = r#"{
        "conditions": { "STANDBY": { "allow": ["edparser.*"], "deny": [] } },
        "guards": {}
    }"#;
    let (runtime, pipeline) = build_pipeline(&dir, orders);

    pipeline.intent(intent_for("edparser.status")).expect("intent");
    let mut request = execute_for("inc-5");
    request.dry_run = true;
    let response = pipeline.execute(request).await.expect("dry run");
    assert_eq!(response.results[0].status, "approved");

    assert_eq!(events_of(&runtime, "inc-5", EventType::PolicyDecision), 1);
    assert_eq!(events_of(&runtime, "inc-5", EventType::ActionExecuted), 0);
    let actions = runtime.store.list_actions(&RequestId::new("req-1")).expect("actions");
    assert_eq!(actions[0].state, ActionState::Queued);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn high_risk_without_allowance_asks_for_confirmation() {
    let dir = TempDir::new().expect("tempdir");
    let orders = r#"{
        "conditions": { "STANDBY": { "allow": ["twitch.*"], "deny": [] } },
        "guards": {}
    }"#;
    let (_runtime, pipeline) = build_pipeline(&dir, orders);

    pipeline.intent(intent_for("twitch.send_chat")).expect("intent");
    let response = pipeline.execute(execute_for("inc-6")).await.expect("execute");
    assert_eq!(response.results[0].reason_code, Some(ReasonCode::DenyNeedsConfirmation));
    assert!(response.results[0].confirm_token.is_some());
}
