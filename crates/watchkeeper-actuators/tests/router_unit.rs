// crates/watchkeeper-actuators/tests/router_unit.rs
// ============================================================================
// Module: Tool Router Unit Tests
// Description: Kill-switch, routing, and adapter guard tests.
// Purpose: Validate that refused dispatch never reaches an adapter and that
//          guarded adapters fail closed.
// ============================================================================

//! ## Overview
//! Unit tests for the actuator layer:
//! - Unknown tools and kill-switches refuse before any adapter runs
//! - The media-key adapter rejects unknown operations
//! - The guarded keypress adapter requires an allow-listed foreground

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;
use serde_json::json;
use watchkeeper_actuators::Actuator;
use watchkeeper_actuators::ActuatorOutcome;
use watchkeeper_actuators::ForegroundProbe;
use watchkeeper_actuators::KeypressActuator;
use watchkeeper_actuators::MediaKeyActuator;
use watchkeeper_actuators::OutcomeStatus;
use watchkeeper_actuators::RecordingKeySynth;
use watchkeeper_actuators::RouteError;
use watchkeeper_actuators::ToolRouter;
use watchkeeper_actuators::clock;
use watchkeeper_core::ReasonCode;
use watchkeeper_core::SafetyClass;
use watchkeeper_core::ToolName;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Adapter that records whether it was reached.
struct TouchActuator {
    /// Invocation count.
    touches: Arc<Mutex<usize>>,
}

impl Actuator for TouchActuator {
    fn invoke(&self, _params: &Value) -> ActuatorOutcome {
        if let Ok(mut guard) = self.touches.lock() {
            *guard += 1;
        }
        ActuatorOutcome::success(None, clock::now(), clock::now())
    }
}

/// Probe returning a fixed foreground name.
struct FixedProbe(Option<&'static str>);

impl ForegroundProbe for FixedProbe {
    fn foreground(&self) -> Option<String> {
        self.0.map(ToString::to_string)
    }
}

// ============================================================================
// SECTION: Router Tests
// ============================================================================

#[test]
fn unknown_tools_fail_closed() {
    let router = ToolRouter::builder().switches(true, true).build();
    let result = router.dispatch(&ToolName::new("ghost.tool"), &json!({}));
    assert!(matches!(result, Err(RouteError::ToolNotImplemented(_))));
    assert_eq!(router.safety_class(&ToolName::new("ghost.tool")), None);
}

#[test]
fn actuator_kill_switch_refuses_before_the_adapter() {
    let touches = Arc::new(Mutex::new(0_usize));
    let router = ToolRouter::builder()
        .switches(false, true)
        .tool("lights.scene", SafetyClass::LowRisk, Arc::new(TouchActuator {
            touches: Arc::clone(&touches),
        }))
        .build();
    let result = router.dispatch(&ToolName::new("lights.scene"), &json!({}));
    assert!(matches!(result, Err(RouteError::ActuatorsDisabled)));
    assert_eq!(*touches.lock().expect("touch count"), 0);
}

#[test]
fn keypress_kill_switch_gates_synthetic_input_only() {
    let touches = Arc::new(Mutex::new(0_usize));
    let router = ToolRouter::builder()
        .switches(true, false)
        .tool("lights.scene", SafetyClass::LowRisk, Arc::new(TouchActuator {
            touches: Arc::clone(&touches),
        }))
        .synthetic_input_tool("input.keypress", SafetyClass::HighRisk, Arc::new(TouchActuator {
            touches: Arc::clone(&touches),
        }))
        .build();

    let refused = router.dispatch(&ToolName::new("input.keypress"), &json!({}));
    assert!(matches!(refused, Err(RouteError::KeypressDisabled)));

    let allowed = router.dispatch(&ToolName::new("lights.scene"), &json!({}));
    assert!(allowed.is_ok());
    assert_eq!(*touches.lock().expect("touch count"), 1);
}

#[test]
fn route_errors_map_to_stable_reason_codes() {
    assert_eq!(RouteError::ActuatorsDisabled.reason_code(), ReasonCode::ActuatorsDisabled);
    assert_eq!(RouteError::KeypressDisabled.reason_code(), ReasonCode::KeypressDisabled);
    assert_eq!(
        RouteError::ToolNotImplemented("x".to_string()).reason_code(),
        ReasonCode::ToolNotImplemented
    );
}

// ============================================================================
// SECTION: Media Key Tests
// ============================================================================

#[test]
fn media_adapter_presses_known_operations() {
    let adapter = MediaKeyActuator::new(RecordingKeySynth::default());
    let outcome = adapter.invoke(&json!({ "op": "next" }));
    assert_eq!(outcome.status, OutcomeStatus::Success);

    let outcome = adapter.invoke(&json!({ "op": "eject" }));
    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.error_code, Some(ReasonCode::AdapterError));
}

// ============================================================================
// SECTION: Keypress Guard Tests
// ============================================================================

#[test]
fn keypress_requires_an_allow_listed_foreground() {
    let adapter = KeypressActuator::new(
        RecordingKeySynth::default(),
        FixedProbe(Some("notepad.exe")),
        vec!["EliteDangerous64.exe".to_string()],
    );
    let outcome = adapter.invoke(&json!({ "key": "l" }));
    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.error_code, Some(ReasonCode::DenyForegroundMismatch));
}

#[test]
fn keypress_dispatches_when_the_game_owns_the_foreground() {
    let synth = RecordingKeySynth::default();
    let presses_view = synth.presses();
    assert!(presses_view.is_empty());
    let adapter = KeypressActuator::new(
        synth,
        FixedProbe(Some("elitedangerous64.exe")),
        vec!["EliteDangerous64.exe".to_string()],
    );
    let outcome = adapter.invoke(&json!({ "key": "l" }));
    assert_eq!(outcome.status, OutcomeStatus::Success);

    let outcome = adapter.invoke(&json!({}));
    assert_eq!(outcome.status, OutcomeStatus::Error);
}
