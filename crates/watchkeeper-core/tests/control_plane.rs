// crates/watchkeeper-core/tests/control_plane.rs
// ============================================================================
// Module: Control Plane Unit Tests
// Description: Action state machine and watch-condition derivation tests.
// Purpose: Validate legal transitions, terminal detection, and the condition
//          truth table.
// ============================================================================

//! ## Overview
//! Unit tests for the deterministic control-plane model:
//! - Action state machine legality and terminal classification
//! - Watch-condition derivation (degraded dominates, restricted while
//!   streaming without the game)
//! - Reason-code wire labels stay stable

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use serde_json::json;
use watchkeeper_core::ActionId;
use watchkeeper_core::ActionRecord;
use watchkeeper_core::ActionState;
use watchkeeper_core::ConditionFacts;
use watchkeeper_core::ProposedAction;
use watchkeeper_core::ReasonCode;
use watchkeeper_core::RequestId;
use watchkeeper_core::ToolName;
use watchkeeper_core::WatchCondition;
use watchkeeper_core::derive_condition;

// ============================================================================
// SECTION: State Machine Tests
// ============================================================================

fn queued_record() -> ActionRecord {
    ActionRecord::queued(RequestId::new("req-1"), &ProposedAction {
        action_id: ActionId::new("a1"),
        tool: ToolName::new("lights.scene"),
        params: json!({ "scene": "calm" }),
    })
}

#[test]
fn happy_path_transitions_are_legal() {
    let mut record = queued_record();
    record.transition(ActionState::Approved).expect("approve");
    record.transition(ActionState::Executing).expect("execute");
    record.transition(ActionState::Success).expect("succeed");
    assert!(record.state.is_terminal());
}

#[test]
fn denial_is_terminal() {
    let mut record = queued_record();
    record.transition(ActionState::Denied).expect("deny");
    assert!(record.state.is_terminal());
    assert!(record.transition(ActionState::Approved).is_err());
}

#[test]
fn illegal_jumps_are_rejected() {
    let mut record = queued_record();
    assert!(record.transition(ActionState::Executing).is_err());
    assert!(record.transition(ActionState::Success).is_err());
    record.transition(ActionState::Approved).expect("approve");
    assert!(record.transition(ActionState::Denied).is_err());
}

// ============================================================================
// SECTION: Condition Derivation Tests
// ============================================================================

#[test]
fn degraded_dominates_all_other_facts() {
    let condition = derive_condition(ConditionFacts {
        ed_running: true,
        streaming_active: true,
        degraded_services: true,
    });
    assert_eq!(condition, WatchCondition::Degraded);
}

#[test]
fn condition_truth_table() {
    let cases = [
        (false, false, WatchCondition::Standby),
        (true, false, WatchCondition::Game),
        (true, true, WatchCondition::Game),
        (false, true, WatchCondition::Restricted),
    ];
    for (ed_running, streaming_active, expected) in cases {
        let derived = derive_condition(ConditionFacts {
            ed_running,
            streaming_active,
            degraded_services: false,
        });
        assert_eq!(derived, expected, "ed={ed_running} streaming={streaming_active}");
    }
}

// ============================================================================
// SECTION: Reason Code Tests
// ============================================================================

#[test]
fn reason_labels_are_stable() {
    assert_eq!(ReasonCode::DenyExplicitlyDenied.as_str(), "DENY_EXPLICITLY_DENIED");
    assert_eq!(ReasonCode::ConfirmExpired.as_str(), "CONFIRM_EXPIRED");
    assert_eq!(ReasonCode::ToolNotImplemented.as_str(), "TOOL_NOT_IMPLEMENTED");
    assert_eq!(
        serde_json::to_value(ReasonCode::DenyRateLimit).expect("encode"),
        json!("DENY_RATE_LIMIT")
    );
}

#[test]
fn policy_denials_are_classified() {
    assert!(ReasonCode::DenyRateLimit.is_policy_denial());
    assert!(!ReasonCode::AdapterTimeout.is_policy_denial());
    assert!(!ReasonCode::DuplicateEventId.is_policy_denial());
}
