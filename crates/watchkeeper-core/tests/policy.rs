// crates/watchkeeper-core/tests/policy.rs
// ============================================================================
// Module: Standing Orders Unit Tests
// Description: Decision-order and guard tests for the policy engine.
// Purpose: Validate first-hit-wins ordering, pattern matching, rate windows,
//          and confirmation reporting.
// ============================================================================

//! ## Overview
//! Unit tests for the pure policy evaluation:
//! - Deny-before-allow ordering and wildcard patterns
//! - Foreground and speech-confidence guards
//! - Rolling rate limits at the window boundary
//! - Confirmation guards and their satisfaction flag

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use watchkeeper_core::ConditionRules;
use watchkeeper_core::PolicyRequest;
use watchkeeper_core::PolicyVerdict;
use watchkeeper_core::RateLimit;
use watchkeeper_core::ReasonCode;
use watchkeeper_core::SafetyClass;
use watchkeeper_core::StandingOrders;
use watchkeeper_core::ToolGuard;
use watchkeeper_core::ToolName;
use watchkeeper_core::ToolPattern;
use watchkeeper_core::UtcMillis;
use watchkeeper_core::WatchCondition;
use watchkeeper_core::evaluate;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn orders_with(condition: &str, allow: &[&str], deny: &[&str]) -> StandingOrders {
    let mut orders = StandingOrders::default();
    orders.conditions.insert(condition.to_string(), ConditionRules {
        allow: allow.iter().map(|raw| ToolPattern::parse(raw).expect("allow pattern")).collect(),
        deny: deny.iter().map(|raw| ToolPattern::parse(raw).expect("deny pattern")).collect(),
    });
    orders
}

fn guard(safety_class: SafetyClass) -> ToolGuard {
    ToolGuard {
        safety_class,
        foreground_process_required: None,
        min_stt_confidence: None,
        requires_confirmation: false,
        rate_limit: None,
        confirm_window_ms: None,
    }
}

fn request<'a>(tool: &'a ToolName, recent: &'a [UtcMillis]) -> PolicyRequest<'a> {
    PolicyRequest {
        condition: WatchCondition::Standby,
        tool,
        foreground: None,
        stt_confidence: None,
        recent_invocations: recent,
        now: UtcMillis::from_unix_millis(1_700_000_000_000),
        confirm_satisfied: false,
    }
}

// ============================================================================
// SECTION: Pattern Tests
// ============================================================================

#[test]
fn wildcard_matches_namespace_members_only() {
    let pattern = ToolPattern::parse("twitch.*").expect("pattern");
    assert!(pattern.matches(&ToolName::new("twitch.send_chat")));
    assert!(!pattern.matches(&ToolName::new("twitch")));
    assert!(!pattern.matches(&ToolName::new("twitchy.send")));
}

#[test]
fn non_trailing_wildcards_are_rejected() {
    assert!(ToolPattern::parse("*.send").is_err());
    assert!(ToolPattern::parse("tw*tch.send").is_err());
    assert!(ToolPattern::parse(".*").is_err());
    assert!(ToolPattern::parse("").is_err());
}

// ============================================================================
// SECTION: Decision Order Tests
// ============================================================================

#[test]
fn explicit_deny_wins_over_allow() {
    let orders = orders_with("STANDBY", &["twitch.*"], &["twitch.*"]);
    let tool = ToolName::new("twitch.send_chat");
    let verdict = evaluate(&orders, &request(&tool, &[]));
    assert_eq!(verdict, PolicyVerdict::Deny {
        reason: ReasonCode::DenyExplicitlyDenied,
    });
}

#[test]
fn missing_allow_denies_in_condition() {
    let orders = orders_with("STANDBY", &["lights.*"], &[]);
    let tool = ToolName::new("twitch.send_chat");
    let verdict = evaluate(&orders, &request(&tool, &[]));
    assert_eq!(verdict, PolicyVerdict::Deny {
        reason: ReasonCode::DenyNotAllowedInCondition,
    });
}

#[test]
fn unknown_condition_denies_everything() {
    let orders = orders_with("GAME", &["lights.*"], &[]);
    let tool = ToolName::new("lights.scene");
    let verdict = evaluate(&orders, &request(&tool, &[]));
    assert_eq!(verdict, PolicyVerdict::Deny {
        reason: ReasonCode::DenyNotAllowedInCondition,
    });
}

#[test]
fn foreground_guard_denies_on_mismatch() {
    let mut orders = orders_with("STANDBY", &["input.*"], &[]);
    let mut input_guard = guard(SafetyClass::HighRisk);
    input_guard.foreground_process_required = Some(vec!["EliteDangerous64.exe".to_string()]);
    orders.guards.insert("input.keypress".to_string(), input_guard);

    let tool = ToolName::new("input.keypress");
    let mut req = request(&tool, &[]);
    req.foreground = Some("notepad.exe");
    assert_eq!(evaluate(&orders, &req), PolicyVerdict::Deny {
        reason: ReasonCode::DenyForegroundMismatch,
    });

    req.foreground = Some("elitedangerous64.exe");
    assert_eq!(evaluate(&orders, &req), PolicyVerdict::Allow);
}

#[test]
fn low_confidence_denies_when_guarded() {
    let mut orders = orders_with("STANDBY", &["media.*"], &[]);
    let mut media_guard = guard(SafetyClass::LowRisk);
    media_guard.min_stt_confidence = Some(0.7);
    orders.guards.insert("media.key".to_string(), media_guard);

    let tool = ToolName::new("media.key");
    let mut req = request(&tool, &[]);
    req.stt_confidence = Some(0.5);
    assert_eq!(evaluate(&orders, &req), PolicyVerdict::Deny {
        reason: ReasonCode::DenyLowSttConfidence,
    });

    req.stt_confidence = None;
    assert_eq!(evaluate(&orders, &req), PolicyVerdict::Deny {
        reason: ReasonCode::DenyLowSttConfidence,
    });

    req.stt_confidence = Some(0.7);
    assert_eq!(evaluate(&orders, &req), PolicyVerdict::Allow);
}

// ============================================================================
// SECTION: Rate Limit Tests
// ============================================================================

#[test]
fn fourth_call_in_window_is_rate_limited() {
    let mut orders = orders_with("STANDBY", &["lights.*"], &[]);
    let mut lights_guard = guard(SafetyClass::LowRisk);
    lights_guard.rate_limit = Some(RateLimit {
        window_sec: 60,
        max_count: 3,
    });
    orders.guards.insert("lights.scene".to_string(), lights_guard);

    let tool = ToolName::new("lights.scene");
    let now = 1_700_000_000_000_i64;
    let recent = [
        UtcMillis::from_unix_millis(now - 50_000),
        UtcMillis::from_unix_millis(now - 30_000),
        UtcMillis::from_unix_millis(now - 10_000),
    ];
    let mut req = request(&tool, &recent);
    req.now = UtcMillis::from_unix_millis(now);
    assert_eq!(evaluate(&orders, &req), PolicyVerdict::Deny {
        reason: ReasonCode::DenyRateLimit,
    });

    // Just past the window boundary the oldest invocation ages out.
    let recent = [
        UtcMillis::from_unix_millis(now - 60_001),
        UtcMillis::from_unix_millis(now - 30_000),
        UtcMillis::from_unix_millis(now - 10_000),
    ];
    let mut req = request(&tool, &recent);
    req.now = UtcMillis::from_unix_millis(now);
    assert_eq!(evaluate(&orders, &req), PolicyVerdict::Allow);
}

// ============================================================================
// SECTION: Confirmation Tests
// ============================================================================

#[test]
fn confirmation_guard_reports_window_until_satisfied() {
    let mut orders = orders_with("STANDBY", &["input.*"], &[]);
    let mut input_guard = guard(SafetyClass::HighRisk);
    input_guard.requires_confirmation = true;
    input_guard.confirm_window_ms = Some(5_000);
    orders.guards.insert("input.keypress".to_string(), input_guard);

    let tool = ToolName::new("input.keypress");
    let mut req = request(&tool, &[]);
    assert_eq!(evaluate(&orders, &req), PolicyVerdict::NeedsConfirmation {
        window_ms: 5_000,
    });

    req.confirm_satisfied = true;
    assert_eq!(evaluate(&orders, &req), PolicyVerdict::Allow);
}

#[test]
fn document_validation_rejects_bad_guards() {
    let raw = r#"{
        "conditions": { "GAME": { "allow": ["lights.*"], "deny": [] } },
        "guards": {
            "lights.scene": { "safety_class": "low_risk", "min_stt_confidence": 1.5 }
        }
    }"#;
    assert!(StandingOrders::from_json(raw).is_err());

    let raw = r#"{
        "guards": {
            "lights.scene": {
                "safety_class": "low_risk",
                "rate_limit": { "window_sec": 0, "max_count": 3 }
            }
        }
    }"#;
    assert!(StandingOrders::from_json(raw).is_err());
}
