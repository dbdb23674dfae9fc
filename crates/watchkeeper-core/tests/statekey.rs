// crates/watchkeeper-core/tests/statekey.rs
// ============================================================================
// Module: State Key Unit Tests
// Description: Grammar and allow-list tests for state keys.
// Purpose: Validate the dotted lowercase grammar and the ingest prefix gate.
// ============================================================================

//! ## Overview
//! Unit tests for state-key validation:
//! - Grammar acceptance and the documented boundary failures
//! - Ingest allow-list enforcement versus runtime-managed keys
//! - Segment-boundary prefix matching

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use watchkeeper_core::StateKey;
use watchkeeper_core::StateKeyError;

// ============================================================================
// SECTION: Grammar Tests
// ============================================================================

#[test]
fn accepts_dotted_lowercase_keys() {
    for raw in ["ed.running", "music.track.title", "hw.cpu.pct", "ed.telemetry.fuel_level"] {
        assert!(StateKey::parse(raw).is_ok(), "expected {raw} to parse");
    }
}

#[test]
fn rejects_documented_boundary_shapes() {
    for raw in ["ed..running", "System.CPU", "ed", "music-now_playing"] {
        assert!(
            matches!(StateKey::parse(raw), Err(StateKeyError::InvalidShape(_))),
            "expected {raw} to fail"
        );
    }
}

#[test]
fn rejects_underscore_in_first_segment() {
    assert!(StateKey::parse("my_app.running").is_err());
    assert!(StateKey::parse("app.my_flag").is_ok());
}

// ============================================================================
// SECTION: Allow-List Tests
// ============================================================================

#[test]
fn ingest_path_enforces_prefix_allow_list() {
    assert!(StateKey::parse_ingest("ed.running").is_ok());
    assert!(StateKey::parse_ingest("music.playing").is_ok());
    assert!(matches!(
        StateKey::parse_ingest("app.foreground"),
        Err(StateKeyError::PrefixNotAllowed(_))
    ));
    assert!(matches!(
        StateKey::parse_ingest("twitch.cursor"),
        Err(StateKeyError::PrefixNotAllowed(_))
    ));
}

#[test]
fn runtime_path_bypasses_the_allow_list() {
    assert!(StateKey::parse("app.foreground").is_ok());
    assert!(StateKey::parse("jinx.overlay.pulse").is_ok());
}

// ============================================================================
// SECTION: Prefix Tests
// ============================================================================

#[test]
fn prefix_matching_respects_segment_boundaries() {
    let key = StateKey::parse("ed.telemetry.docked").expect("key");
    assert!(key.has_prefix("ed"));
    assert!(key.has_prefix("ed.telemetry"));
    assert!(key.has_prefix("ed.telemetry.docked"));
    assert!(!key.has_prefix("ed.telem"));
    assert_eq!(key.first_segment(), "ed");
}
