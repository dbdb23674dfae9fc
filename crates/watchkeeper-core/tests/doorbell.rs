// crates/watchkeeper-core/tests/doorbell.rs
// ============================================================================
// Module: Doorbell Token Unit Tests
// Description: Wire-form parsing tests for the UDP doorbell.
// Purpose: Validate both accepted forms and the fail-closed handling of
//          malformed tokens.
// ============================================================================

//! ## Overview
//! Unit tests for doorbell parsing:
//! - Pipe form with label or numeric category and optional sequence
//! - Packed numeric form with the fixed category table
//! - Malformed inputs parse to errors, never panics

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use watchkeeper_core::DoorbellError;
use watchkeeper_core::DoorbellToken;
use watchkeeper_core::TwitchCategory;

// ============================================================================
// SECTION: Pipe Form Tests
// ============================================================================

#[test]
fn parses_pipe_form_with_label() {
    let token = DoorbellToken::parse("REDEEM|1700000000000").expect("token");
    assert_eq!(token.category, TwitchCategory::Redeem);
    assert_eq!(token.timestamp_ms, 1_700_000_000_000);
    assert_eq!(token.seq, None);
}

#[test]
fn parses_pipe_form_with_numeric_category_and_seq() {
    let token = DoorbellToken::parse("101|1700000000000|7").expect("token");
    assert_eq!(token.category, TwitchCategory::Chat);
    assert_eq!(token.seq, Some(7));
}

#[test]
fn rejects_extra_pipe_fields() {
    assert!(DoorbellToken::parse("CHAT|1|2|3").is_err());
}

// ============================================================================
// SECTION: Packed Form Tests
// ============================================================================

#[test]
fn parses_packed_numeric_form() {
    let token = DoorbellToken::parse("1061700000000000").expect("token");
    assert_eq!(token.category, TwitchCategory::Raid);
    assert_eq!(token.timestamp_ms, 1_700_000_000_000);
    assert_eq!(token.seq, None);
}

#[test]
fn category_table_round_trips() {
    for category in TwitchCategory::ALL {
        assert_eq!(TwitchCategory::from_code(category.code()), Some(*category));
        assert_eq!(TwitchCategory::from_label(category.as_str()), Some(*category));
    }
}

// ============================================================================
// SECTION: Malformed Tests
// ============================================================================

#[test]
fn malformed_tokens_fail_closed() {
    for raw in ["", "   ", "101", "999", "CHAT|", "CHAT|abc", "CHAT|-5", "FROG|1700000000000"] {
        assert!(DoorbellToken::parse(raw).is_err(), "expected {raw:?} to fail");
    }
}

#[test]
fn unknown_packed_category_is_rejected() {
    assert!(matches!(
        DoorbellToken::parse("9991700000000000"),
        Err(DoorbellError::UnknownCategory(_))
    ));
}
