// crates/watchkeeper-core/tests/proptest_doorbell.rs
// ============================================================================
// Module: Doorbell Property Tests
// Description: Property-based parsing checks for doorbell tokens.
// Purpose: Parsing never panics on arbitrary input and well-formed tokens
//          round-trip their fields.
// ============================================================================

//! ## Overview
//! Property tests for the doorbell parser: arbitrary bytes never panic the
//! parser, and constructed well-formed tokens of both wire forms decode to
//! the fields they were built from.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use proptest::prelude::*;
use watchkeeper_core::DoorbellToken;
use watchkeeper_core::TwitchCategory;

proptest! {
    #[test]
    fn parse_never_panics(raw in ".*") {
        let _ = DoorbellToken::parse(&raw);
    }

    #[test]
    fn piped_tokens_round_trip(
        category_index in 0_usize..TwitchCategory::ALL.len(),
        timestamp in 1_i64..=4_102_444_800_000,
        seq in proptest::option::of(0_u64..1_000_000),
    ) {
        let category = TwitchCategory::ALL[category_index];
        let raw = match seq {
            None => format!("{}|{timestamp}", category.as_str()),
            Some(seq) => format!("{}|{timestamp}|{seq}", category.as_str()),
        };
        let token = DoorbellToken::parse(&raw).expect("well-formed token");
        prop_assert_eq!(token.category, category);
        prop_assert_eq!(token.timestamp_ms, timestamp);
        prop_assert_eq!(token.seq, seq);
    }

    #[test]
    fn packed_tokens_round_trip(
        category_index in 0_usize..TwitchCategory::ALL.len(),
        timestamp in 1_i64..=4_102_444_800_000,
    ) {
        let category = TwitchCategory::ALL[category_index];
        let raw = format!("{}{timestamp}", category.code());
        let token = DoorbellToken::parse(&raw).expect("well-formed token");
        prop_assert_eq!(token.category, category);
        prop_assert_eq!(token.timestamp_ms, timestamp);
    }
}
