// crates/watchkeeper-core/src/core/time.rs
// ============================================================================
// Module: Watchkeeper Time Model
// Description: Canonical timestamp representation for state, events, and policy.
// Purpose: Provide deterministic, explicitly supplied time values across records.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Watchkeeper embeds explicit time values in every record to keep policy
//! evaluation and replay deterministic. The core engine never reads wall-clock
//! time directly; hosts supply timestamps at the boundary.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Canonical UTC timestamp in unix milliseconds.
///
/// # Invariants
/// - Values are explicitly provided by callers; the core never reads the wall clock.
/// - No validation is performed; monotonicity is a caller responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtcMillis(i64);

impl UtcMillis {
    /// Creates a timestamp from unix milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns this timestamp advanced by the provided milliseconds, saturating.
    #[must_use]
    pub const fn saturating_add_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Returns the signed difference `self - other` in milliseconds.
    #[must_use]
    pub const fn millis_since(self, other: Self) -> i64 {
        self.0.saturating_sub(other.0)
    }

    /// Formats the timestamp as an RFC 3339 UTC string.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::OutOfRange`] when the value cannot be represented
    /// as a calendar date.
    pub fn to_rfc3339(self) -> Result<String, TimeError> {
        let nanos = i128::from(self.0).saturating_mul(1_000_000);
        let datetime = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|err| TimeError::OutOfRange(err.to_string()))?;
        datetime.format(&Rfc3339).map_err(|err| TimeError::Format(err.to_string()))
    }

    /// Parses an RFC 3339 timestamp into unix milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Parse`] when the input is not valid RFC 3339.
    pub fn parse_rfc3339(input: &str) -> Result<Self, TimeError> {
        let datetime = OffsetDateTime::parse(input, &Rfc3339)
            .map_err(|err| TimeError::Parse(err.to_string()))?;
        let millis = datetime.unix_timestamp_nanos() / 1_000_000;
        i64::try_from(millis)
            .map(Self)
            .map_err(|_| TimeError::OutOfRange("timestamp exceeds i64 milliseconds".to_string()))
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Timestamp conversion errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum TimeError {
    /// Timestamp could not be parsed from RFC 3339 input.
    #[error("timestamp parse failure: {0}")]
    Parse(String),
    /// Timestamp could not be formatted as RFC 3339.
    #[error("timestamp format failure: {0}")]
    Format(String),
    /// Timestamp is outside the representable range.
    #[error("timestamp out of range: {0}")]
    OutOfRange(String),
}
