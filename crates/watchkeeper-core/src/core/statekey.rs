// crates/watchkeeper-core/src/core/statekey.rs
// ============================================================================
// Module: Watchkeeper State Keys
// Description: Dotted lowercase state keys with ingest prefix allow-listing.
// Purpose: Enforce the state-key grammar at the ingest boundary.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! State keys are dotted lowercase identifiers (`ed.telemetry.docked`). The
//! grammar requires at least two segments: the first segment is
//! `[a-z0-9]+`, subsequent segments are `[a-z0-9_]+`. External ingest is
//! additionally restricted to an allow-list of first segments; runtime-managed
//! keys (`app.*`, `twitch.*`, `jinx.*`) bypass the allow-list but must still
//! satisfy the grammar. Invalid keys fail closed with an explicit error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// First segments accepted on the external ingest path.
pub const INGEST_PREFIXES: &[&str] = &["ed", "music", "hw", "policy", "ai"];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// State key validation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateKeyError {
    /// Key does not match the dotted lowercase grammar.
    #[error("invalid state key shape: {0}")]
    InvalidShape(String),
    /// Key first segment is not in the ingest allow-list.
    #[error("state key prefix not allowed for ingest: {0}")]
    PrefixNotAllowed(String),
}

// ============================================================================
// SECTION: State Key
// ============================================================================

/// Validated dotted lowercase state key.
///
/// # Invariants
/// - At least two segments separated by `.`.
/// - First segment matches `[a-z0-9]+`; later segments match `[a-z0-9_]+`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(String);

impl StateKey {
    /// Parses a state key, enforcing the grammar only.
    ///
    /// Runtime-managed writers use this constructor; the ingest allow-list is
    /// not applied.
    ///
    /// # Errors
    ///
    /// Returns [`StateKeyError::InvalidShape`] when the grammar is violated.
    pub fn parse(raw: &str) -> Result<Self, StateKeyError> {
        validate_shape(raw)?;
        Ok(Self(raw.to_string()))
    }

    /// Parses a state key on the external ingest path.
    ///
    /// # Errors
    ///
    /// Returns [`StateKeyError::InvalidShape`] when the grammar is violated and
    /// [`StateKeyError::PrefixNotAllowed`] when the first segment is outside
    /// the ingest allow-list.
    pub fn parse_ingest(raw: &str) -> Result<Self, StateKeyError> {
        let key = Self::parse(raw)?;
        if !INGEST_PREFIXES.contains(&key.first_segment()) {
            return Err(StateKeyError::PrefixNotAllowed(raw.to_string()));
        }
        Ok(key)
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first dotted segment of the key.
    #[must_use]
    pub fn first_segment(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Returns true when the key starts with the provided dotted prefix.
    ///
    /// The prefix matches on segment boundaries: `ed.telemetry` matches
    /// `ed.telemetry.docked` but not `ed.telemetryx`.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        if self.0 == prefix {
            return true;
        }
        self.0.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('.'))
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates the dotted lowercase key grammar.
fn validate_shape(raw: &str) -> Result<(), StateKeyError> {
    let mut segments = raw.split('.');
    let Some(first) = segments.next() else {
        return Err(StateKeyError::InvalidShape(raw.to_string()));
    };
    if first.is_empty() || !first.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
        return Err(StateKeyError::InvalidShape(raw.to_string()));
    }
    let mut rest_count = 0_usize;
    for segment in segments {
        if segment.is_empty()
            || !segment
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(StateKeyError::InvalidShape(raw.to_string()));
        }
        rest_count += 1;
    }
    if rest_count == 0 {
        return Err(StateKeyError::InvalidShape(raw.to_string()));
    }
    Ok(())
}
