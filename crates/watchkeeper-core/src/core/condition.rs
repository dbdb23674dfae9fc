// crates/watchkeeper-core/src/core/condition.rs
// ============================================================================
// Module: Watchkeeper Watch Conditions
// Description: Operational mode labels and their deterministic derivation.
// Purpose: Provide the policy key computed from store facts.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The watch condition is the operational mode label used as the policy key.
//! Derivation is a pure function over three store facts: whether the game is
//! running, whether a stream is active, and whether any required capability is
//! degraded. Degradation dominates; restriction applies while streaming
//! without the game.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Watch Condition
// ============================================================================

/// Operational mode label used as the policy key.
///
/// # Invariants
/// - Variants are stable for serialization and standing-orders lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchCondition {
    /// The game is in the foreground of operations.
    Game,
    /// Nothing notable is running.
    Standby,
    /// A stream is active without the game; risky tools are narrowed.
    Restricted,
    /// A required capability is degraded or unavailable.
    Degraded,
}

impl WatchCondition {
    /// Returns the stable wire label for the condition.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Game => "GAME",
            Self::Standby => "STANDBY",
            Self::Restricted => "RESTRICTED",
            Self::Degraded => "DEGRADED",
        }
    }

    /// Parses a stable wire label into a condition.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "GAME" => Some(Self::Game),
            "STANDBY" => Some(Self::Standby),
            "RESTRICTED" => Some(Self::Restricted),
            "DEGRADED" => Some(Self::Degraded),
            _ => None,
        }
    }
}

impl fmt::Display for WatchCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Derivation
// ============================================================================

/// Facts consumed by watch-condition derivation.
///
/// # Invariants
/// - All fields are snapshots read from the store at one observation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionFacts {
    /// Whether the game process is running.
    pub ed_running: bool,
    /// Whether a stream is active.
    pub streaming_active: bool,
    /// Whether any required capability is degraded or unavailable.
    pub degraded_services: bool,
}

/// Derives the watch condition from store facts.
#[must_use]
pub const fn derive_condition(facts: ConditionFacts) -> WatchCondition {
    if facts.degraded_services {
        return WatchCondition::Degraded;
    }
    if facts.ed_running {
        return WatchCondition::Game;
    }
    if facts.streaming_active {
        return WatchCondition::Restricted;
    }
    WatchCondition::Standby
}
