// crates/watchkeeper-core/src/core/bias.rs
// ============================================================================
// Module: Watchkeeper STT Bias Lexicon
// Description: Speech-recognition bias phrase entries.
// Purpose: Model the phrase lexicon consumed by the speech subsystem.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Bias entries weight the speech recognizer toward domain phrases. Entries
//! are unique by normalized phrase and mode scope; inactive entries stay in
//! the table for audit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Bias Entries
// ============================================================================

/// Speech bias lexicon entry.
///
/// # Invariants
/// - Unique by (`normalized`, `mode`).
/// - `weight` is non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasEntry {
    /// Phrase as spoken.
    pub phrase: String,
    /// Normalized matching form.
    pub normalized: String,
    /// Optional mode scope; `None` applies everywhere.
    pub mode: Option<String>,
    /// Non-negative recognition weight.
    pub weight: f64,
    /// Whether the entry is currently applied.
    pub active: bool,
}

impl BiasEntry {
    /// Normalizes a phrase to its matching form (lowercase, collapsed spaces).
    #[must_use]
    pub fn normalize(phrase: &str) -> String {
        phrase.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    }
}
