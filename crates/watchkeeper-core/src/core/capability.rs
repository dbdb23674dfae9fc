// crates/watchkeeper-core/src/core/capability.rs
// ============================================================================
// Module: Watchkeeper Capabilities
// Description: Named capability health entries.
// Purpose: Track service health feeding degraded-condition derivation.
// Dependencies: crate::core::time, serde
// ============================================================================

//! ## Overview
//! Capabilities name the services the control plane depends on (store,
//! bridge, telemetry feed). The supervisor marks them degraded or unavailable
//! on probe failures; any unavailable required capability forces the
//! `DEGRADED` watch condition.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::time::UtcMillis;

// ============================================================================
// SECTION: Capability Entries
// ============================================================================

/// Capability health status.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    /// Operating normally.
    Available,
    /// Operating with reduced function.
    Degraded,
    /// Not operating.
    Unavailable,
}

impl CapabilityStatus {
    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Named capability entry with diagnostics.
///
/// # Invariants
/// - `name` is unique in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    /// Capability name.
    pub name: String,
    /// Current status.
    pub status: CapabilityStatus,
    /// Diagnostic detail for the current status.
    pub detail: Option<String>,
    /// Time of the last status write.
    pub updated_at: UtcMillis,
}
