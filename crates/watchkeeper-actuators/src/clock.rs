// crates/watchkeeper-actuators/src/clock.rs
// ============================================================================
// Module: Actuator Clock
// Description: Wall-clock sampling for outcome timing.
// Purpose: Stamp adapter start and end times outside the pure core.
// Dependencies: watchkeeper-core
// ============================================================================

//! ## Overview
//! Adapters stamp their own start and end times. The core stays clock-free;
//! this helper is the single wall-clock read in the actuator crate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use watchkeeper_core::UtcMillis;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Returns the current wall clock as [`UtcMillis`].
#[must_use]
pub fn now() -> UtcMillis {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0);
    UtcMillis::from_unix_millis(millis)
}
