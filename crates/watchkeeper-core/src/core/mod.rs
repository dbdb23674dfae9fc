// crates/watchkeeper-core/src/core/mod.rs
// ============================================================================
// Module: Watchkeeper Core Model
// Description: Pure deterministic types and decision logic.
// Purpose: Group the data model shared by every Watchkeeper component.
// Dependencies: serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! The core model is side-effect free: no I/O, no wall-clock reads, no token
//! minting. Hosts supply timestamps and randomness at the boundary.

/// Speech bias lexicon entries.
pub mod bias;
/// Capability health entries.
pub mod capability;
/// Watch conditions and their derivation.
pub mod condition;
/// Doorbell token parsing.
pub mod doorbell;
/// Append-only event records.
pub mod events;
/// Opaque identifiers.
pub mod identifiers;
/// Intent, action, and feedback records.
pub mod intent;
/// Standing Orders and policy evaluation.
pub mod policy;
/// Closed reason-code taxonomy.
pub mod reason;
/// Handover notes and sitrep payloads.
pub mod sitrep;
/// Latest-truth state entries.
pub mod state;
/// Validated state keys.
pub mod statekey;
/// Canonical timestamps.
pub mod time;
/// Stream-event records and cursors.
pub mod twitch;
