// crates/watchkeeper-store-sqlite/src/lib.rs
// ============================================================================
// Module: Watchkeeper SQLite Store
// Description: Durable control store backed by SQLite WAL.
// Purpose: Persist state, events, intents, actions, feedback, bias entries,
//          capabilities, and Twitch cursors behind the core capability traits.
// Dependencies: watchkeeper-core, rusqlite, serde, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! One store file, one writer. All mutations pass through a mutex-guarded
//! write connection; reads run on a small round-robin pool of read-only
//! connections under WAL. Committed events fan out on a broadcast channel for
//! SSE subscribers; a lagging subscriber misses events rather than blocking
//! the writer.

/// SQLite-backed store implementation.
pub mod store;

pub use store::SqliteControlStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
pub use store::StoreCounts;
