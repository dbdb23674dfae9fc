// crates/watchkeeper-server/src/lib.rs
// ============================================================================
// Module: Watchkeeper Server
// Description: Runtime assembly for the Watchkeeper control plane.
// Purpose: Provide configuration loading, the HTTP surface, the execution
//          pipeline, supervisor loops, and the Twitch ingest gate.
// Dependencies: watchkeeper-core, watchkeeper-actuators, watchkeeper-store-sqlite,
//               axum, tokio, reqwest, serde, toml, tracing
// ============================================================================

//! ## Overview
//! This crate assembles the deterministic core into a running process. The
//! store is the only shared mutable resource; the supervisor, pipeline, and
//! ingest gate each hold store capabilities and never call one another.

/// SAMMI bridge client and chat adapter.
pub mod bridge;
/// Configuration loading and validation.
pub mod config;
/// HTTP surface.
pub mod http;
/// Twitch ingest gate.
pub mod ingest;
/// Execution pipeline.
pub mod pipeline;
/// Shared runtime context.
pub mod runtime;
/// Process assembly and shutdown.
pub mod server;
/// Supervisor loops.
pub mod supervisor;

pub use config::ConfigError;
pub use config::WatchkeeperConfig;
pub use pipeline::ExecutionPipeline;
pub use runtime::Runtime;
pub use server::ServerError;
pub use server::run;
