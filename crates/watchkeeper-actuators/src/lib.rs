// crates/watchkeeper-actuators/src/lib.rs
// ============================================================================
// Module: Watchkeeper Actuators
// Description: Tool routing and side-effect adapters.
// Purpose: Provide the closed registry of actuators behind global
//          kill-switches, with uniform outcomes for journaling.
// Dependencies: watchkeeper-core, reqwest, serde, serde_json, thiserror, url
// ============================================================================

//! ## Overview
//! Adapters are synchronous, idempotent for caller-driven retries, bounded by
//! adapter-specific timeouts, and never touch the store. The router resolves
//! tool names to risk classes and adapters, refusing dispatch while a
//! kill-switch is off.

/// Wall-clock sampling for outcome timing.
pub mod clock;
/// Key synthesis adapters.
pub mod keysynth;
/// Uniform adapter outcomes.
pub mod outcome;
/// External parser lifecycle.
pub mod parser;
/// Tool routing and kill-switches.
pub mod router;
/// HTTP webhook emitter.
pub mod webhook;

pub use keysynth::CommandKeySynth;
pub use keysynth::KeySynth;
pub use keysynth::KeySynthError;
pub use keysynth::KeypressActuator;
pub use keysynth::MediaKeyActuator;
pub use keysynth::RecordingKeySynth;
pub use outcome::Actuator;
pub use outcome::ActuatorOutcome;
pub use outcome::ForegroundProbe;
pub use outcome::OutcomeStatus;
pub use parser::ParserActuator;
pub use parser::ParserConfig;
pub use parser::ParserError;
pub use parser::ParserOp;
pub use parser::ParserStatus;
pub use parser::ParserSupervisor;
pub use router::RouteError;
pub use router::ToolBinding;
pub use router::ToolRouter;
pub use router::ToolRouterBuilder;
pub use webhook::DEFAULT_WEBHOOK_TIMEOUT_MS;
pub use webhook::WebhookEmitter;
