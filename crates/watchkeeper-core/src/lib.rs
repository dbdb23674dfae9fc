// crates/watchkeeper-core/src/lib.rs
// ============================================================================
// Module: Watchkeeper Core
// Description: Deterministic decision spine for the Watchkeeper control plane.
// Purpose: Provide the pure data model, Standing Orders policy engine, and
//          store capability traits consumed by every other crate.
// Dependencies: serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! Watchkeeper mediates between unreliable AI suggestions, external
//! collectors, and actuators. The rule is fixed: the AI proposes, the core
//! decides. This crate holds the deterministic parts — identifiers, state
//! keys, event and intent records, watch conditions, doorbell parsing, and
//! the pure policy evaluation over a declarative Standing Orders document.
//! All I/O lives in the store, actuator, and server crates, which depend on
//! the capability traits defined in [`interfaces`].

/// Pure data model and decision logic.
pub mod core;
/// Store capability traits.
pub mod interfaces;

pub use core::bias::BiasEntry;
pub use core::capability::CapabilityEntry;
pub use core::capability::CapabilityStatus;
pub use core::condition::ConditionFacts;
pub use core::condition::WatchCondition;
pub use core::condition::derive_condition;
pub use core::doorbell::DoorbellError;
pub use core::doorbell::DoorbellToken;
pub use core::doorbell::TwitchCategory;
pub use core::events::EventDraft;
pub use core::events::EventFilter;
pub use core::events::EventRecord;
pub use core::events::EventType;
pub use core::events::Severity;
pub use core::identifiers::ActionId;
pub use core::identifiers::ConfirmToken;
pub use core::identifiers::CorrelationId;
pub use core::identifiers::EventId;
pub use core::identifiers::IncidentId;
pub use core::identifiers::RequestId;
pub use core::identifiers::SessionId;
pub use core::identifiers::ToolName;
pub use core::intent::ActionRecord;
pub use core::intent::ActionState;
pub use core::intent::ActionTransitionError;
pub use core::intent::FeedbackRecord;
pub use core::intent::IntentRecord;
pub use core::intent::ProposedAction;
pub use core::intent::Rating;
pub use core::intent::SafetyClass;
pub use core::policy::ConditionRules;
pub use core::policy::DEFAULT_CONFIRM_WINDOW_MS;
pub use core::policy::PolicyRequest;
pub use core::policy::PolicyVerdict;
pub use core::policy::RateLimit;
pub use core::policy::StandingOrders;
pub use core::policy::StandingOrdersError;
pub use core::policy::ToolGuard;
pub use core::policy::ToolPattern;
pub use core::policy::evaluate;
pub use core::reason::ReasonCode;
pub use core::sitrep::AppsSnapshot;
pub use core::sitrep::HandoverNote;
pub use core::sitrep::Sitrep;
pub use core::state::SetState;
pub use core::state::StateEntry;
pub use core::state::StateWriteOutcome;
pub use core::statekey::INGEST_PREFIXES;
pub use core::statekey::StateKey;
pub use core::statekey::StateKeyError;
pub use core::time::TimeError;
pub use core::time::UtcMillis;
pub use core::twitch::CategoryCount;
pub use core::twitch::RedeemCount;
pub use core::twitch::TwitchCursor;
pub use core::twitch::TwitchEventRecord;
pub use core::twitch::TwitchUserSummary;
pub use interfaces::BiasLexicon;
pub use interfaces::CapabilityRegistry;
pub use interfaces::EventLog;
pub use interfaces::IntentLog;
pub use interfaces::StateStore;
pub use interfaces::StoreError;
pub use interfaces::TwitchLog;
