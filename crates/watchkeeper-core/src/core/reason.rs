// crates/watchkeeper-core/src/core/reason.rs
// ============================================================================
// Module: Watchkeeper Reason Codes
// Description: Closed reason-code taxonomy carried in responses and events.
// Purpose: Provide stable wire labels for validation, policy, dispatch,
//          storage, and ingest outcomes.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every surfaced failure or policy denial carries exactly one reason code
//! from this closed taxonomy. Labels are stable wire strings; programmatic
//! consumers match on the label, not on message text.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Reason Codes
// ============================================================================

/// Closed reason-code taxonomy.
///
/// # Invariants
/// - Variants are stable for serialization and log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// State key failed grammar or allow-list validation.
    InvalidStateKey,
    /// Request body failed closed-schema validation.
    SchemaViolation,
    /// Execute call arrived without an incident id.
    MissingIncidentId,
    /// Tool matched a deny pattern for the current condition.
    DenyExplicitlyDenied,
    /// Tool matched no allow pattern for the current condition.
    DenyNotAllowedInCondition,
    /// Foreground process requirement was not met.
    DenyForegroundMismatch,
    /// Speech confidence was below the guard threshold.
    DenyLowSttConfidence,
    /// Rolling rate limit was exceeded.
    DenyRateLimit,
    /// Confirmation guard requires a valid confirm token.
    DenyNeedsConfirmation,
    /// Confirmation token was presented after its deadline.
    ConfirmExpired,
    /// Confirmation token is unknown or already consumed.
    ConfirmTokenUnknown,
    /// Global actuator kill-switch is off.
    ActuatorsDisabled,
    /// Keypress kill-switch is off.
    KeypressDisabled,
    /// Tool name has no registered actuator binding.
    ToolNotImplemented,
    /// Actuator did not complete within its timeout.
    AdapterTimeout,
    /// Actuator reported a failure.
    AdapterError,
    /// Event id already exists in the append-only log.
    DuplicateEventId,
    /// Store is unavailable for reads or writes.
    StoreUnavailable,
    /// Doorbell packet failed to parse (logged, not surfaced).
    DoorbellMalformed,
    /// Variable bridge API could not be reached.
    BridgeUnreachable,
}

impl ReasonCode {
    /// Returns the stable wire label for the reason code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidStateKey => "INVALID_STATE_KEY",
            Self::SchemaViolation => "SCHEMA_VIOLATION",
            Self::MissingIncidentId => "MISSING_INCIDENT_ID",
            Self::DenyExplicitlyDenied => "DENY_EXPLICITLY_DENIED",
            Self::DenyNotAllowedInCondition => "DENY_NOT_ALLOWED_IN_CONDITION",
            Self::DenyForegroundMismatch => "DENY_FOREGROUND_MISMATCH",
            Self::DenyLowSttConfidence => "DENY_LOW_STT_CONFIDENCE",
            Self::DenyRateLimit => "DENY_RATE_LIMIT",
            Self::DenyNeedsConfirmation => "DENY_NEEDS_CONFIRMATION",
            Self::ConfirmExpired => "CONFIRM_EXPIRED",
            Self::ConfirmTokenUnknown => "CONFIRM_TOKEN_UNKNOWN",
            Self::ActuatorsDisabled => "ACTUATORS_DISABLED",
            Self::KeypressDisabled => "KEYPRESS_DISABLED",
            Self::ToolNotImplemented => "TOOL_NOT_IMPLEMENTED",
            Self::AdapterTimeout => "ADAPTER_TIMEOUT",
            Self::AdapterError => "ADAPTER_ERROR",
            Self::DuplicateEventId => "DUPLICATE_EVENT_ID",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::DoorbellMalformed => "DOORBELL_MALFORMED",
            Self::BridgeUnreachable => "BRIDGE_UNREACHABLE",
        }
    }

    /// Returns true when the code is a policy denial (expected outcome, not a fault).
    #[must_use]
    pub const fn is_policy_denial(self) -> bool {
        matches!(
            self,
            Self::DenyExplicitlyDenied
                | Self::DenyNotAllowedInCondition
                | Self::DenyForegroundMismatch
                | Self::DenyLowSttConfidence
                | Self::DenyRateLimit
                | Self::DenyNeedsConfirmation
        )
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
