// crates/watchkeeper-core/src/core/intent.rs
// ============================================================================
// Module: Watchkeeper Intent Records
// Description: Intent envelopes, action records, state machine, and feedback.
// Purpose: Capture proposed actions and their audited execution lifecycle.
// Dependencies: crate::core::{identifiers, reason, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! An intent is the assist router's proposal envelope: narrated response,
//! clarifications, and an ordered array of proposed actions. Actions move
//! through a closed state machine
//! (`queued → approved | denied → executing → success | error | timeout`);
//! denied records capture a reason code. Feedback binds a rating to a request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::ActionId;
use crate::core::identifiers::RequestId;
use crate::core::identifiers::ToolName;
use crate::core::reason::ReasonCode;
use crate::core::time::UtcMillis;

// ============================================================================
// SECTION: Safety Classes
// ============================================================================

/// Tool risk classification.
///
/// # Invariants
/// - Variants are stable for serialization and policy matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyClass {
    /// No side effects.
    ReadOnly,
    /// Reversible, low-blast-radius side effects.
    LowRisk,
    /// Side effects requiring explicit gating.
    HighRisk,
}

impl SafetyClass {
    /// Returns the stable wire label for the class.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::LowRisk => "low_risk",
            Self::HighRisk => "high_risk",
        }
    }
}

// ============================================================================
// SECTION: Intent Records
// ============================================================================

/// Action proposed inside an intent envelope.
///
/// # Invariants
/// - `action_id` is unique within its owning request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Action identifier within the request.
    pub action_id: ActionId,
    /// Tool to invoke.
    pub tool: ToolName,
    /// Tool parameters.
    pub params: Value,
}

/// Intent record keyed by request id.
///
/// # Invariants
/// - Storage is idempotent by `request_id`; a replayed intent does not
///   duplicate actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRecord {
    /// Request identifier.
    pub request_id: RequestId,
    /// Operating mode label supplied by the router.
    pub mode: String,
    /// Domain label supplied by the router.
    pub domain: String,
    /// Urgency label supplied by the router.
    pub urgency: String,
    /// Raw user text.
    pub user_text: String,
    /// Whether the router judged tools necessary.
    pub needs_tools: bool,
    /// Clarification questions for the operator.
    pub clarifying_questions: Vec<String>,
    /// Retrieval references consulted by the router.
    pub retrieval_refs: Vec<String>,
    /// Ordered proposed actions.
    pub actions: Vec<ProposedAction>,
    /// Narrated response text.
    pub response_text: String,
    /// Timestamp the intent was recorded.
    pub received_at: UtcMillis,
}

// ============================================================================
// SECTION: Action State Machine
// ============================================================================

/// Action lifecycle states.
///
/// # Invariants
/// - Variants are stable for serialization.
/// - Legal transitions are enforced by [`ActionState::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Stored, not yet evaluated.
    Queued,
    /// Policy allowed the action.
    Approved,
    /// Policy or routing denied the action.
    Denied,
    /// Actuator dispatch in progress.
    Executing,
    /// Dispatch completed successfully.
    Success,
    /// Dispatch failed.
    Error,
    /// Dispatch exceeded the adapter timeout.
    Timeout,
}

impl ActionState {
    /// Returns the stable wire label for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    /// Parses a stable wire label into a state.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "queued" => Some(Self::Queued),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "executing" => Some(Self::Executing),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    /// Returns true when the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Success | Self::Error | Self::Timeout)
    }

    /// Returns true when the transition to `next` is legal.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Approved | Self::Denied)
                | (Self::Approved, Self::Executing)
                | (Self::Executing, Self::Success | Self::Error | Self::Timeout)
        )
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Illegal action state transition.
///
/// # Invariants
/// - Carries both endpoints for diagnostics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("illegal action transition: {from} -> {to}")]
pub struct ActionTransitionError {
    /// State the action was in.
    pub from: ActionState,
    /// State the transition requested.
    pub to: ActionState,
}

// ============================================================================
// SECTION: Action Records
// ============================================================================

/// Audited record of one action's lifecycle.
///
/// # Invariants
/// - Always references an existing intent record (`request_id`).
/// - `reason_code` is present iff `state == Denied`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Owning request identifier.
    pub request_id: RequestId,
    /// Action identifier within the request.
    pub action_id: ActionId,
    /// Tool to invoke.
    pub tool: ToolName,
    /// Tool parameters.
    pub params: Value,
    /// Risk classification assigned by the tool router.
    pub safety_class: Option<SafetyClass>,
    /// Current lifecycle state.
    pub state: ActionState,
    /// Denial reason when `state == Denied`.
    pub reason_code: Option<ReasonCode>,
    /// Actuator output when successful.
    pub output: Option<Value>,
    /// Stable error code when failed.
    pub error_code: Option<ReasonCode>,
    /// Human-readable error detail when failed.
    pub error_message: Option<String>,
    /// Dispatch start time.
    pub started_at: Option<UtcMillis>,
    /// Dispatch end time.
    pub ended_at: Option<UtcMillis>,
}

impl ActionRecord {
    /// Creates a queued action record from a proposal.
    #[must_use]
    pub fn queued(request_id: RequestId, proposal: &ProposedAction) -> Self {
        Self {
            request_id,
            action_id: proposal.action_id.clone(),
            tool: proposal.tool.clone(),
            params: proposal.params.clone(),
            safety_class: None,
            state: ActionState::Queued,
            reason_code: None,
            output: None,
            error_code: None,
            error_message: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// Transitions the record to `next`, enforcing the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`ActionTransitionError`] when the transition is illegal.
    pub fn transition(&mut self, next: ActionState) -> Result<(), ActionTransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(ActionTransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

// ============================================================================
// SECTION: Feedback
// ============================================================================

/// Operator rating for a request.
///
/// # Invariants
/// - Wire form is the integer `-1` or `+1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Rating {
    /// Negative rating.
    Down,
    /// Positive rating.
    Up,
}

impl TryFrom<i8> for Rating {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Down),
            1 => Ok(Self::Up),
            other => Err(format!("rating must be -1 or 1, got {other}")),
        }
    }
}

impl From<Rating> for i8 {
    fn from(value: Rating) -> Self {
        match value {
            Rating::Down => -1,
            Rating::Up => 1,
        }
    }
}

/// Feedback record bound to a request.
///
/// # Invariants
/// - References an existing intent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Rated request identifier.
    pub request_id: RequestId,
    /// Operator rating.
    pub rating: Rating,
    /// Optional correction text.
    pub correction_text: Option<String>,
    /// Timestamp the feedback was recorded.
    pub received_at: UtcMillis,
}
