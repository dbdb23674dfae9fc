// crates/watchkeeper-actuators/src/outcome.rs
// ============================================================================
// Module: Actuator Outcomes
// Description: Uniform result shape for side-effect adapters.
// Purpose: Carry status, output, error detail, and timing for journaling.
// Dependencies: watchkeeper-core, serde, serde_json
// ============================================================================

//! ## Overview
//! Every adapter resolves to one outcome: success, error, or timeout, with
//! start and end times for the journal. Adapters never retry internally and
//! never mutate the store; the pipeline records outcomes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use watchkeeper_core::ReasonCode;
use watchkeeper_core::UtcMillis;

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Terminal status of one adapter invocation.
///
/// # Invariants
/// - Variants are stable for serialization and action-state mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Side effect applied.
    Success,
    /// Side effect failed.
    Error,
    /// Side effect did not complete within the adapter timeout.
    Timeout,
}

impl OutcomeStatus {
    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

/// Uniform adapter invocation outcome.
///
/// # Invariants
/// - `error_code` and `error_message` are present iff `status != Success`.
/// - `ended_at >= started_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorOutcome {
    /// Terminal status.
    pub status: OutcomeStatus,
    /// Adapter output on success.
    pub output: Option<Value>,
    /// Stable error code on failure.
    pub error_code: Option<ReasonCode>,
    /// Human-readable failure detail.
    pub error_message: Option<String>,
    /// Invocation start time.
    pub started_at: UtcMillis,
    /// Invocation end time.
    pub ended_at: UtcMillis,
}

impl ActuatorOutcome {
    /// Builds a success outcome.
    #[must_use]
    pub const fn success(output: Option<Value>, started_at: UtcMillis, ended_at: UtcMillis) -> Self {
        Self {
            status: OutcomeStatus::Success,
            output,
            error_code: None,
            error_message: None,
            started_at,
            ended_at,
        }
    }

    /// Builds an error outcome.
    #[must_use]
    pub fn error(
        code: ReasonCode,
        message: impl Into<String>,
        started_at: UtcMillis,
        ended_at: UtcMillis,
    ) -> Self {
        Self {
            status: OutcomeStatus::Error,
            output: None,
            error_code: Some(code),
            error_message: Some(message.into()),
            started_at,
            ended_at,
        }
    }

    /// Builds a timeout outcome.
    #[must_use]
    pub fn timeout(
        message: impl Into<String>,
        started_at: UtcMillis,
        ended_at: UtcMillis,
    ) -> Self {
        Self {
            status: OutcomeStatus::Timeout,
            output: None,
            error_code: Some(ReasonCode::AdapterTimeout),
            error_message: Some(message.into()),
            started_at,
            ended_at,
        }
    }
}

// ============================================================================
// SECTION: Actuator Trait
// ============================================================================

/// Side-effect adapter invoked by the execution pipeline.
///
/// Implementations are synchronous and bounded by an adapter-specific
/// timeout; callers hop through a blocking task when dispatching from async
/// code. Retries are the caller's decision.
pub trait Actuator: Send + Sync {
    /// Invokes the side effect with the provided parameters.
    fn invoke(&self, params: &Value) -> ActuatorOutcome;
}

/// Read-only probe for the current foreground process name.
///
/// The guarded keypress adapter consults this seam instead of reading the
/// store directly.
pub trait ForegroundProbe: Send + Sync {
    /// Returns the current foreground executable name, when known.
    fn foreground(&self) -> Option<String>;
}
