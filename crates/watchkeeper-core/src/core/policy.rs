// crates/watchkeeper-core/src/core/policy.rs
// ============================================================================
// Module: Watchkeeper Standing Orders
// Description: Declarative allow/deny document and the pure decision function.
// Purpose: Decide whether a proposed tool call may proceed under the current
//          watch condition, with a closed reason-code taxonomy.
// Dependencies: crate::core::{condition, identifiers, intent, reason, time},
//               serde, thiserror
// ============================================================================

//! ## Overview
//! The Standing Orders document maps each watch condition to allow/deny tool
//! patterns and each tool to a guard record. [`evaluate`] is a pure function:
//! no I/O, no clock reads, no token minting. Rate limiting is evaluated over a
//! caller-supplied window of prior invocation timestamps, and confirmation is
//! reported as a verdict for the pipeline to satisfy.
//! Invariants:
//! - Deny patterns are evaluated before allow patterns.
//! - The first matching rule wins; later checks never overturn a denial.
//! - Patterns support exact matches and a single trailing wildcard (`ns.*`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::condition::WatchCondition;
use crate::core::identifiers::ToolName;
use crate::core::intent::SafetyClass;
use crate::core::reason::ReasonCode;
use crate::core::time::UtcMillis;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default confirmation window in milliseconds.
pub const DEFAULT_CONFIRM_WINDOW_MS: u64 = 12_000;

// ============================================================================
// SECTION: Patterns
// ============================================================================

/// Tool name pattern: exact or single trailing wildcard.
///
/// # Invariants
/// - Wildcards appear only as a trailing `.*`; any other `*` placement is
///   rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPattern {
    /// Exact tool name match.
    Exact(String),
    /// Namespace prefix match (`lights.*` matches `lights.scene`).
    WildcardPrefix(String),
}

impl ToolPattern {
    /// Parses a pattern string into a matcher.
    ///
    /// # Errors
    ///
    /// Returns [`StandingOrdersError::InvalidPattern`] for empty patterns or
    /// wildcards anywhere but the trailing position.
    pub fn parse(raw: &str) -> Result<Self, StandingOrdersError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(StandingOrdersError::InvalidPattern(raw.to_string()));
        }
        if let Some(prefix) = trimmed.strip_suffix(".*") {
            if prefix.is_empty() || prefix.contains('*') {
                return Err(StandingOrdersError::InvalidPattern(raw.to_string()));
            }
            return Ok(Self::WildcardPrefix(prefix.to_string()));
        }
        if trimmed.contains('*') {
            return Err(StandingOrdersError::InvalidPattern(raw.to_string()));
        }
        Ok(Self::Exact(trimmed.to_string()))
    }

    /// Returns true when the pattern matches the provided tool name.
    #[must_use]
    pub fn matches(&self, tool: &ToolName) -> bool {
        match self {
            Self::Exact(value) => tool.as_str() == value,
            Self::WildcardPrefix(prefix) => {
                tool.as_str().strip_prefix(prefix).is_some_and(|rest| rest.starts_with('.'))
            }
        }
    }
}

impl Serialize for ToolPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Exact(value) => serializer.serialize_str(value),
            Self::WildcardPrefix(prefix) => serializer.serialize_str(&format!("{prefix}.*")),
        }
    }
}

impl<'de> Deserialize<'de> for ToolPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// SECTION: Document
// ============================================================================

/// Allow/deny pattern lists for one watch condition.
///
/// # Invariants
/// - Deny patterns are evaluated before allow patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionRules {
    /// Patterns permitting tool calls in this condition.
    #[serde(default)]
    pub allow: Vec<ToolPattern>,
    /// Patterns forbidding tool calls in this condition.
    #[serde(default)]
    pub deny: Vec<ToolPattern>,
}

/// Rolling rate limit for one tool.
///
/// # Invariants
/// - `window_sec` and `max_count` are both nonzero in a valid document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimit {
    /// Rolling window length in seconds.
    pub window_sec: u64,
    /// Maximum invocations within the window.
    pub max_count: u64,
}

/// Guard record for one tool.
///
/// # Invariants
/// - `safety_class` is always present; remaining guards are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolGuard {
    /// Risk classification for the tool.
    pub safety_class: SafetyClass,
    /// Foreground process names that must own the foreground.
    #[serde(default)]
    pub foreground_process_required: Option<Vec<String>>,
    /// Minimum speech-recognition confidence.
    #[serde(default)]
    pub min_stt_confidence: Option<f64>,
    /// Whether a confirm token is required.
    #[serde(default)]
    pub requires_confirmation: bool,
    /// Optional rolling rate limit.
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    /// Confirmation window override in milliseconds.
    #[serde(default)]
    pub confirm_window_ms: Option<u64>,
}

impl ToolGuard {
    /// Returns the effective confirmation window in milliseconds.
    #[must_use]
    pub const fn confirm_window_ms(&self) -> u64 {
        match self.confirm_window_ms {
            Some(value) => value,
            None => DEFAULT_CONFIRM_WINDOW_MS,
        }
    }
}

/// Declarative Standing Orders document.
///
/// # Invariants
/// - Condition keys are stable watch-condition labels.
/// - A tool without a guard record carries no extra checks beyond patterns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StandingOrders {
    /// Allow/deny rules keyed by watch-condition label.
    #[serde(default)]
    pub conditions: BTreeMap<String, ConditionRules>,
    /// Guard records keyed by tool name.
    #[serde(default)]
    pub guards: BTreeMap<String, ToolGuard>,
}

impl StandingOrders {
    /// Parses a Standing Orders document from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`StandingOrdersError::Parse`] for malformed JSON or schema
    /// violations and [`StandingOrdersError::InvalidGuard`] for out-of-range
    /// guard values.
    pub fn from_json(raw: &str) -> Result<Self, StandingOrdersError> {
        let document: Self =
            serde_json::from_str(raw).map_err(|err| StandingOrdersError::Parse(err.to_string()))?;
        document.validate()?;
        Ok(document)
    }

    /// Validates guard value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`StandingOrdersError::InvalidGuard`] for confidences outside
    /// `[0, 1]` or zero-valued rate limits.
    pub fn validate(&self) -> Result<(), StandingOrdersError> {
        for (tool, guard) in &self.guards {
            if let Some(confidence) = guard.min_stt_confidence
                && !(0.0..=1.0).contains(&confidence)
            {
                return Err(StandingOrdersError::InvalidGuard {
                    tool: tool.clone(),
                    detail: format!("min_stt_confidence out of range: {confidence}"),
                });
            }
            if let Some(limit) = guard.rate_limit
                && (limit.window_sec == 0 || limit.max_count == 0)
            {
                return Err(StandingOrdersError::InvalidGuard {
                    tool: tool.clone(),
                    detail: "rate_limit window and count must be nonzero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns the rules for a watch condition, if configured.
    #[must_use]
    pub fn rules_for(&self, condition: WatchCondition) -> Option<&ConditionRules> {
        self.conditions.get(condition.as_str())
    }

    /// Returns the guard for a tool, if configured.
    #[must_use]
    pub fn guard_for(&self, tool: &ToolName) -> Option<&ToolGuard> {
        self.guards.get(tool.as_str())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Standing Orders document errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StandingOrdersError {
    /// Document failed to parse.
    #[error("standing orders parse failure: {0}")]
    Parse(String),
    /// Pattern used a wildcard anywhere but the trailing position.
    #[error("invalid tool pattern: {0}")]
    InvalidPattern(String),
    /// Guard record carries an out-of-range value.
    #[error("invalid guard for tool {tool}: {detail}")]
    InvalidGuard {
        /// Tool the guard is bound to.
        tool: String,
        /// Validation detail.
        detail: String,
    },
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Execution context for one policy evaluation.
///
/// # Invariants
/// - `recent_invocations` holds prior accepted invocation times for the tool,
///   oldest first; the caller supplies the window.
/// - `confirm_satisfied` is set only by the pipeline's confirm path after
///   validating a token.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRequest<'a> {
    /// Current watch condition.
    pub condition: WatchCondition,
    /// Tool proposed for invocation.
    pub tool: &'a ToolName,
    /// Current `app.foreground` value, when known.
    pub foreground: Option<&'a str>,
    /// Speech-recognition confidence attached to the call.
    pub stt_confidence: Option<f64>,
    /// Prior accepted invocation times for the tool.
    pub recent_invocations: &'a [UtcMillis],
    /// Evaluation time supplied by the caller.
    pub now: UtcMillis,
    /// Whether a confirmation guard is already satisfied.
    pub confirm_satisfied: bool,
}

/// Policy verdict for one proposed action.
///
/// # Invariants
/// - `Deny` carries a policy-denial reason code.
/// - `NeedsConfirmation` leaves token minting to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum PolicyVerdict {
    /// The action may proceed.
    Allow,
    /// The action is denied.
    Deny {
        /// Denial reason code.
        reason: ReasonCode,
    },
    /// The action requires a confirm token within the window.
    NeedsConfirmation {
        /// Confirmation window in milliseconds.
        window_ms: u64,
    },
}

/// Evaluates the Standing Orders for one proposed action.
///
/// Decision order, first hit wins: explicit deny, missing allow, foreground
/// guard, speech-confidence guard, rate limit, confirmation guard, allow.
#[must_use]
pub fn evaluate(orders: &StandingOrders, request: &PolicyRequest<'_>) -> PolicyVerdict {
    let rules = orders.rules_for(request.condition);
    if let Some(rules) = rules
        && rules.deny.iter().any(|pattern| pattern.matches(request.tool))
    {
        return PolicyVerdict::Deny {
            reason: ReasonCode::DenyExplicitlyDenied,
        };
    }
    let allowed =
        rules.is_some_and(|rules| rules.allow.iter().any(|pattern| pattern.matches(request.tool)));
    if !allowed {
        return PolicyVerdict::Deny {
            reason: ReasonCode::DenyNotAllowedInCondition,
        };
    }

    let Some(guard) = orders.guard_for(request.tool) else {
        return PolicyVerdict::Allow;
    };

    if let Some(required) = &guard.foreground_process_required {
        let foreground_ok = request
            .foreground
            .is_some_and(|current| required.iter().any(|name| name.eq_ignore_ascii_case(current)));
        if !foreground_ok {
            return PolicyVerdict::Deny {
                reason: ReasonCode::DenyForegroundMismatch,
            };
        }
    }

    if let Some(min_confidence) = guard.min_stt_confidence {
        let confident = request.stt_confidence.is_some_and(|value| value >= min_confidence);
        if !confident {
            return PolicyVerdict::Deny {
                reason: ReasonCode::DenyLowSttConfidence,
            };
        }
    }

    if let Some(limit) = guard.rate_limit && rate_exceeded(limit, request) {
        return PolicyVerdict::Deny {
            reason: ReasonCode::DenyRateLimit,
        };
    }

    if guard.requires_confirmation && !request.confirm_satisfied {
        return PolicyVerdict::NeedsConfirmation {
            window_ms: guard.confirm_window_ms(),
        };
    }

    PolicyVerdict::Allow
}

/// Returns true when the rolling rate limit is exceeded.
fn rate_exceeded(limit: RateLimit, request: &PolicyRequest<'_>) -> bool {
    let window_ms = i64::try_from(limit.window_sec.saturating_mul(1_000)).unwrap_or(i64::MAX);
    let window_start = request.now.saturating_add_millis(-window_ms);
    let in_window = request
        .recent_invocations
        .iter()
        .filter(|ts| **ts > window_start && **ts <= request.now)
        .count();
    u64::try_from(in_window).unwrap_or(u64::MAX) >= limit.max_count
}
