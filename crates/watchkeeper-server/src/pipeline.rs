// crates/watchkeeper-server/src/pipeline.rs
// ============================================================================
// Module: Execution Pipeline
// Description: Intent intake, policy gating, confirmation workflow, actuator
//              dispatch, and outcome journaling.
// Purpose: Drive the policy-decide-dispatch-journal sequence with per-incident
//          serialization and single-use confirm tokens.
// Dependencies: watchkeeper-core, watchkeeper-actuators, tokio, serde,
//               serde_json, thiserror
// ============================================================================

//! ## Overview
//! Every execute call names an incident; all records it emits carry that
//! incident as correlation id. Actions run sequentially in declared order and
//! execute calls are serialized per incident. Confirmation guards deny with a
//! freshly minted single-use token and a deadline; presenting the token on
//! `/confirm` re-runs policy with the guard satisfied and dispatches.
//! Invariants:
//! - A terminal action has exactly one `ACTION_EXECUTED` or `ACTION_DENIED`
//!   event.
//! - An already-successful action re-executed under the same incident is a
//!   recorded no-op.
//! - Tokens are consumed at most once; expiry answers `CONFIRM_EXPIRED`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use watchkeeper_actuators::ActuatorOutcome;
use watchkeeper_actuators::OutcomeStatus;
use watchkeeper_core::ActionId;
use watchkeeper_core::ActionRecord;
use watchkeeper_core::ActionState;
use watchkeeper_core::ConfirmToken;
use watchkeeper_core::CorrelationId;
use watchkeeper_core::EventType;
use watchkeeper_core::FeedbackRecord;
use watchkeeper_core::IncidentId;
use watchkeeper_core::IntentLog;
use watchkeeper_core::IntentRecord;
use watchkeeper_core::PolicyRequest;
use watchkeeper_core::PolicyVerdict;
use watchkeeper_core::ProposedAction;
use watchkeeper_core::Rating;
use watchkeeper_core::ReasonCode;
use watchkeeper_core::RequestId;
use watchkeeper_core::SafetyClass;
use watchkeeper_core::Severity;
use watchkeeper_core::StateKey;
use watchkeeper_core::StateStore;
use watchkeeper_core::StoreError;
use watchkeeper_core::ToolName;
use watchkeeper_core::UtcMillis;
use watchkeeper_core::WatchCondition;
use watchkeeper_core::evaluate;

use crate::runtime::EmitEvent;
use crate::runtime::Runtime;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Event source label for pipeline emissions.
const SOURCE: &str = "pipeline";
/// Rate-limit bookkeeping horizon in milliseconds.
const INVOCATION_HORIZON_MS: i64 = 3_600_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Pipeline errors surfaced to the HTTP layer.
///
/// # Invariants
/// - Policy denials are not errors; they appear in per-action results.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Execute call arrived without an incident id.
    #[error("incident id is required")]
    MissingIncidentId,
    /// Request id references no stored intent.
    #[error("unknown request id: {0}")]
    UnknownRequest(String),
    /// Store operation failed.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    /// Blocking dispatch task failed to join.
    #[error("dispatch task failure: {0}")]
    DispatchJoin(String),
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Intent intake request.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntentRequest {
    /// Request identifier (idempotency key).
    pub request_id: RequestId,
    /// Operating mode label.
    pub mode: String,
    /// Domain label.
    pub domain: String,
    /// Urgency label.
    pub urgency: String,
    /// Raw user text.
    pub user_text: String,
    /// Whether the router judged tools necessary.
    #[serde(default)]
    pub needs_tools: bool,
    /// Clarification questions.
    #[serde(default)]
    pub clarifying_questions: Vec<String>,
    /// Retrieval references.
    #[serde(default)]
    pub retrieval_refs: Vec<String>,
    /// Ordered proposed actions.
    #[serde(default)]
    pub actions: Vec<ProposedAction>,
    /// Narrated response text.
    #[serde(default)]
    pub response_text: String,
}

/// Intent intake response.
#[derive(Debug, Clone, Serialize)]
pub struct IntentResponse {
    /// Stored request identifier.
    pub request_id: RequestId,
    /// Number of queued actions.
    pub queued_actions: usize,
}

/// Execute request.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecuteRequest {
    /// Request identifier of the stored intent.
    pub request_id: RequestId,
    /// Incident identifier correlating this operator request.
    pub incident_id: Option<IncidentId>,
    /// Watch-condition override for evaluation.
    #[serde(default)]
    pub watch_condition: Option<String>,
    /// Speech confidence attached to the call.
    #[serde(default)]
    pub stt_confidence: Option<f64>,
    /// Evaluate policy without dispatching.
    #[serde(default)]
    pub dry_run: bool,
    /// Permit high-risk actions without a confirmation round-trip.
    #[serde(default)]
    pub allow_high_risk: bool,
    /// Operator confirmed verbally before the call.
    #[serde(default)]
    pub user_confirmed: bool,
    /// Time of the verbal confirmation.
    #[serde(default)]
    pub confirmed_at_utc: Option<String>,
}

/// Per-action decision and outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    /// Action identifier.
    pub action_id: ActionId,
    /// Tool name.
    pub tool: ToolName,
    /// Terminal or evaluated state label.
    pub status: String,
    /// Denial or failure reason, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<ReasonCode>,
    /// Confirm token minted for a confirmation denial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm_token: Option<ConfirmToken>,
    /// Token deadline in unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm_by_ts: Option<i64>,
    /// Adapter output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// True when the action was already successful and nothing ran.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

/// Execute response.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResponse {
    /// Request identifier.
    pub request_id: RequestId,
    /// Incident identifier.
    pub incident_id: IncidentId,
    /// Watch condition the call was evaluated under.
    pub watch_condition: WatchCondition,
    /// Whether dispatch was skipped.
    pub dry_run: bool,
    /// Per-action results in declared order.
    pub results: Vec<ActionResult>,
}

/// Confirm request.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfirmRequest {
    /// Incident the token was minted under.
    pub incident_id: IncidentId,
    /// Single-use confirm token.
    pub confirm_token: ConfirmToken,
}

/// Confirm response.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmResponse {
    /// Incident identifier.
    pub incident_id: IncidentId,
    /// Result of the confirmed action.
    pub result: ActionResult,
}

/// Feedback request.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedbackRequest {
    /// Rated request identifier.
    pub request_id: RequestId,
    /// Rating value (-1 or +1).
    pub rating: Rating,
    /// Optional correction text.
    #[serde(default)]
    pub correction_text: Option<String>,
}

// ============================================================================
// SECTION: Pending Confirmations
// ============================================================================

/// Target re-evaluated when a confirm token is presented.
#[derive(Debug, Clone)]
enum PendingTarget {
    /// A stored intent action.
    Action {
        /// Owning request identifier.
        request_id: RequestId,
        /// Action identifier.
        action_id: ActionId,
    },
    /// An ad-hoc tool call (no intent record).
    AdHoc {
        /// Tool name.
        tool: ToolName,
        /// Tool parameters.
        params: Value,
    },
}

/// One outstanding confirmation.
#[derive(Debug, Clone)]
struct PendingConfirm {
    /// Incident the token was minted under.
    incident_id: IncidentId,
    /// Target to re-run on acceptance.
    target: PendingTarget,
    /// Deadline after which the token expires.
    confirm_by: UtcMillis,
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Execution pipeline over the runtime context.
///
/// # Invariants
/// - Execute and confirm calls are serialized per incident id.
/// - Confirm tokens are retired on first presentation.
pub struct ExecutionPipeline {
    /// Shared runtime context.
    runtime: Arc<Runtime>,
    /// Per-incident serialization locks.
    incidents: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    /// Outstanding confirm tokens.
    pending: Mutex<HashMap<String, PendingConfirm>>,
    /// Accepted invocation times per tool for rate limiting.
    invocations: Mutex<HashMap<String, Vec<UtcMillis>>>,
}

impl ExecutionPipeline {
    /// Creates a pipeline over the runtime context.
    #[must_use]
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            incidents: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            invocations: Mutex::new(HashMap::new()),
        }
    }

    /// Stores an intent and queues its actions; idempotent by request id.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] when the write fails.
    pub fn intent(&self, request: IntentRequest) -> Result<IntentResponse, PipelineError> {
        let queued_actions = request.actions.len();
        let record = IntentRecord {
            request_id: request.request_id.clone(),
            mode: request.mode,
            domain: request.domain,
            urgency: request.urgency,
            user_text: request.user_text,
            needs_tools: request.needs_tools,
            clarifying_questions: request.clarifying_questions,
            retrieval_refs: request.retrieval_refs,
            actions: request.actions,
            response_text: request.response_text,
            received_at: self.runtime.now(),
        };
        self.runtime.store.put_intent(record)?;
        Ok(IntentResponse {
            request_id: request.request_id,
            queued_actions,
        })
    }

    /// Executes the queued actions of a stored intent under an incident.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingIncidentId`] without an incident,
    /// [`PipelineError::UnknownRequest`] for an unknown request id, and
    /// [`PipelineError::Store`] on storage failures. Policy denials are
    /// results, not errors.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, PipelineError> {
        let Some(incident_id) = request.incident_id.clone() else {
            return Err(PipelineError::MissingIncidentId);
        };
        let incident_lock = self.incident_lock(&incident_id);
        let _serialized = incident_lock.lock().await;

        if self.runtime.store.get_intent(&request.request_id)?.is_none() {
            return Err(PipelineError::UnknownRequest(request.request_id.as_str().to_string()));
        }
        let condition = request
            .watch_condition
            .as_deref()
            .and_then(WatchCondition::parse)
            .unwrap_or_else(|| self.runtime.watch_condition());
        let confirm_satisfied =
            request.user_confirmed && !self.runtime.config.features.strict_confirm;

        let actions = self.runtime.store.list_actions(&request.request_id)?;
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            if action.state == ActionState::Success {
                // Re-executing a successful action is a recorded no-op.
                results.push(ActionResult {
                    action_id: action.action_id.clone(),
                    tool: action.tool.clone(),
                    status: ActionState::Success.as_str().to_string(),
                    reason_code: None,
                    confirm_token: None,
                    confirm_by_ts: None,
                    output: action.output.clone(),
                    error_message: None,
                    skipped: true,
                });
                continue;
            }
            let gate = GateContext {
                incident_id: &incident_id,
                condition,
                stt_confidence: request.stt_confidence,
                confirm_satisfied,
                allow_high_risk: request.allow_high_risk,
                dry_run: request.dry_run,
            };
            let result = self.gate_and_run_action(action, &gate).await?;
            results.push(result);
        }

        Ok(ExecuteResponse {
            request_id: request.request_id,
            incident_id,
            watch_condition: condition,
            dry_run: request.dry_run,
            results,
        })
    }

    /// Consumes a confirm token and runs the pending target.
    ///
    /// Expired or unknown tokens answer as denial results, not errors.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] on storage failures.
    pub async fn confirm(&self, request: ConfirmRequest) -> Result<ConfirmResponse, PipelineError> {
        let pending = self.take_pending(&request);
        let Some(pending) = pending else {
            return Ok(ConfirmResponse {
                incident_id: request.incident_id,
                result: denial_result(
                    ActionId::new("confirm"),
                    ToolName::new("confirm"),
                    ReasonCode::ConfirmTokenUnknown,
                ),
            });
        };
        if self.runtime.now() > pending.confirm_by {
            return Ok(ConfirmResponse {
                incident_id: request.incident_id,
                result: denial_result(
                    ActionId::new("confirm"),
                    ToolName::new("confirm"),
                    ReasonCode::ConfirmExpired,
                ),
            });
        }

        let incident_lock = self.incident_lock(&pending.incident_id);
        let _serialized = incident_lock.lock().await;
        let gate = GateContext {
            incident_id: &pending.incident_id,
            condition: self.runtime.watch_condition(),
            stt_confidence: None,
            confirm_satisfied: true,
            allow_high_risk: true,
            dry_run: false,
        };
        let result = match pending.target {
            PendingTarget::Action {
                request_id,
                action_id,
            } => {
                let actions = self.runtime.store.list_actions(&request_id)?;
                let Some(action) =
                    actions.into_iter().find(|record| record.action_id == action_id)
                else {
                    return Err(PipelineError::UnknownRequest(request_id.as_str().to_string()));
                };
                self.gate_and_run_action(action, &gate).await?
            }
            PendingTarget::AdHoc {
                tool,
                params,
            } => self.gate_and_run_adhoc(&tool, params, &gate).await?,
        };
        Ok(ConfirmResponse {
            incident_id: pending.incident_id,
            result,
        })
    }

    /// Gates and runs one ad-hoc tool call (no intent record).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] on storage failures.
    pub async fn execute_adhoc(
        &self,
        incident_id: IncidentId,
        tool: ToolName,
        params: Value,
        stt_confidence: Option<f64>,
        user_confirmed: bool,
    ) -> Result<ActionResult, PipelineError> {
        let incident_lock = self.incident_lock(&incident_id);
        let _serialized = incident_lock.lock().await;
        let gate = GateContext {
            incident_id: &incident_id,
            condition: self.runtime.watch_condition(),
            stt_confidence,
            confirm_satisfied: user_confirmed && !self.runtime.config.features.strict_confirm,
            allow_high_risk: false,
            dry_run: false,
        };
        self.gate_and_run_adhoc(&tool, params, &gate).await
    }

    /// Records operator feedback for a request.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownRequest`] when the request id is
    /// unknown and [`PipelineError::Store`] on other storage failures.
    pub fn feedback(&self, request: FeedbackRequest) -> Result<(), PipelineError> {
        let record = FeedbackRecord {
            request_id: request.request_id.clone(),
            rating: request.rating,
            correction_text: request.correction_text,
            received_at: self.runtime.now(),
        };
        match self.runtime.store.record_feedback(record) {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => {
                Err(PipelineError::UnknownRequest(request.request_id.as_str().to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    // ------------------------------------------------------------------
    // Gating internals
    // ------------------------------------------------------------------

    /// Gates one stored action and runs it to a terminal state.
    async fn gate_and_run_action(
        &self,
        action: ActionRecord,
        gate: &GateContext<'_>,
    ) -> Result<ActionResult, PipelineError> {
        // Denied, error, and timeout attempts are re-runnable; rebuild a
        // fresh queued attempt so the state machine stays legal.
        let mut record = if action.state == ActionState::Queued {
            action
        } else {
            let proposal = ProposedAction {
                action_id: action.action_id.clone(),
                tool: action.tool.clone(),
                params: action.params.clone(),
            };
            ActionRecord::queued(action.request_id.clone(), &proposal)
        };
        record.safety_class = self.runtime.router.safety_class(&record.tool);

        let verdict = self.evaluate_verdict(&record.tool, record.safety_class, gate);
        self.emit_policy_decision(&record.tool, Some(&record), &verdict, gate);

        match verdict {
            GateVerdict::Deny(reason) => {
                record.reason_code = Some(reason);
                if record.transition(ActionState::Denied).is_ok() {
                    self.runtime.store.update_action(&record)?;
                }
                self.emit_action_denied(&record.tool, Some(&record), reason, gate);
                Ok(denial_result(record.action_id, record.tool, reason))
            }
            GateVerdict::NeedsConfirmation(window_ms) => {
                let (token, confirm_by) = self.mint_pending(
                    gate.incident_id.clone(),
                    PendingTarget::Action {
                        request_id: record.request_id.clone(),
                        action_id: record.action_id.clone(),
                    },
                    window_ms,
                );
                record.reason_code = Some(ReasonCode::DenyNeedsConfirmation);
                if record.transition(ActionState::Denied).is_ok() {
                    self.runtime.store.update_action(&record)?;
                }
                self.emit_action_denied(
                    &record.tool,
                    Some(&record),
                    ReasonCode::DenyNeedsConfirmation,
                    gate,
                );
                let mut result = denial_result(
                    record.action_id,
                    record.tool,
                    ReasonCode::DenyNeedsConfirmation,
                );
                result.confirm_token = Some(token);
                result.confirm_by_ts = Some(confirm_by.as_unix_millis());
                Ok(result)
            }
            GateVerdict::Allow => {
                if gate.dry_run {
                    return Ok(ActionResult {
                        action_id: record.action_id,
                        tool: record.tool,
                        status: ActionState::Approved.as_str().to_string(),
                        reason_code: None,
                        confirm_token: None,
                        confirm_by_ts: None,
                        output: None,
                        error_message: None,
                        skipped: false,
                    });
                }
                record.transition(ActionState::Approved).map_err(transition_store_error)?;
                self.runtime.store.update_action(&record)?;
                record.transition(ActionState::Executing).map_err(transition_store_error)?;
                record.started_at = Some(self.runtime.now());
                self.runtime.store.update_action(&record)?;

                let outcome = self.dispatch(&record.tool, record.params.clone()).await?;
                self.record_invocation(&record.tool);
                let terminal = terminal_state(outcome.status);
                record.transition(terminal).map_err(transition_store_error)?;
                record.output = outcome.output.clone();
                record.error_code = outcome.error_code;
                record.error_message = outcome.error_message.clone();
                record.started_at = Some(outcome.started_at);
                record.ended_at = Some(outcome.ended_at);
                self.runtime.store.update_action(&record)?;
                self.emit_action_executed(&record.tool, Some(&record), &outcome, gate);

                Ok(ActionResult {
                    action_id: record.action_id,
                    tool: record.tool,
                    status: terminal.as_str().to_string(),
                    reason_code: outcome.error_code,
                    confirm_token: None,
                    confirm_by_ts: None,
                    output: outcome.output,
                    error_message: outcome.error_message,
                    skipped: false,
                })
            }
        }
    }

    /// Gates one ad-hoc tool call and runs it.
    async fn gate_and_run_adhoc(
        &self,
        tool: &ToolName,
        params: Value,
        gate: &GateContext<'_>,
    ) -> Result<ActionResult, PipelineError> {
        let safety_class = self.runtime.router.safety_class(tool);
        let verdict = self.evaluate_verdict(tool, safety_class, gate);
        self.emit_policy_decision(tool, None, &verdict, gate);
        let action_id = ActionId::new(tool.as_str());

        match verdict {
            GateVerdict::Deny(reason) => {
                self.emit_action_denied(tool, None, reason, gate);
                Ok(denial_result(action_id, tool.clone(), reason))
            }
            GateVerdict::NeedsConfirmation(window_ms) => {
                let (token, confirm_by) = self.mint_pending(
                    gate.incident_id.clone(),
                    PendingTarget::AdHoc {
                        tool: tool.clone(),
                        params,
                    },
                    window_ms,
                );
                self.emit_action_denied(tool, None, ReasonCode::DenyNeedsConfirmation, gate);
                let mut result =
                    denial_result(action_id, tool.clone(), ReasonCode::DenyNeedsConfirmation);
                result.confirm_token = Some(token);
                result.confirm_by_ts = Some(confirm_by.as_unix_millis());
                Ok(result)
            }
            GateVerdict::Allow => {
                let outcome = self.dispatch(tool, params).await?;
                self.record_invocation(tool);
                self.emit_action_executed(tool, None, &outcome, gate);
                Ok(ActionResult {
                    action_id,
                    tool: tool.clone(),
                    status: terminal_state(outcome.status).as_str().to_string(),
                    reason_code: outcome.error_code,
                    confirm_token: None,
                    confirm_by_ts: None,
                    output: outcome.output,
                    error_message: outcome.error_message,
                    skipped: false,
                })
            }
        }
    }

    /// Evaluates routing and policy into one gate verdict.
    fn evaluate_verdict(
        &self,
        tool: &ToolName,
        safety_class: Option<SafetyClass>,
        gate: &GateContext<'_>,
    ) -> GateVerdict {
        let Some(safety_class) = safety_class else {
            return GateVerdict::Deny(ReasonCode::ToolNotImplemented);
        };
        let foreground = self.read_foreground();
        let recent = self.recent_invocations(tool);
        let request = PolicyRequest {
            condition: gate.condition,
            tool,
            foreground: foreground.as_deref(),
            stt_confidence: gate.stt_confidence,
            recent_invocations: &recent,
            now: self.runtime.now(),
            confirm_satisfied: gate.confirm_satisfied,
        };
        match evaluate(&self.runtime.config.standing_orders, &request) {
            PolicyVerdict::Deny {
                reason,
            } => GateVerdict::Deny(reason),
            PolicyVerdict::NeedsConfirmation {
                window_ms,
            } => GateVerdict::NeedsConfirmation(window_ms),
            PolicyVerdict::Allow => {
                // High-risk actions still need an explicit operator signal:
                // allow_high_risk, a verbal confirmation, or a token.
                if safety_class == SafetyClass::HighRisk
                    && !gate.allow_high_risk
                    && !gate.confirm_satisfied
                {
                    GateVerdict::NeedsConfirmation(
                        watchkeeper_core::DEFAULT_CONFIRM_WINDOW_MS,
                    )
                } else {
                    GateVerdict::Allow
                }
            }
        }
    }

    /// Dispatches through the router on the blocking pool.
    async fn dispatch(
        &self,
        tool: &ToolName,
        params: Value,
    ) -> Result<ActuatorOutcome, PipelineError> {
        let router = Arc::clone(&self.runtime.router);
        let tool = tool.clone();
        let now = self.runtime.now();
        let joined = tokio::task::spawn_blocking(move || router.dispatch(&tool, &params))
            .await
            .map_err(|err| PipelineError::DispatchJoin(err.to_string()))?;
        Ok(match joined {
            Ok(outcome) => outcome,
            Err(route_error) => ActuatorOutcome::error(
                route_error.reason_code(),
                route_error.to_string(),
                now,
                self.runtime.now(),
            ),
        })
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    /// Returns the serialization lock for an incident.
    fn incident_lock(&self, incident_id: &IncidentId) -> Arc<AsyncMutex<()>> {
        let mut incidents = self.incidents.lock().unwrap_or_else(|poison| poison.into_inner());
        Arc::clone(
            incidents
                .entry(incident_id.as_str().to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Removes and returns the pending confirmation for a token, when it
    /// belongs to the presented incident.
    fn take_pending(&self, request: &ConfirmRequest) -> Option<PendingConfirm> {
        let mut pending = self.pending.lock().unwrap_or_else(|poison| poison.into_inner());
        let entry = pending.get(request.confirm_token.as_str())?;
        if entry.incident_id != request.incident_id {
            return None;
        }
        pending.remove(request.confirm_token.as_str())
    }

    /// Mints and registers a pending confirmation.
    fn mint_pending(
        &self,
        incident_id: IncidentId,
        target: PendingTarget,
        window_ms: u64,
    ) -> (ConfirmToken, UtcMillis) {
        let token = ConfirmToken::new(self.runtime.mint_token());
        let confirm_by = self
            .runtime
            .now()
            .saturating_add_millis(i64::try_from(window_ms).unwrap_or(i64::MAX));
        let mut pending = self.pending.lock().unwrap_or_else(|poison| poison.into_inner());
        pending.insert(token.as_str().to_string(), PendingConfirm {
            incident_id,
            target,
            confirm_by,
        });
        (token, confirm_by)
    }

    /// Records an accepted invocation time for rate limiting.
    fn record_invocation(&self, tool: &ToolName) {
        let now = self.runtime.now();
        let horizon = now.saturating_add_millis(-INVOCATION_HORIZON_MS);
        let mut invocations =
            self.invocations.lock().unwrap_or_else(|poison| poison.into_inner());
        let window = invocations.entry(tool.as_str().to_string()).or_default();
        window.retain(|ts| *ts > horizon);
        window.push(now);
    }

    /// Returns recent accepted invocation times for a tool.
    fn recent_invocations(&self, tool: &ToolName) -> Vec<UtcMillis> {
        let invocations = self.invocations.lock().unwrap_or_else(|poison| poison.into_inner());
        invocations.get(tool.as_str()).cloned().unwrap_or_default()
    }

    /// Reads the current foreground process name from the store.
    fn read_foreground(&self) -> Option<String> {
        let key = StateKey::parse("app.foreground").ok()?;
        let entry = self.runtime.store.get_state(&key).ok()??;
        entry.value.as_str().map(ToString::to_string)
    }

    // ------------------------------------------------------------------
    // Event emission
    // ------------------------------------------------------------------

    /// Emits a `POLICY_DECISION` event for one gated call.
    fn emit_policy_decision(
        &self,
        tool: &ToolName,
        record: Option<&ActionRecord>,
        verdict: &GateVerdict,
        gate: &GateContext<'_>,
    ) {
        let (label, reason) = match verdict {
            GateVerdict::Allow => ("allow", None),
            GateVerdict::NeedsConfirmation(_) => {
                ("needs_confirmation", Some(ReasonCode::DenyNeedsConfirmation))
            }
            GateVerdict::Deny(reason) => ("deny", Some(*reason)),
        };
        self.emit(gate, EventType::PolicyDecision, Severity::Info, json!({
            "tool": tool.as_str(),
            "verdict": label,
            "reason_code": reason.map(|code| code.as_str()),
            "request_id": record.map(|r| r.request_id.as_str().to_string()),
            "action_id": record.map(|r| r.action_id.as_str().to_string()),
            "watch_condition": gate.condition.as_str(),
        }));
    }

    /// Emits an `ACTION_DENIED` event.
    fn emit_action_denied(
        &self,
        tool: &ToolName,
        record: Option<&ActionRecord>,
        reason: ReasonCode,
        gate: &GateContext<'_>,
    ) {
        self.emit(gate, EventType::ActionDenied, Severity::Info, json!({
            "tool": tool.as_str(),
            "reason_code": reason.as_str(),
            "request_id": record.map(|r| r.request_id.as_str().to_string()),
            "action_id": record.map(|r| r.action_id.as_str().to_string()),
        }));
    }

    /// Emits an `ACTION_EXECUTED` event.
    fn emit_action_executed(
        &self,
        tool: &ToolName,
        record: Option<&ActionRecord>,
        outcome: &ActuatorOutcome,
        gate: &GateContext<'_>,
    ) {
        let severity = match outcome.status {
            OutcomeStatus::Success => Severity::Info,
            OutcomeStatus::Error | OutcomeStatus::Timeout => Severity::Warn,
        };
        self.emit(gate, EventType::ActionExecuted, severity, json!({
            "tool": tool.as_str(),
            "status": terminal_state(outcome.status).as_str(),
            "error_code": outcome.error_code.map(|code| code.as_str()),
            "request_id": record.map(|r| r.request_id.as_str().to_string()),
            "action_id": record.map(|r| r.action_id.as_str().to_string()),
        }));
    }

    /// Emits one pipeline event with incident correlation.
    fn emit(&self, gate: &GateContext<'_>, event_type: EventType, severity: Severity, payload: Value) {
        let emitted = self.runtime.emit_event(EmitEvent {
            event_type,
            severity,
            source: SOURCE,
            correlation_id: Some(CorrelationId::from(gate.incident_id)),
            incident_id: Some(gate.incident_id.clone()),
            payload,
        });
        if let Err(err) = emitted {
            tracing::warn!(error = %err, "pipeline event append failed");
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Evaluation context shared across one gated call.
struct GateContext<'a> {
    /// Incident correlating this call.
    incident_id: &'a IncidentId,
    /// Watch condition the call is evaluated under.
    condition: WatchCondition,
    /// Speech confidence attached to the call.
    stt_confidence: Option<f64>,
    /// Whether a confirmation guard is already satisfied.
    confirm_satisfied: bool,
    /// Whether high-risk actions may run without a confirmation round-trip.
    allow_high_risk: bool,
    /// Whether dispatch is skipped.
    dry_run: bool,
}

/// Combined routing and policy verdict.
enum GateVerdict {
    /// The call may proceed.
    Allow,
    /// The call is denied.
    Deny(ReasonCode),
    /// The call needs a confirm token within the window.
    NeedsConfirmation(u64),
}

/// Maps an adapter outcome to the terminal action state.
const fn terminal_state(status: OutcomeStatus) -> ActionState {
    match status {
        OutcomeStatus::Success => ActionState::Success,
        OutcomeStatus::Error => ActionState::Error,
        OutcomeStatus::Timeout => ActionState::Timeout,
    }
}

/// Builds a denial result.
fn denial_result(action_id: ActionId, tool: ToolName, reason: ReasonCode) -> ActionResult {
    ActionResult {
        action_id,
        tool,
        status: ActionState::Denied.as_str().to_string(),
        reason_code: Some(reason),
        confirm_token: None,
        confirm_by_ts: None,
        output: None,
        error_message: None,
        skipped: false,
    }
}

/// Maps an illegal transition into a store error (indicates a logic fault).
fn transition_store_error(err: watchkeeper_core::ActionTransitionError) -> PipelineError {
    PipelineError::Store(StoreError::Invalid(err.to_string()))
}
