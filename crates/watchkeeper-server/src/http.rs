// crates/watchkeeper-server/src/http.rs
// ============================================================================
// Module: Watchkeeper HTTP Surface
// Description: JSON API, SSE event stream, and operator UI static files.
// Purpose: Expose state ingest, event reads, the execution pipeline, sitrep,
//          Twitch reads, and diagnostics over a loopback HTTP listener.
// Dependencies: watchkeeper-core, axum, tokio-stream, serde, serde_json
// ============================================================================

//! ## Overview
//! Request bodies are closed schemas (`deny_unknown_fields`); malformed or
//! unknown-field bodies answer `SCHEMA_VIOLATION`. Policy denials are not
//! HTTP errors — they ride in per-action result arrays with status 200.
//! Validation failures are 4xx with a reason code, and store unavailability
//! is 503. The SSE stream replays nothing: it forwards events committed
//! after subscription.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::FromRequest;
use axum::extract::Query;
use axum::extract::Request;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::response::sse::Event as SseEvent;
use axum::response::sse::KeepAlive;
use axum::response::sse::Sse;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use watchkeeper_core::BiasEntry;
use watchkeeper_core::BiasLexicon;
use watchkeeper_core::CapabilityRegistry;
use watchkeeper_core::CorrelationId;
use watchkeeper_core::EventFilter;
use watchkeeper_core::EventType;
use watchkeeper_core::HandoverNote;
use watchkeeper_core::IncidentId;
use watchkeeper_core::ReasonCode;
use watchkeeper_core::SetState;
use watchkeeper_core::Sitrep;
use watchkeeper_core::StateKey;
use watchkeeper_core::StoreError;
use watchkeeper_core::ToolName;
use watchkeeper_core::TwitchLog;
use watchkeeper_core::UtcMillis;

use crate::pipeline::ConfirmRequest;
use crate::pipeline::ExecuteRequest;
use crate::pipeline::ExecutionPipeline;
use crate::pipeline::FeedbackRequest;
use crate::pipeline::IntentRequest;
use crate::pipeline::PipelineError;
use crate::runtime::Runtime;

// ============================================================================
// SECTION: App State
// ============================================================================

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Runtime context.
    pub runtime: Arc<Runtime>,
    /// Execution pipeline.
    pub pipeline: Arc<ExecutionPipeline>,
}

/// Builds the HTTP router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(get_state).post(post_state))
        .route("/events", get(get_events))
        .route("/events/stream", get(events_stream))
        .route("/intent", post(post_intent))
        .route("/execute", post(post_execute))
        .route("/confirm", post(post_confirm))
        .route("/feedback", post(post_feedback))
        .route("/sitrep", get(get_sitrep))
        .route("/capabilities", get(get_capabilities))
        .route("/stt/bias", get(get_bias).post(post_bias))
        .route("/twitch/recent", get(twitch_recent))
        .route("/twitch/user/{id}", get(twitch_user))
        .route("/twitch/user/{id}/redeems/top", get(twitch_redeems))
        .route("/twitch/send_chat", post(twitch_send_chat))
        .route("/app/open", post(app_open))
        .route("/diag/store", get(diag_store))
        .route("/ui", get(ui_index))
        .route("/ui/{*path}", get(ui_file))
        .with_state(state)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Structured API error envelope.
///
/// # Invariants
/// - `incident_id` is echoed whenever the caller supplied one.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status.
    status: StatusCode,
    /// Stable reason code, when one applies.
    reason_code: Option<ReasonCode>,
    /// Human-readable detail.
    message: String,
    /// Echoed incident id.
    incident_id: Option<IncidentId>,
}

impl ApiError {
    /// Builds a 400 schema violation.
    fn schema(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            reason_code: Some(ReasonCode::SchemaViolation),
            message: message.into(),
            incident_id: None,
        }
    }

    /// Builds a 404 with no reason code.
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            reason_code: None,
            message: message.into(),
            incident_id: None,
        }
    }

    /// Attaches the caller's incident id for correlation.
    fn with_incident(mut self, incident_id: Option<IncidentId>) -> Self {
        self.incident_id = incident_id;
        self
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        let (status, reason_code) = match &error {
            StoreError::Unavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, Some(ReasonCode::StoreUnavailable))
            }
            StoreError::DuplicateEventId(_) => {
                (StatusCode::CONFLICT, Some(ReasonCode::DuplicateEventId))
            }
            StoreError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, Some(ReasonCode::StoreUnavailable)),
        };
        Self {
            status,
            reason_code,
            message: error.to_string(),
            incident_id: None,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::MissingIncidentId => Self {
                status: StatusCode::BAD_REQUEST,
                reason_code: Some(ReasonCode::MissingIncidentId),
                message: error.to_string(),
                incident_id: None,
            },
            PipelineError::UnknownRequest(request_id) => {
                Self::not_found(format!("unknown request id: {request_id}"))
            }
            PipelineError::Store(store_error) => store_error.into(),
            PipelineError::DispatchJoin(message) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                reason_code: Some(ReasonCode::AdapterError),
                message,
                incident_id: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.message,
            "reason_code": self.reason_code.map(|code| code.as_str()),
            "incident_id": self.incident_id.as_ref().map(|id| id.as_str().to_string()),
        });
        (self.status, Json(body)).into_response()
    }
}

/// JSON extractor answering `SCHEMA_VIOLATION` on malformed bodies.
struct ValidJson<T>(
    /// Decoded request body.
    T,
);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: serde::de::DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::schema(rejection.to_string())),
        }
    }
}

// ============================================================================
// SECTION: Health & Diagnostics
// ============================================================================

/// `GET /health`.
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_sec": state.runtime.uptime_sec(),
    }))
}

/// `GET /diag/store`.
async fn diag_store(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let counts = state
        .runtime
        .store
        .counts()
        .map_err(|err| ApiError::from(StoreError::from(err)))?;
    Ok(Json(serde_json::to_value(counts).map_err(|err| ApiError::schema(err.to_string()))?))
}

/// `GET /capabilities`.
async fn get_capabilities(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let capabilities = state.runtime.store.list_capabilities()?;
    Ok(Json(json!({ "capabilities": capabilities })))
}

// ============================================================================
// SECTION: State
// ============================================================================

/// Query for `GET /state`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StateQuery {
    /// Dotted key prefix filter.
    #[serde(default)]
    prefix: String,
}

/// `GET /state?prefix=…`.
async fn get_state(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Json<Value>, ApiError> {
    use watchkeeper_core::StateStore;
    let entries = state.runtime.store.list_state(&query.prefix)?;
    let map: BTreeMap<String, Value> = entries
        .into_iter()
        .map(|entry| {
            (entry.key.as_str().to_string(), json!({
                "value": entry.value,
                "source": entry.source,
                "confidence": entry.confidence,
                "observed_at": entry.observed_at.as_unix_millis(),
                "updated_at": entry.updated_at.as_unix_millis(),
            }))
        })
        .collect();
    Ok(Json(json!({ "state": map })))
}

/// One batch ingest item.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StateIngestItem {
    /// Dotted state key.
    state_key: String,
    /// JSON value.
    state_value: Value,
    /// Source tag.
    source: String,
    /// Optional confidence in `[0, 1]`.
    #[serde(default)]
    confidence: Option<f64>,
    /// Optional RFC 3339 observation time.
    #[serde(default)]
    observed_at_utc: Option<String>,
}

/// Body for `POST /state`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StateIngestBody {
    /// Batch items.
    items: Vec<StateIngestItem>,
    /// Optional correlation id recorded with the batch.
    #[serde(default)]
    correlation_id: Option<String>,
}

/// `POST /state` — validated batch ingest.
async fn post_state(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<StateIngestBody>,
) -> Result<Json<Value>, ApiError> {
    let _correlation = body.correlation_id.map(CorrelationId::new);
    let dev_ingest = state.runtime.config.features.dev_ingest;
    let mut written = 0_usize;
    let mut changed = 0_usize;
    for item in body.items {
        let key = StateKey::parse_ingest(&item.state_key).map_err(|err| ApiError {
            status: StatusCode::BAD_REQUEST,
            reason_code: Some(ReasonCode::InvalidStateKey),
            message: err.to_string(),
            incident_id: None,
        })?;
        if let Some(confidence) = item.confidence
            && !(0.0..=1.0).contains(&confidence)
        {
            return Err(ApiError::schema(format!("confidence out of range: {confidence}")));
        }
        if !dev_ingest && item.source.starts_with("dev.") {
            return Err(ApiError::schema("dev ingest is disabled"));
        }
        let observed_at = match &item.observed_at_utc {
            None => state.runtime.now(),
            Some(raw) => UtcMillis::parse_rfc3339(raw)
                .map_err(|err| ApiError::schema(err.to_string()))?,
        };
        let outcome = state.runtime.write_state(SetState {
            key,
            value: item.state_value,
            source: item.source,
            confidence: item.confidence,
            observed_at,
            quiet: false,
        })?;
        if outcome.accepted {
            written += 1;
        }
        if outcome.changed {
            changed += 1;
        }
    }
    Ok(Json(json!({ "written": written, "changed": changed })))
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// Query for `GET /events`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EventsQuery {
    /// Maximum records.
    #[serde(default)]
    limit: Option<u64>,
    /// Read forward from this sequence.
    #[serde(default)]
    since_seq: Option<u64>,
    /// Correlation filter.
    #[serde(default)]
    correlation_id: Option<String>,
    /// Event type filter.
    #[serde(default)]
    event_type: Option<String>,
}

/// `GET /events`.
async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Value>, ApiError> {
    use watchkeeper_core::EventLog;
    let event_type = match &query.event_type {
        None => None,
        Some(raw) => Some(
            EventType::parse(raw)
                .ok_or_else(|| ApiError::schema(format!("unknown event type: {raw}")))?,
        ),
    };
    let filter = EventFilter {
        limit: query.limit,
        since_seq: query.since_seq,
        correlation_id: query.correlation_id.map(CorrelationId::new),
        event_type,
    };
    let events = state.runtime.store.read_events(&filter)?;
    Ok(Json(json!({ "events": events })))
}

/// `GET /events/stream` — SSE of newly committed events.
async fn events_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = state.runtime.store.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|record| {
        let record = record.ok()?;
        let event = SseEvent::default()
            .event(record.draft.event_type.as_str())
            .json_data(&record)
            .ok()?;
        Some(Ok(event))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// `POST /intent`.
async fn post_intent(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<IntentRequest>,
) -> Result<Json<Value>, ApiError> {
    let response = state.pipeline.intent(body)?;
    Ok(Json(serde_json::to_value(response).map_err(|err| ApiError::schema(err.to_string()))?))
}

/// `POST /execute`.
async fn post_execute(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<ExecuteRequest>,
) -> Result<Json<Value>, ApiError> {
    let incident = body.incident_id.clone();
    let response = state
        .pipeline
        .execute(body)
        .await
        .map_err(|err| ApiError::from(err).with_incident(incident))?;
    Ok(Json(serde_json::to_value(response).map_err(|err| ApiError::schema(err.to_string()))?))
}

/// `POST /confirm`.
async fn post_confirm(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<ConfirmRequest>,
) -> Result<Json<Value>, ApiError> {
    let incident = Some(body.incident_id.clone());
    let response = state
        .pipeline
        .confirm(body)
        .await
        .map_err(|err| ApiError::from(err).with_incident(incident))?;
    Ok(Json(serde_json::to_value(response).map_err(|err| ApiError::schema(err.to_string()))?))
}

/// `POST /feedback`.
async fn post_feedback(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<FeedbackRequest>,
) -> Result<Json<Value>, ApiError> {
    state.pipeline.feedback(body)?;
    Ok(Json(json!({ "recorded": true })))
}

// ============================================================================
// SECTION: Sitrep
// ============================================================================

/// `GET /sitrep`.
async fn get_sitrep(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    use watchkeeper_core::EventLog;
    let handover_events = state.runtime.store.read_events(&EventFilter {
        limit: Some(1),
        since_seq: None,
        correlation_id: None,
        event_type: Some(EventType::HandoverNote),
    })?;
    let handover: Option<HandoverNote> = handover_events
        .last()
        .and_then(|record| serde_json::from_value(record.draft.payload.clone()).ok());
    let sitrep = Sitrep {
        watch_condition: state.runtime.watch_condition(),
        handover,
        capabilities: state.runtime.store.list_capabilities()?,
        uptime_sec: state.runtime.uptime_sec(),
        at: state.runtime.now(),
    };
    Ok(Json(serde_json::to_value(sitrep).map_err(|err| ApiError::schema(err.to_string()))?))
}

// ============================================================================
// SECTION: STT Bias
// ============================================================================

/// Query for `GET /stt/bias`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BiasQuery {
    /// Mode scope filter.
    #[serde(default)]
    mode: Option<String>,
}

/// `GET /stt/bias`.
async fn get_bias(
    State(state): State<AppState>,
    Query(query): Query<BiasQuery>,
) -> Result<Json<Value>, ApiError> {
    let entries = state.runtime.store.list_bias(query.mode.as_deref())?;
    Ok(Json(json!({ "entries": entries })))
}

/// Body for `POST /stt/bias`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BiasUpsertBody {
    /// Phrase as spoken.
    phrase: String,
    /// Optional mode scope.
    #[serde(default)]
    mode: Option<String>,
    /// Non-negative recognition weight.
    weight: f64,
    /// Whether the entry is applied.
    #[serde(default = "default_bias_active")]
    active: bool,
}

/// Returns the default active flag for bias upserts.
const fn default_bias_active() -> bool {
    true
}

/// `POST /stt/bias`.
async fn post_bias(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<BiasUpsertBody>,
) -> Result<Json<Value>, ApiError> {
    if !state.runtime.config.features.dev_ingest {
        return Err(ApiError::schema("bias writes require dev ingest"));
    }
    if body.weight < 0.0 {
        return Err(ApiError::schema(format!("weight must be non-negative: {}", body.weight)));
    }
    let entry = BiasEntry {
        normalized: BiasEntry::normalize(&body.phrase),
        phrase: body.phrase,
        mode: body.mode,
        weight: body.weight,
        active: body.active,
    };
    state.runtime.store.upsert_bias(entry.clone())?;
    Ok(Json(json!({ "entry": entry })))
}

// ============================================================================
// SECTION: Twitch
// ============================================================================

/// Query for list endpoints.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LimitQuery {
    /// Maximum records.
    #[serde(default = "default_limit")]
    limit: u64,
}

/// Returns the default list limit.
const fn default_limit() -> u64 {
    25
}

/// `GET /twitch/recent`.
async fn twitch_recent(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    let events = state.runtime.store.recent_twitch_events(query.limit)?;
    Ok(Json(json!({ "events": events })))
}

/// `GET /twitch/user/{id}`.
async fn twitch_user(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Result<Json<Value>, ApiError> {
    let summary = state
        .runtime
        .store
        .twitch_user_summary(&id)?
        .ok_or_else(|| ApiError::not_found(format!("unknown twitch user: {id}")))?;
    Ok(Json(serde_json::to_value(summary).map_err(|err| ApiError::schema(err.to_string()))?))
}

/// `GET /twitch/user/{id}/redeems/top`.
async fn twitch_redeems(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    let redeems = state.runtime.store.twitch_top_redeems(&id, query.limit)?;
    Ok(Json(json!({ "redeems": redeems })))
}

/// Body for `POST /twitch/send_chat`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SendChatBody {
    /// Incident correlating the send.
    incident_id: IncidentId,
    /// Chat message text.
    message: String,
    /// Speech confidence attached to the call.
    #[serde(default)]
    stt_confidence: Option<f64>,
    /// Operator confirmed verbally before the call.
    #[serde(default)]
    user_confirmed: bool,
}

/// `POST /twitch/send_chat` — policy-gated, confirm-capable.
async fn twitch_send_chat(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<SendChatBody>,
) -> Result<Json<Value>, ApiError> {
    let incident = body.incident_id.clone();
    let result = state
        .pipeline
        .execute_adhoc(
            body.incident_id,
            ToolName::new("twitch.send_chat"),
            json!({ "message": body.message }),
            body.stt_confidence,
            body.user_confirmed,
        )
        .await
        .map_err(|err| ApiError::from(err).with_incident(Some(incident)))?;
    Ok(Json(serde_json::to_value(result).map_err(|err| ApiError::schema(err.to_string()))?))
}

// ============================================================================
// SECTION: App Launcher
// ============================================================================

/// Body for `POST /app/open`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AppOpenBody {
    /// Configured application identifier.
    app_id: String,
}

/// `POST /app/open` — best-effort detached launch.
async fn app_open(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<AppOpenBody>,
) -> Result<Json<Value>, ApiError> {
    let Some(command_line) = state.runtime.config.apps.get(&body.app_id) else {
        return Err(ApiError {
            status: StatusCode::NOT_FOUND,
            reason_code: Some(ReasonCode::ToolNotImplemented),
            message: format!("unknown app id: {}", body.app_id),
            incident_id: None,
        });
    };
    let spawned = Command::new(&command_line[0])
        .args(&command_line[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(child) => Ok(Json(json!({ "launched": true, "pid": child.id() }))),
        Err(err) => Ok(Json(json!({ "launched": false, "error": err.to_string() }))),
    }
}

// ============================================================================
// SECTION: Static UI
// ============================================================================

/// `GET /ui` — serves the UI index.
async fn ui_index(State(state): State<AppState>) -> Response {
    serve_ui_path(&state, "index.html")
}

/// `GET /ui/{*path}` — serves one UI file.
async fn ui_file(
    State(state): State<AppState>,
    axum::extract::Path(path): axum::extract::Path<String>,
) -> Response {
    serve_ui_path(&state, &path)
}

/// Reads a UI file under the configured directory, fail-closed on traversal.
fn serve_ui_path(state: &AppState, path: &str) -> Response {
    let Some(ui_dir) = &state.runtime.config.server.ui_dir else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let relative = PathBuf::from(path);
    let traversal = relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_)));
    if traversal {
        return StatusCode::NOT_FOUND.into_response();
    }
    let full = ui_dir.join(relative);
    match std::fs::read(&full) {
        Ok(bytes) => {
            ([(header::CONTENT_TYPE, content_type_for(&full))], bytes).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Maps a file extension to a content type.
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
