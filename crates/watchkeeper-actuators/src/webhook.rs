// crates/watchkeeper-actuators/src/webhook.rs
// ============================================================================
// Module: Webhook Emitter
// Description: HTTP webhook adapter for lighting scenes and similar targets.
// Purpose: POST a small JSON body to a configured URL, with a `{scene}`
//          template variant, bounded by a short timeout.
// Dependencies: watchkeeper-core, reqwest, url, serde_json
// ============================================================================

//! ## Overview
//! The webhook emitter posts JSON to one configured endpoint. When the URL
//! template carries a `{scene}` placeholder, the `scene` parameter is
//! substituted after validation (lowercase alphanumeric, `-`, `_` only) so a
//! parameter can never rewrite the URL structure. Non-success status codes
//! fail closed; timeouts resolve to a timeout outcome without retry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;
use serde_json::json;
use url::Url;
use watchkeeper_core::ReasonCode;

use crate::clock;
use crate::outcome::Actuator;
use crate::outcome::ActuatorOutcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default webhook timeout in milliseconds.
pub const DEFAULT_WEBHOOK_TIMEOUT_MS: u64 = 5_000;
/// Template placeholder substituted from the `scene` parameter.
const SCENE_PLACEHOLDER: &str = "{scene}";

// ============================================================================
// SECTION: Webhook Emitter
// ============================================================================

/// HTTP webhook adapter.
///
/// # Invariants
/// - The configured template parses as a URL once the placeholder is
///   substituted with a validated scene name.
/// - Requests never follow redirects.
pub struct WebhookEmitter {
    /// Blocking HTTP client with the adapter timeout applied.
    client: Client,
    /// URL or URL template containing `{scene}`.
    url_template: String,
}

impl WebhookEmitter {
    /// Creates a webhook emitter for the provided URL template.
    ///
    /// # Errors
    ///
    /// Returns a message when the client cannot be constructed or the
    /// template (with a probe substitution) is not a valid URL.
    pub fn new(url_template: impl Into<String>, timeout_ms: u64) -> Result<Self, String> {
        let url_template = url_template.into();
        let probe = url_template.replace(SCENE_PLACEHOLDER, "probe");
        Url::parse(&probe).map_err(|err| format!("invalid webhook url template: {err}"))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| format!("webhook client build failure: {err}"))?;
        Ok(Self {
            client,
            url_template,
        })
    }

    /// Resolves the request URL for the provided parameters.
    fn resolve_url(&self, params: &Value) -> Result<String, String> {
        if !self.url_template.contains(SCENE_PLACEHOLDER) {
            return Ok(self.url_template.clone());
        }
        let scene = params
            .get("scene")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing scene parameter".to_string())?;
        if scene.is_empty()
            || !scene
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
        {
            return Err(format!("invalid scene name: {scene}"));
        }
        Ok(self.url_template.replace(SCENE_PLACEHOLDER, scene))
    }
}

impl Actuator for WebhookEmitter {
    fn invoke(&self, params: &Value) -> ActuatorOutcome {
        let started_at = clock::now();
        let url = match self.resolve_url(params) {
            Ok(url) => url,
            Err(message) => {
                return ActuatorOutcome::error(
                    ReasonCode::AdapterError,
                    message,
                    started_at,
                    clock::now(),
                );
            }
        };
        let body = params.clone();
        let response = self.client.post(&url).json(&body).send();
        let ended_at = clock::now();
        match response {
            Ok(response) if response.status().is_success() => {
                let status = response.status().as_u16();
                ActuatorOutcome::success(Some(json!({ "http_status": status })), started_at, ended_at)
            }
            Ok(response) => ActuatorOutcome::error(
                ReasonCode::AdapterError,
                format!("webhook status {}", response.status()),
                started_at,
                ended_at,
            ),
            Err(err) if err.is_timeout() => {
                ActuatorOutcome::timeout(format!("webhook timeout: {err}"), started_at, ended_at)
            }
            Err(err) => ActuatorOutcome::error(
                ReasonCode::AdapterError,
                format!("webhook failure: {err}"),
                started_at,
                ended_at,
            ),
        }
    }
}
