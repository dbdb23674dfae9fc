// crates/watchkeeper-server/src/bridge.rs
// ============================================================================
// Module: SAMMI Bridge Client
// Description: Outbound client for the stream-deck bridge variable API.
// Purpose: Read doorbell event variables, push overlay variables, and send
//          chat through the bridge, all under a short timeout.
// Dependencies: watchkeeper-actuators, watchkeeper-core, reqwest, serde_json,
//               thiserror, url
// ============================================================================

//! ## Overview
//! The bridge exposes a local HTTP API: `getVariable` reads one variable,
//! `setVariable` writes one, and `triggerButton` fires a button. Requests are
//! bounded by the configured timeout (600 ms default) and never retried; the
//! overlay loop applies its own per-cycle cap on top.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use url::Url;
use watchkeeper_actuators::Actuator;
use watchkeeper_actuators::ActuatorOutcome;
use watchkeeper_actuators::clock;
use watchkeeper_core::ReasonCode;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Bridge API errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    /// Bridge could not be reached or answered non-success.
    #[error("bridge unreachable: {0}")]
    Unreachable(String),
    /// Bridge answered with an unparseable body.
    #[error("bridge response invalid: {0}")]
    InvalidResponse(String),
    /// Bridge request did not complete within the timeout.
    #[error("bridge timeout: {0}")]
    Timeout(String),
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Blocking client for the bridge variable API.
///
/// # Invariants
/// - All requests share one bounded timeout; no internal retries.
pub struct SammiBridge {
    /// Blocking HTTP client with the bridge timeout applied.
    client: Client,
    /// Bridge API base URL.
    base_url: Url,
}

impl SammiBridge {
    /// Creates a bridge client for the configured base URL.
    ///
    /// # Errors
    ///
    /// Returns a message when the URL is invalid or the client cannot be
    /// constructed.
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self, String> {
        let base_url =
            Url::parse(base_url).map_err(|err| format!("invalid bridge url: {err}"))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| format!("bridge client build failure: {err}"))?;
        Ok(Self {
            client,
            base_url,
        })
    }

    /// Reads one bridge variable.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] on transport failure or an unparseable body.
    pub fn get_variable(&self, name: &str) -> Result<Value, BridgeError> {
        let url = self
            .endpoint("getVariable")
            .map_err(BridgeError::Unreachable)?;
        let response = self
            .client
            .get(url)
            .query(&[("name", name)])
            .send()
            .map_err(classify_transport)?;
        if !response.status().is_success() {
            return Err(BridgeError::Unreachable(format!("status {}", response.status())));
        }
        response.json::<Value>().map_err(|err| BridgeError::InvalidResponse(err.to_string()))
    }

    /// Writes one bridge variable.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] on transport failure or a non-success status.
    pub fn set_variable(&self, name: &str, value: &Value) -> Result<(), BridgeError> {
        let url = self
            .endpoint("setVariable")
            .map_err(BridgeError::Unreachable)?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "name": name, "value": value }))
            .send()
            .map_err(classify_transport)?;
        if !response.status().is_success() {
            return Err(BridgeError::Unreachable(format!("status {}", response.status())));
        }
        Ok(())
    }

    /// Fires one bridge button.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] on transport failure or a non-success status.
    pub fn trigger_button(&self, button: &str) -> Result<(), BridgeError> {
        let url = self
            .endpoint("triggerButton")
            .map_err(BridgeError::Unreachable)?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "trigger": button }))
            .send()
            .map_err(classify_transport)?;
        if !response.status().is_success() {
            return Err(BridgeError::Unreachable(format!("status {}", response.status())));
        }
        Ok(())
    }

    /// Builds an endpoint URL under the base path.
    fn endpoint(&self, action: &str) -> Result<Url, String> {
        let mut url = self.base_url.clone();
        {
            let mut segments =
                url.path_segments_mut().map_err(|()| "bridge url cannot be a base".to_string())?;
            segments.pop_if_empty().push(action);
        }
        Ok(url)
    }
}

/// Maps a transport error into the bridge taxonomy.
fn classify_transport(err: reqwest::Error) -> BridgeError {
    if err.is_timeout() {
        BridgeError::Timeout(err.to_string())
    } else {
        BridgeError::Unreachable(err.to_string())
    }
}

// ============================================================================
// SECTION: Chat Actuator
// ============================================================================

/// Chat-send adapter dispatching through the bridge.
///
/// # Invariants
/// - Empty messages fail closed without touching the bridge.
pub struct BridgeChatActuator {
    /// Shared bridge client.
    bridge: Arc<SammiBridge>,
}

impl BridgeChatActuator {
    /// Bridge variable carrying the outgoing chat message.
    const MESSAGE_VARIABLE: &'static str = "wk_chat_message";
    /// Bridge button that sends the staged message.
    const SEND_BUTTON: &'static str = "wk_chat_send";

    /// Creates a chat adapter over the shared bridge client.
    #[must_use]
    pub const fn new(bridge: Arc<SammiBridge>) -> Self {
        Self {
            bridge,
        }
    }
}

impl Actuator for BridgeChatActuator {
    fn invoke(&self, params: &Value) -> ActuatorOutcome {
        let started_at = clock::now();
        let Some(message) = params.get("message").and_then(Value::as_str) else {
            return ActuatorOutcome::error(
                ReasonCode::AdapterError,
                "missing message parameter",
                started_at,
                clock::now(),
            );
        };
        if message.trim().is_empty() {
            return ActuatorOutcome::error(
                ReasonCode::AdapterError,
                "empty chat message",
                started_at,
                clock::now(),
            );
        }
        let staged = self
            .bridge
            .set_variable(Self::MESSAGE_VARIABLE, &Value::String(message.to_string()))
            .and_then(|()| self.bridge.trigger_button(Self::SEND_BUTTON));
        let ended_at = clock::now();
        match staged {
            Ok(()) => ActuatorOutcome::success(
                Some(json!({ "sent": true })),
                started_at,
                ended_at,
            ),
            Err(BridgeError::Timeout(detail)) => {
                ActuatorOutcome::timeout(detail, started_at, ended_at)
            }
            Err(err) => ActuatorOutcome::error(
                ReasonCode::BridgeUnreachable,
                err.to_string(),
                started_at,
                ended_at,
            ),
        }
    }
}
