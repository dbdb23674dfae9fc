// crates/watchkeeper-actuators/src/keysynth.rs
// ============================================================================
// Module: Key Synthesis Adapters
// Description: Media-key synthesizer and guarded virtual keypress.
// Purpose: Emit OS key events through a pluggable synthesis seam.
// Dependencies: watchkeeper-core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! OS key injection is platform configuration, not code: the [`KeySynth`]
//! seam maps a key label to a configured command line and spawns it, bounded
//! by a short wait. The media-key adapter accepts `next`, `pause`, and
//! `resume`; the virtual keypress adapter additionally requires the current
//! foreground process to be in its allow-list and fails closed otherwise.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::process::Command;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use watchkeeper_core::ReasonCode;

use crate::clock;
use crate::outcome::Actuator;
use crate::outcome::ActuatorOutcome;
use crate::outcome::ForegroundProbe;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Bound on how long a synthesis command may run, in milliseconds.
const SYNTH_WAIT_MS: u64 = 2_000;
/// Poll interval while waiting for a synthesis command, in milliseconds.
const SYNTH_POLL_MS: u64 = 25;

// ============================================================================
// SECTION: Key Synthesis Seam
// ============================================================================

/// Key synthesis errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeySynthError {
    /// No command is configured for the key label.
    #[error("no synthesis command for key: {0}")]
    UnknownKey(String),
    /// The synthesis command failed to spawn or exited nonzero.
    #[error("key synthesis failed: {0}")]
    Failed(String),
    /// The synthesis command did not finish within the wait bound.
    #[error("key synthesis timed out: {0}")]
    TimedOut(String),
}

/// Pluggable key event synthesis.
pub trait KeySynth: Send + Sync {
    /// Emits one key event for the provided label.
    ///
    /// # Errors
    ///
    /// Returns [`KeySynthError`] when the key is unknown or emission fails.
    fn press(&self, key: &str) -> Result<(), KeySynthError>;
}

/// Command-spawning key synthesis.
///
/// # Invariants
/// - Each key label maps to a non-empty command line.
pub struct CommandKeySynth {
    /// Command lines keyed by key label.
    commands: BTreeMap<String, Vec<String>>,
}

impl CommandKeySynth {
    /// Creates a synthesizer from configured command lines.
    #[must_use]
    pub const fn new(commands: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            commands,
        }
    }
}

impl KeySynth for CommandKeySynth {
    fn press(&self, key: &str) -> Result<(), KeySynthError> {
        let command_line = self
            .commands
            .get(key)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| KeySynthError::UnknownKey(key.to_string()))?;
        let mut child = Command::new(&command_line[0])
            .args(&command_line[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| KeySynthError::Failed(err.to_string()))?;
        let deadline = Instant::now() + Duration::from_millis(SYNTH_WAIT_MS);
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => {
                    return Err(KeySynthError::Failed(format!("exit status {status}")));
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        return Err(KeySynthError::TimedOut(key.to_string()));
                    }
                    std::thread::sleep(Duration::from_millis(SYNTH_POLL_MS));
                }
                Err(err) => return Err(KeySynthError::Failed(err.to_string())),
            }
        }
    }
}

/// Recording synthesizer for tests.
///
/// # Invariants
/// - Press order is preserved.
#[derive(Default)]
pub struct RecordingKeySynth {
    /// Keys pressed, in order.
    presses: Mutex<Vec<String>>,
}

impl RecordingKeySynth {
    /// Returns the recorded presses.
    ///
    /// # Panics
    ///
    /// Never panics; a poisoned lock resolves to the empty list.
    #[must_use]
    pub fn presses(&self) -> Vec<String> {
        self.presses.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

impl KeySynth for RecordingKeySynth {
    fn press(&self, key: &str) -> Result<(), KeySynthError> {
        if let Ok(mut guard) = self.presses.lock() {
            guard.push(key.to_string());
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Media Key Adapter
// ============================================================================

/// Media-key synthesizer adapter (`next` / `pause` / `resume`).
///
/// # Invariants
/// - Unknown operations fail closed without touching the synthesizer.
pub struct MediaKeyActuator<S: KeySynth> {
    /// Key synthesis seam.
    synth: S,
}

impl<S: KeySynth> MediaKeyActuator<S> {
    /// Creates a media-key adapter over the provided synthesizer.
    #[must_use]
    pub const fn new(synth: S) -> Self {
        Self {
            synth,
        }
    }
}

impl<S: KeySynth> Actuator for MediaKeyActuator<S> {
    fn invoke(&self, params: &Value) -> ActuatorOutcome {
        let started_at = clock::now();
        let op = params.get("op").and_then(Value::as_str).unwrap_or_default();
        if !matches!(op, "next" | "pause" | "resume") {
            return ActuatorOutcome::error(
                ReasonCode::AdapterError,
                format!("unknown media op: {op}"),
                started_at,
                clock::now(),
            );
        }
        match self.synth.press(op) {
            Ok(()) => {
                ActuatorOutcome::success(Some(json!({ "pressed": op })), started_at, clock::now())
            }
            Err(KeySynthError::TimedOut(key)) => ActuatorOutcome::timeout(
                format!("media key timed out: {key}"),
                started_at,
                clock::now(),
            ),
            Err(err) => ActuatorOutcome::error(
                ReasonCode::AdapterError,
                err.to_string(),
                started_at,
                clock::now(),
            ),
        }
    }
}

// ============================================================================
// SECTION: Guarded Keypress Adapter
// ============================================================================

/// Guarded virtual keypress adapter.
///
/// # Invariants
/// - Dispatch happens only while the foreground process is in the allow-list.
pub struct KeypressActuator<S: KeySynth, P: ForegroundProbe> {
    /// Key synthesis seam.
    synth: S,
    /// Foreground process probe.
    probe: P,
    /// Executable names permitted to receive synthetic input.
    foreground_allowlist: Vec<String>,
}

impl<S: KeySynth, P: ForegroundProbe> KeypressActuator<S, P> {
    /// Creates a guarded keypress adapter.
    #[must_use]
    pub const fn new(synth: S, probe: P, foreground_allowlist: Vec<String>) -> Self {
        Self {
            synth,
            probe,
            foreground_allowlist,
        }
    }
}

impl<S: KeySynth, P: ForegroundProbe> Actuator for KeypressActuator<S, P> {
    fn invoke(&self, params: &Value) -> ActuatorOutcome {
        let started_at = clock::now();
        let foreground = self.probe.foreground();
        let allowed = foreground.as_deref().is_some_and(|current| {
            self.foreground_allowlist.iter().any(|name| name.eq_ignore_ascii_case(current))
        });
        if !allowed {
            return ActuatorOutcome::error(
                ReasonCode::DenyForegroundMismatch,
                format!("foreground not in allow-list: {}", foreground.unwrap_or_default()),
                started_at,
                clock::now(),
            );
        }
        let Some(key) = params.get("key").and_then(Value::as_str) else {
            return ActuatorOutcome::error(
                ReasonCode::AdapterError,
                "missing key parameter",
                started_at,
                clock::now(),
            );
        };
        match self.synth.press(key) {
            Ok(()) => {
                ActuatorOutcome::success(Some(json!({ "pressed": key })), started_at, clock::now())
            }
            Err(KeySynthError::TimedOut(key)) => ActuatorOutcome::timeout(
                format!("keypress timed out: {key}"),
                started_at,
                clock::now(),
            ),
            Err(err) => ActuatorOutcome::error(
                ReasonCode::AdapterError,
                err.to_string(),
                started_at,
                clock::now(),
            ),
        }
    }
}
