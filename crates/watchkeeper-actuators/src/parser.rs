// crates/watchkeeper-actuators/src/parser.rs
// ============================================================================
// Module: External Parser Lifecycle
// Description: Managed start/stop/status of the telemetry parser process.
// Purpose: Own the child registry so exactly one component controls the
//          parser, with graceful stop and a bounded force-kill.
// Dependencies: watchkeeper-core, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The telemetry parser is a separate process controlled through tool
//! actions. [`ParserSupervisor`] is the single owner of the managed child:
//! `start` launches the configured command when not already running, `stop`
//! attempts a graceful shutdown (configured stop command, when present) and
//! force-kills after the timeout, `status` refreshes liveness via `try_wait`.
//! Child stdout/stderr are redirected to the configured log file.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use watchkeeper_core::ReasonCode;
use watchkeeper_core::UtcMillis;

use crate::clock;
use crate::outcome::Actuator;
use crate::outcome::ActuatorOutcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default graceful-stop timeout in milliseconds.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 4_000;
/// Poll interval while waiting for the child to exit, in milliseconds.
const STOP_POLL_MS: u64 = 50;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Parser lifecycle configuration.
///
/// # Invariants
/// - `start_command` is non-empty in a valid configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ParserConfig {
    /// Command line used to launch the parser.
    pub start_command: Vec<String>,
    /// Optional command line that requests a graceful shutdown.
    #[serde(default)]
    pub stop_command: Option<Vec<String>>,
    /// Graceful-stop timeout before force-kill.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Log file receiving child stdout/stderr.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

/// Returns the default stop timeout.
const fn default_stop_timeout_ms() -> u64 {
    DEFAULT_STOP_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Parser lifecycle errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParserError {
    /// Configuration is unusable (empty start command).
    #[error("parser config invalid: {0}")]
    Config(String),
    /// Launch failed.
    #[error("parser start failed: {0}")]
    StartFailed(String),
    /// Stop failed.
    #[error("parser stop failed: {0}")]
    StopFailed(String),
    /// Registry lock was poisoned.
    #[error("parser registry unavailable")]
    RegistryUnavailable,
}

// ============================================================================
// SECTION: Status
// ============================================================================

/// Parser process status snapshot.
///
/// # Invariants
/// - `pid` is present iff `running` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserStatus {
    /// Whether the child is currently running.
    pub running: bool,
    /// Child process id while running.
    pub pid: Option<u32>,
    /// Time of the most recent successful start.
    pub last_started_at: Option<UtcMillis>,
    /// Exit description from the most recent termination.
    pub last_exit_reason: Option<String>,
}

// ============================================================================
// SECTION: Supervisor
// ============================================================================

/// Managed child registry entry.
struct ParserState {
    /// Running child handle, when any.
    child: Option<Child>,
    /// Time of the most recent successful start.
    last_started_at: Option<UtcMillis>,
    /// Exit description from the most recent termination.
    last_exit_reason: Option<String>,
}

/// Single-owner lifecycle supervisor for the telemetry parser.
///
/// # Invariants
/// - At most one child is managed at a time.
/// - Only this registry stops children it started.
pub struct ParserSupervisor {
    /// Lifecycle configuration.
    config: ParserConfig,
    /// Managed child state.
    state: Mutex<ParserState>,
}

impl ParserSupervisor {
    /// Creates a supervisor for the configured parser.
    ///
    /// # Errors
    ///
    /// Returns [`ParserError::Config`] when the start command is empty.
    pub fn new(config: ParserConfig) -> Result<Self, ParserError> {
        if config.start_command.is_empty() {
            return Err(ParserError::Config("start_command must not be empty".to_string()));
        }
        Ok(Self {
            config,
            state: Mutex::new(ParserState {
                child: None,
                last_started_at: None,
                last_exit_reason: None,
            }),
        })
    }

    /// Starts the parser when not already running.
    ///
    /// # Errors
    ///
    /// Returns [`ParserError::StartFailed`] when the launch fails.
    pub fn start(&self) -> Result<ParserStatus, ParserError> {
        let mut state = self.lock()?;
        Self::refresh(&mut state);
        if state.child.is_some() {
            return Ok(Self::snapshot(&state));
        }
        let mut command = Command::new(&self.config.start_command[0]);
        command.args(&self.config.start_command[1..]).stdin(Stdio::null());
        match &self.config.log_path {
            Some(log_path) => {
                let log = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log_path)
                    .map_err(|err| ParserError::StartFailed(err.to_string()))?;
                let log_err =
                    log.try_clone().map_err(|err| ParserError::StartFailed(err.to_string()))?;
                command.stdout(log).stderr(log_err);
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        let child = command.spawn().map_err(|err| ParserError::StartFailed(err.to_string()))?;
        state.last_started_at = Some(clock::now());
        state.last_exit_reason = None;
        state.child = Some(child);
        Ok(Self::snapshot(&state))
    }

    /// Stops the parser: graceful request first, force-kill after the timeout.
    ///
    /// Stopping an already-stopped parser is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ParserError::StopFailed`] when the kill fails.
    pub fn stop(&self) -> Result<ParserStatus, ParserError> {
        let mut state = self.lock()?;
        Self::refresh(&mut state);
        let Some(mut child) = state.child.take() else {
            return Ok(Self::snapshot(&state));
        };

        if let Some(stop_command) = &self.config.stop_command
            && !stop_command.is_empty()
        {
            let _ = Command::new(&stop_command[0])
                .args(&stop_command[1..])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.stop_timeout_ms);
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    state.last_exit_reason = Some(format!("stopped: {status}"));
                    return Ok(Self::snapshot(&state));
                }
                Ok(None) if Instant::now() >= deadline => {
                    child.kill().map_err(|err| ParserError::StopFailed(err.to_string()))?;
                    let status =
                        child.wait().map_err(|err| ParserError::StopFailed(err.to_string()))?;
                    state.last_exit_reason = Some(format!("killed: {status}"));
                    return Ok(Self::snapshot(&state));
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(STOP_POLL_MS)),
                Err(err) => return Err(ParserError::StopFailed(err.to_string())),
            }
        }
    }

    /// Returns the current status, refreshing child liveness first.
    ///
    /// # Errors
    ///
    /// Returns [`ParserError::RegistryUnavailable`] when the registry lock is
    /// poisoned.
    pub fn status(&self) -> Result<ParserStatus, ParserError> {
        let mut state = self.lock()?;
        Self::refresh(&mut state);
        Ok(Self::snapshot(&state))
    }

    /// Locks the child registry.
    fn lock(&self) -> Result<MutexGuard<'_, ParserState>, ParserError> {
        self.state.lock().map_err(|_| ParserError::RegistryUnavailable)
    }

    /// Reaps an exited child, recording its exit reason.
    fn refresh(state: &mut MutexGuard<'_, ParserState>) {
        if let Some(child) = &mut state.child
            && let Ok(Some(status)) = child.try_wait()
        {
            state.last_exit_reason = Some(format!("exited: {status}"));
            state.child = None;
        }
    }

    /// Builds a status snapshot from the registry state.
    fn snapshot(state: &MutexGuard<'_, ParserState>) -> ParserStatus {
        ParserStatus {
            running: state.child.is_some(),
            pid: state.child.as_ref().map(Child::id),
            last_started_at: state.last_started_at,
            last_exit_reason: state.last_exit_reason.clone(),
        }
    }
}

// ============================================================================
// SECTION: Actuator Bindings
// ============================================================================

/// Lifecycle operation selected by the tool binding.
///
/// # Invariants
/// - Variants map 1:1 to the `edparser.*` tool names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserOp {
    /// Launch when not running.
    Start,
    /// Graceful stop with bounded force-kill.
    Stop,
    /// Status snapshot.
    Status,
}

/// Actuator binding one lifecycle operation to the shared supervisor.
pub struct ParserActuator {
    /// Shared lifecycle supervisor.
    supervisor: std::sync::Arc<ParserSupervisor>,
    /// Operation performed by this binding.
    op: ParserOp,
}

impl ParserActuator {
    /// Creates a binding for one lifecycle operation.
    #[must_use]
    pub const fn new(supervisor: std::sync::Arc<ParserSupervisor>, op: ParserOp) -> Self {
        Self {
            supervisor,
            op,
        }
    }
}

impl Actuator for ParserActuator {
    fn invoke(&self, _params: &Value) -> ActuatorOutcome {
        let started_at = clock::now();
        let result = match self.op {
            ParserOp::Start => self.supervisor.start(),
            ParserOp::Stop => self.supervisor.stop(),
            ParserOp::Status => self.supervisor.status(),
        };
        let ended_at = clock::now();
        match result {
            Ok(status) => match serde_json::to_value(&status) {
                Ok(output) => ActuatorOutcome::success(Some(output), started_at, ended_at),
                Err(err) => ActuatorOutcome::error(
                    ReasonCode::AdapterError,
                    err.to_string(),
                    started_at,
                    ended_at,
                ),
            },
            Err(err) => ActuatorOutcome::error(
                ReasonCode::AdapterError,
                err.to_string(),
                started_at,
                ended_at,
            ),
        }
    }
}
