// crates/watchkeeper-actuators/src/router.rs
// ============================================================================
// Module: Tool Router
// Description: Tool name to risk class and actuator binding resolution.
// Purpose: Enforce global kill-switches before any adapter is reached.
// Dependencies: watchkeeper-core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The router owns the closed tool registry: each tool name maps to a safety
//! class and an adapter binding, optionally flagged as synthetic input. The
//! two global kill-switches (`actuators_enabled`, `keypress_enabled`) are
//! immutable configuration captured at startup; when off, dispatch is refused
//! with a distinct error before any adapter runs. Unknown tools fail closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use watchkeeper_core::ReasonCode;
use watchkeeper_core::SafetyClass;
use watchkeeper_core::ToolName;

use crate::outcome::Actuator;
use crate::outcome::ActuatorOutcome;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Routing errors raised before adapter dispatch.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Global actuator kill-switch is off.
    #[error("actuators are disabled")]
    ActuatorsDisabled,
    /// Keypress kill-switch is off.
    #[error("keypress synthesis is disabled")]
    KeypressDisabled,
    /// Tool name has no registered binding.
    #[error("tool not implemented: {0}")]
    ToolNotImplemented(String),
}

impl RouteError {
    /// Returns the stable reason code for the routing failure.
    #[must_use]
    pub const fn reason_code(&self) -> ReasonCode {
        match self {
            Self::ActuatorsDisabled => ReasonCode::ActuatorsDisabled,
            Self::KeypressDisabled => ReasonCode::KeypressDisabled,
            Self::ToolNotImplemented(_) => ReasonCode::ToolNotImplemented,
        }
    }
}

// ============================================================================
// SECTION: Bindings
// ============================================================================

/// One tool registration.
///
/// # Invariants
/// - `synthetic_input` marks bindings additionally gated by the keypress
///   kill-switch.
pub struct ToolBinding {
    /// Risk classification for the tool.
    pub safety_class: SafetyClass,
    /// Adapter performing the side effect.
    pub actuator: Arc<dyn Actuator>,
    /// Whether the binding emits synthetic input events.
    pub synthetic_input: bool,
}

/// Builder for the tool router.
#[derive(Default)]
pub struct ToolRouterBuilder {
    /// Registered bindings keyed by tool name.
    bindings: BTreeMap<ToolName, ToolBinding>,
    /// Global actuator kill-switch.
    actuators_enabled: bool,
    /// Keypress kill-switch.
    keypress_enabled: bool,
}

impl ToolRouterBuilder {
    /// Registers a tool binding; later registrations overwrite earlier ones.
    #[must_use]
    pub fn tool(
        mut self,
        name: impl Into<ToolName>,
        safety_class: SafetyClass,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        self.bindings.insert(name.into(), ToolBinding {
            safety_class,
            actuator,
            synthetic_input: false,
        });
        self
    }

    /// Registers a synthetic-input tool binding (keypress gated).
    #[must_use]
    pub fn synthetic_input_tool(
        mut self,
        name: impl Into<ToolName>,
        safety_class: SafetyClass,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        self.bindings.insert(name.into(), ToolBinding {
            safety_class,
            actuator,
            synthetic_input: true,
        });
        self
    }

    /// Sets the global kill-switches.
    #[must_use]
    pub const fn switches(mut self, actuators_enabled: bool, keypress_enabled: bool) -> Self {
        self.actuators_enabled = actuators_enabled;
        self.keypress_enabled = keypress_enabled;
        self
    }

    /// Builds the router.
    #[must_use]
    pub fn build(self) -> ToolRouter {
        ToolRouter {
            bindings: self.bindings,
            actuators_enabled: self.actuators_enabled,
            keypress_enabled: self.keypress_enabled,
        }
    }
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Closed registry routing tool names to adapters.
///
/// # Invariants
/// - Kill-switch state is immutable after construction.
pub struct ToolRouter {
    /// Registered bindings keyed by tool name.
    bindings: BTreeMap<ToolName, ToolBinding>,
    /// Global actuator kill-switch.
    actuators_enabled: bool,
    /// Keypress kill-switch.
    keypress_enabled: bool,
}

impl ToolRouter {
    /// Returns a builder for the router.
    #[must_use]
    pub fn builder() -> ToolRouterBuilder {
        ToolRouterBuilder::default()
    }

    /// Returns the safety class for a tool, when registered.
    #[must_use]
    pub fn safety_class(&self, tool: &ToolName) -> Option<SafetyClass> {
        self.bindings.get(tool).map(|binding| binding.safety_class)
    }

    /// Returns the registered tool names.
    #[must_use]
    pub fn tool_names(&self) -> Vec<ToolName> {
        self.bindings.keys().cloned().collect()
    }

    /// Dispatches a tool invocation through its adapter.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] when a kill-switch is off or the tool is
    /// unknown; the adapter is never reached in those cases.
    pub fn dispatch(&self, tool: &ToolName, params: &Value) -> Result<ActuatorOutcome, RouteError> {
        let binding = self
            .bindings
            .get(tool)
            .ok_or_else(|| RouteError::ToolNotImplemented(tool.as_str().to_string()))?;
        if !self.actuators_enabled {
            return Err(RouteError::ActuatorsDisabled);
        }
        if binding.synthetic_input && !self.keypress_enabled {
            return Err(RouteError::KeypressDisabled);
        }
        Ok(binding.actuator.invoke(params))
    }
}
