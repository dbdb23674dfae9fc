// crates/watchkeeper-server/src/config.rs
// ============================================================================
// Module: Watchkeeper Configuration
// Description: Runtime configuration loading and validation.
// Purpose: Capture addresses, timeouts, cadences, paths, and feature flags as
//          an immutable value at startup.
// Dependencies: watchkeeper-core, watchkeeper-actuators, watchkeeper-store-sqlite,
//               serde, toml, thiserror
// ============================================================================

//! ## Overview
//! One TOML file configures the whole process; `--config` or the
//! `WATCHKEEPER_CONFIG` environment variable override the default path. The
//! file points at three JSON documents loaded alongside it: the Standing
//! Orders, the SAMMI variable index, and the lighting environment map.
//! Configuration failures are fatal at startup — a control plane with a
//! half-read policy must not serve.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use watchkeeper_actuators::ParserConfig;
use watchkeeper_core::StandingOrders;
use watchkeeper_core::StandingOrdersError;
use watchkeeper_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "watchkeeper.toml";
/// Environment variable overriding the configuration path.
pub const CONFIG_PATH_ENV: &str = "WATCHKEEPER_CONFIG";
/// Upper bound on config file size.
const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors, fatal at startup.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config read failure for {path}: {detail}")]
    Read {
        /// Offending path.
        path: String,
        /// I/O detail.
        detail: String,
    },
    /// Config file failed to parse.
    #[error("config parse failure: {0}")]
    Parse(String),
    /// Config value failed validation.
    #[error("config invalid: {0}")]
    Invalid(String),
    /// Standing Orders document failed to load.
    #[error("standing orders failure: {0}")]
    StandingOrders(#[from] StandingOrdersError),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// HTTP bind address (loopback by default).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Directory serving the operator UI, when present.
    #[serde(default)]
    pub ui_dir: Option<PathBuf>,
    /// Shutdown grace window for pending handlers, in milliseconds.
    #[serde(default = "default_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Returns the default HTTP bind address.
fn default_bind_addr() -> String {
    "127.0.0.1:8777".to_string()
}

/// Returns the default shutdown grace window.
const fn default_grace_ms() -> u64 {
    3_000
}

/// Feature flags captured at startup.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureFlags {
    /// Global actuator kill-switch.
    #[serde(default = "default_true")]
    pub actuators_enabled: bool,
    /// Keypress kill-switch.
    #[serde(default)]
    pub keypress_enabled: bool,
    /// Whether the Twitch UDP ingest gate runs at all.
    #[serde(default = "default_true")]
    pub twitch_udp_enabled: bool,
    /// Whether `user_confirmed` on an execute request may satisfy a
    /// confirmation guard (off forces a `/confirm` round-trip).
    #[serde(default)]
    pub strict_confirm: bool,
    /// Whether `dev.*` source tags may write through `/state`.
    #[serde(default)]
    pub dev_ingest: bool,
}

/// Returns true (serde default helper).
const fn default_true() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            actuators_enabled: true,
            keypress_enabled: false,
            twitch_udp_enabled: true,
            strict_confirm: false,
            dev_ingest: false,
        }
    }
}

/// Policy document locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    /// Standing Orders JSON document path.
    pub standing_orders_path: PathBuf,
}

/// Supervisor loop cadences and input paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorSection {
    /// Active cadence in milliseconds.
    #[serde(default = "default_active_cadence_ms")]
    pub active_cadence_ms: u64,
    /// Idle cadence in milliseconds.
    #[serde(default = "default_idle_cadence_ms")]
    pub idle_cadence_ms: u64,
    /// Process-probe snapshot path (consumed).
    pub process_probe_path: PathBuf,
    /// Telemetry snapshot path (consumed).
    pub telemetry_path: PathBuf,
    /// Hardware probe snapshot path (consumed).
    pub hardware_path: PathBuf,
    /// Music now-playing status directory (consumed).
    pub music_dir: PathBuf,
    /// Game executable name driving `ed.running`.
    #[serde(default = "default_game_exe")]
    pub game_exe: String,
    /// Sidecar app names to executable names, mirrored to `app.<name>.running`.
    #[serde(default)]
    pub sidecars: BTreeMap<String, String>,
    /// Sidecar name whose presence marks a stream as active.
    #[serde(default)]
    pub streaming_app: Option<String>,
    /// Whether the parser starts and stops with the game.
    #[serde(default)]
    pub parser_auto_run: bool,
    /// CPU alarm threshold in percent.
    #[serde(default = "default_cpu_warn_pct")]
    pub cpu_warn_pct: f64,
    /// Memory alarm threshold in percent.
    #[serde(default = "default_mem_warn_pct")]
    pub mem_warn_pct: f64,
    /// Hysteresis subtracted from a threshold before re-arming.
    #[serde(default = "default_hysteresis_pct")]
    pub hysteresis_pct: f64,
}

/// Returns the default active cadence.
const fn default_active_cadence_ms() -> u64 {
    1_000
}

/// Returns the default idle cadence.
const fn default_idle_cadence_ms() -> u64 {
    5_000
}

/// Returns the default game executable name.
fn default_game_exe() -> String {
    "EliteDangerous64.exe".to_string()
}

/// Returns the default CPU alarm threshold.
const fn default_cpu_warn_pct() -> f64 {
    90.0
}

/// Returns the default memory alarm threshold.
const fn default_mem_warn_pct() -> f64 {
    90.0
}

/// Returns the default alarm hysteresis.
const fn default_hysteresis_pct() -> f64 {
    5.0
}

/// Overlay variable bridge settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OverlaySection {
    /// Whether the overlay bridge runs.
    #[serde(default)]
    pub enabled: bool,
    /// State keys mirrored to the overlay.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Mirrored keys that never pulse the new-write marker.
    #[serde(default)]
    pub noisy_keys: Vec<String>,
    /// Maximum variable updates pushed per cycle.
    #[serde(default = "default_overlay_cap")]
    pub max_updates_per_cycle: usize,
    /// Bridge button pulsed on meaningful changes.
    #[serde(default)]
    pub pulse_button: Option<String>,
}

/// Returns the default overlay per-cycle cap.
const fn default_overlay_cap() -> usize {
    8
}

/// Twitch ingest settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TwitchSection {
    /// UDP doorbell bind address.
    #[serde(default = "default_udp_bind")]
    pub udp_bind_addr: String,
    /// SAMMI bridge base URL.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    /// Bridge request timeout in milliseconds.
    #[serde(default = "default_bridge_timeout_ms")]
    pub bridge_timeout_ms: u64,
    /// SAMMI variable index JSON path.
    pub variable_index_path: PathBuf,
}

/// Returns the default UDP bind address.
fn default_udp_bind() -> String {
    "127.0.0.1:9970".to_string()
}

/// Returns the default bridge base URL.
fn default_bridge_url() -> String {
    "http://127.0.0.1:9450/api".to_string()
}

/// Returns the default bridge timeout.
const fn default_bridge_timeout_ms() -> u64 {
    600
}

/// Actuator endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActuatorSection {
    /// Lighting webhook URL template (`{scene}` substituted).
    pub lights_url: String,
    /// Lighting webhook timeout in milliseconds.
    #[serde(default = "default_lights_timeout_ms")]
    pub lights_timeout_ms: u64,
    /// Lighting environment map JSON path (environment label to scene name).
    #[serde(default)]
    pub env_map_path: Option<PathBuf>,
    /// Key-synthesis command lines keyed by key label.
    #[serde(default)]
    pub key_commands: BTreeMap<String, Vec<String>>,
    /// Executable names allowed to receive synthetic keypresses.
    #[serde(default)]
    pub keypress_foreground_allowlist: Vec<String>,
}

/// Returns the default lighting webhook timeout.
const fn default_lights_timeout_ms() -> u64 {
    5_000
}

// ============================================================================
// SECTION: Variable Index
// ============================================================================

/// Per-category doorbell ingest settings from the variable index document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryVars {
    /// Bridge variables fetched when a doorbell for this category arrives.
    #[serde(default)]
    pub variables: Vec<String>,
    /// Optional commit-marker variable; when set it wins over the packet
    /// timestamp.
    #[serde(default)]
    pub marker_variable: Option<String>,
    /// Per-category debounce in milliseconds.
    #[serde(default)]
    pub debounce_ms: u64,
}

/// SAMMI variable index document.
///
/// # Invariants
/// - Category keys are stable category labels.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableIndex {
    /// Ingest settings keyed by category label.
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryVars>,
    /// Overlay mirror: state key to bridge variable name.
    #[serde(default)]
    pub overlay_variables: BTreeMap<String, String>,
}

// ============================================================================
// SECTION: Top-Level Config
// ============================================================================

/// Application identifiers launchable via `/app/open`.
pub type AppCommands = BTreeMap<String, Vec<String>>;

/// Raw TOML configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    /// HTTP server settings.
    server: ServerSection,
    /// Store settings.
    store: SqliteStoreConfig,
    /// Feature flags.
    #[serde(default)]
    features: FeatureFlags,
    /// Policy document locations.
    policy: PolicySection,
    /// Supervisor settings.
    supervisor: SupervisorSection,
    /// Overlay bridge settings.
    #[serde(default)]
    overlay: OverlaySection,
    /// Twitch ingest settings.
    twitch: TwitchSection,
    /// Actuator endpoints.
    actuators: ActuatorSection,
    /// Parser lifecycle settings.
    parser: ParserConfig,
    /// Launchable application commands.
    #[serde(default)]
    apps: AppCommands,
}

/// Fully loaded Watchkeeper configuration.
///
/// # Invariants
/// - All referenced documents parsed successfully; the value is immutable
///   after startup.
#[derive(Debug, Clone)]
pub struct WatchkeeperConfig {
    /// HTTP server settings.
    pub server: ServerSection,
    /// Store settings.
    pub store: SqliteStoreConfig,
    /// Feature flags.
    pub features: FeatureFlags,
    /// Parsed Standing Orders document.
    pub standing_orders: StandingOrders,
    /// Supervisor settings.
    pub supervisor: SupervisorSection,
    /// Overlay bridge settings.
    pub overlay: OverlaySection,
    /// Twitch ingest settings.
    pub twitch: TwitchSection,
    /// Parsed SAMMI variable index.
    pub variable_index: VariableIndex,
    /// Actuator endpoints.
    pub actuators: ActuatorSection,
    /// Lighting environment map (environment label to scene name).
    pub env_map: BTreeMap<String, String>,
    /// Parser lifecycle settings.
    pub parser: ParserConfig,
    /// Launchable application commands.
    pub apps: AppCommands,
}

impl WatchkeeperConfig {
    /// Loads configuration from the provided path, the `WATCHKEEPER_CONFIG`
    /// environment variable, or the default path, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read, parse, or validation failure.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let path = path
            .map(Path::to_path_buf)
            .or(env_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let raw_text = read_bounded(&path)?;
        let raw: RawConfig =
            toml::from_str(&raw_text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        Self::from_raw(raw, path.parent().unwrap_or_else(|| Path::new(".")))
    }

    /// Resolves document references and validates the assembled config.
    fn from_raw(raw: RawConfig, base_dir: &Path) -> Result<Self, ConfigError> {
        let orders_path = resolve_relative(base_dir, &raw.policy.standing_orders_path);
        let standing_orders = StandingOrders::from_json(&read_bounded(&orders_path)?)?;

        let index_path = resolve_relative(base_dir, &raw.twitch.variable_index_path);
        let variable_index: VariableIndex = serde_json::from_str(&read_bounded(&index_path)?)
            .map_err(|err| ConfigError::Parse(format!("variable index: {err}")))?;

        let env_map = match &raw.actuators.env_map_path {
            None => BTreeMap::new(),
            Some(env_map_path) => {
                let env_map_path = resolve_relative(base_dir, env_map_path);
                serde_json::from_str(&read_bounded(&env_map_path)?)
                    .map_err(|err| ConfigError::Parse(format!("environment map: {err}")))?
            }
        };

        let config = Self {
            server: raw.server,
            store: raw.store,
            features: raw.features,
            standing_orders,
            supervisor: raw.supervisor,
            overlay: raw.overlay,
            twitch: raw.twitch,
            variable_index,
            actuators: raw.actuators,
            env_map,
            parser: raw.parser,
            apps: raw.apps,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on bad addresses, empty commands, or
    /// zero cadences.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .bind_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|err| ConfigError::Invalid(format!("server.bind_addr: {err}")))?;
        self.twitch
            .udp_bind_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|err| ConfigError::Invalid(format!("twitch.udp_bind_addr: {err}")))?;
        url::Url::parse(&self.twitch.bridge_url)
            .map_err(|err| ConfigError::Invalid(format!("twitch.bridge_url: {err}")))?;
        if self.supervisor.active_cadence_ms == 0 || self.supervisor.idle_cadence_ms == 0 {
            return Err(ConfigError::Invalid("supervisor cadences must be nonzero".to_string()));
        }
        if self.parser.start_command.is_empty() {
            return Err(ConfigError::Invalid("parser.start_command must not be empty".to_string()));
        }
        for (app_id, command) in &self.apps {
            if command.is_empty() {
                return Err(ConfigError::Invalid(format!("apps.{app_id} command must not be empty")));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads a file with the config size bound applied.
fn read_bounded(path: &Path) -> Result<String, ConfigError> {
    let metadata = fs::metadata(path).map_err(|err| ConfigError::Read {
        path: path.display().to_string(),
        detail: err.to_string(),
    })?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(ConfigError::Invalid(format!(
            "config document too large: {}",
            path.display()
        )));
    }
    fs::read_to_string(path).map_err(|err| ConfigError::Read {
        path: path.display().to_string(),
        detail: err.to_string(),
    })
}

/// Resolves a possibly relative document path against the config directory.
fn resolve_relative(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() { path.to_path_buf() } else { base_dir.join(path) }
}
