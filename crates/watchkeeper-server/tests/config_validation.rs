// crates/watchkeeper-server/tests/config_validation.rs
// ============================================================================
// Module: Configuration Validation Tests
// Description: Loading and validation of the TOML config and its documents.
// Purpose: Validate fail-fast behavior on malformed addresses, unknown
//          fields, and bad Standing Orders.
// ============================================================================

//! ## Overview
//! Tests for configuration loading:
//! - A complete config tree loads with its three JSON documents
//! - Unknown TOML fields are rejected (closed schema)
//! - Invalid addresses and empty commands fail validation
//! - Malformed Standing Orders fail the whole load

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;

use tempfile::TempDir;
use watchkeeper_server::WatchkeeperConfig;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const ORDERS_JSON: &str = r#"{
    "conditions": {
        "GAME": { "allow": ["lights.*", "media.key"], "deny": [] },
        "STANDBY": { "allow": ["lights.*"], "deny": ["input.*"] }
    },
    "guards": {
        "input.keypress": { "safety_class": "high_risk", "requires_confirmation": true }
    }
}"#;

const VARINDEX_JSON: &str = r#"{
    "categories": {
        "REDEEM": {
            "variables": ["user_id", "user_login", "redeem_title"],
            "marker_variable": "wk_redeem_marker",
            "debounce_ms": 250
        }
    },
    "overlay_variables": { "ed.telemetry.system": "wk_system" }
}"#;

fn write_documents(dir: &TempDir) {
    std::fs::write(dir.path().join("standing_orders.json"), ORDERS_JSON).expect("orders");
    std::fs::write(dir.path().join("varindex.json"), VARINDEX_JSON).expect("varindex");
}

fn base_toml(dir: &Path, bind_addr: &str) -> String {
    format!(
        r#"
[server]
bind_addr = "{bind_addr}"

[store]
path = "{store}"

[policy]
standing_orders_path = "standing_orders.json"

[supervisor]
process_probe_path = "probe.json"
telemetry_path = "telemetry.json"
hardware_path = "hardware.json"
music_dir = "music"

[twitch]
variable_index_path = "varindex.json"

[actuators]
lights_url = "http://127.0.0.1:9452/lights/{{scene}}"

[parser]
start_command = ["edparser", "--follow"]

[apps]
browser = ["firefox"]
"#,
        store = dir.join("watchkeeper.db").display(),
    )
}

fn write_config(dir: &TempDir, toml_text: &str) -> std::path::PathBuf {
    let path = dir.path().join("watchkeeper.toml");
    std::fs::write(&path, toml_text).expect("config");
    path
}

// ============================================================================
// SECTION: Load Tests
// ============================================================================

#[test]
fn complete_config_tree_loads() {
    let dir = TempDir::new().expect("tempdir");
    write_documents(&dir);
    let path = write_config(&dir, &base_toml(dir.path(), "127.0.0.1:8799"));

    let config = WatchkeeperConfig::load(Some(&path)).expect("load");
    assert_eq!(config.server.bind_addr, "127.0.0.1:8799");
    assert!(config.standing_orders.guards.contains_key("input.keypress"));
    assert_eq!(
        config.variable_index.categories.get("REDEEM").map(|vars| vars.debounce_ms),
        Some(250)
    );
    assert_eq!(config.apps.get("browser").map(Vec::len), Some(1));
    // Defaults survive omission.
    assert!(config.features.actuators_enabled);
    assert_eq!(config.twitch.bridge_timeout_ms, 600);
}

#[test]
fn unknown_toml_fields_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    write_documents(&dir);
    let mut toml_text = base_toml(dir.path(), "127.0.0.1:8799");
    toml_text.push_str("\n[server2]\nsurprise = true\n");
    let path = write_config(&dir, &toml_text);
    assert!(WatchkeeperConfig::load(Some(&path)).is_err());
}

#[test]
fn invalid_bind_address_fails_validation() {
    let dir = TempDir::new().expect("tempdir");
    write_documents(&dir);
    let path = write_config(&dir, &base_toml(dir.path(), "not-an-address"));
    assert!(WatchkeeperConfig::load(Some(&path)).is_err());
}

#[test]
fn malformed_standing_orders_fail_the_load() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(
        dir.path().join("standing_orders.json"),
        r#"{ "conditions": { "GAME": { "allow": ["*bad*"], "deny": [] } }, "guards": {} }"#,
    )
    .expect("orders");
    std::fs::write(dir.path().join("varindex.json"), VARINDEX_JSON).expect("varindex");
    let path = write_config(&dir, &base_toml(dir.path(), "127.0.0.1:8799"));
    assert!(WatchkeeperConfig::load(Some(&path)).is_err());
}

#[test]
fn missing_documents_fail_the_load() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, &base_toml(dir.path(), "127.0.0.1:8799"));
    assert!(WatchkeeperConfig::load(Some(&path)).is_err());
}
