use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

pub const APP_DIR: &str = "poker-sync";

fn config_paths(filename: &str) -> Vec<PathBuf> {
	let mut paths = Vec::new();

	if let Some(user_config) = dirs::config_dir() {
		paths.push(user_config.join(APP_DIR).join(filename));
	}

	paths.push(PathBuf::from("config").join(filename));

	paths
}

fn find_config(filename: &str) -> Option<PathBuf> {
	config_paths(filename).into_iter().find(|p| p.exists())
}

pub fn resolve_config(filename: &str) -> Result<PathBuf> {
	find_config(filename).ok_or_else(|| {
		let searched: Vec<_> = config_paths(filename)
			.iter()
			.map(|p| p.display().to_string())
			.collect();
		SyncError::Config(format!("Config file '{}' not found. Searched: {}", filename, searched.join(", ")))
	})
}

/// Timing and policy knobs for one table channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncConfig {
	#[serde(default = "default_heartbeat_ms")]
	pub heartbeat_interval_ms: u64,
	#[serde(default = "default_reconnect_base_ms")]
	pub reconnect_base_ms: u64,
	#[serde(default = "default_reconnect_max_ms")]
	pub reconnect_max_ms: u64,
	#[serde(default)]
	pub reconnect_jitter: f64,
	#[serde(default = "default_gap_timeout_ms")]
	pub gap_timeout_ms: u64,
	#[serde(default = "default_refresh_debounce_ms")]
	pub refresh_debounce_ms: u64,
	#[serde(default = "default_true")]
	pub rest_fallback: bool,
	#[serde(default = "default_true")]
	pub apply_pre_snapshot_deltas: bool,
	#[serde(default)]
	pub expected_schema_version: Option<String>,
}

fn default_heartbeat_ms() -> u64 {
	25_000
}

fn default_reconnect_base_ms() -> u64 {
	1_000
}

fn default_reconnect_max_ms() -> u64 {
	30_000
}

fn default_gap_timeout_ms() -> u64 {
	500
}

fn default_refresh_debounce_ms() -> u64 {
	1_000
}

fn default_true() -> bool {
	true
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			heartbeat_interval_ms: default_heartbeat_ms(),
			reconnect_base_ms: default_reconnect_base_ms(),
			reconnect_max_ms: default_reconnect_max_ms(),
			reconnect_jitter: 0.0,
			gap_timeout_ms: default_gap_timeout_ms(),
			refresh_debounce_ms: default_refresh_debounce_ms(),
			rest_fallback: true,
			apply_pre_snapshot_deltas: true,
			expected_schema_version: None,
		}
	}
}

impl SyncConfig {
	pub fn heartbeat_interval(&self) -> Duration {
		Duration::from_millis(self.heartbeat_interval_ms)
	}

	pub fn gap_timeout(&self) -> Duration {
		Duration::from_millis(self.gap_timeout_ms)
	}

	pub fn refresh_debounce(&self) -> Duration {
		Duration::from_millis(self.refresh_debounce_ms)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
	#[serde(default = "default_ws_url")]
	pub ws_url: String,
	#[serde(default)]
	pub api_base_url: Option<String>,
	#[serde(default)]
	pub table_id: Option<String>,
	#[serde(default)]
	pub log_file: bool,
	#[serde(default)]
	pub sync: SyncConfig,
}

fn default_ws_url() -> String {
	"ws://127.0.0.1:9999".to_string()
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			ws_url: default_ws_url(),
			api_base_url: None,
			table_id: None,
			log_file: false,
			sync: SyncConfig::default(),
		}
	}
}

impl ClientConfig {
	pub fn table_url(&self, table_id: &str) -> String {
		format!("{}/tables/{}", self.ws_url.trim_end_matches('/'), table_id)
	}
}

pub fn load_client<P: AsRef<Path>>(path: P) -> Result<ClientConfig> {
	let content = fs::read_to_string(&path)
		.map_err(|e| SyncError::Config(format!("Failed to read {}: {}", path.as_ref().display(), e)))?;

	toml::from_str(&content)
		.map_err(|e| SyncError::Config(format!("Failed to parse client config: {}", e)))
}

pub fn load_client_auto() -> Result<ClientConfig> {
	let path = resolve_config("client.toml")?;
	load_client(&path)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_sync_config_defaults() {
		let config = SyncConfig::default();
		assert_eq!(config.heartbeat_interval(), Duration::from_secs(25));
		assert_eq!(config.reconnect_base_ms, 1_000);
		assert_eq!(config.reconnect_max_ms, 30_000);
		assert_eq!(config.gap_timeout(), Duration::from_millis(500));
		assert_eq!(config.refresh_debounce(), Duration::from_secs(1));
		assert!(config.rest_fallback);
		assert!(config.apply_pre_snapshot_deltas);
	}

	#[test]
	fn test_empty_toml_uses_defaults() {
		let config: ClientConfig = toml::from_str("").unwrap();
		assert_eq!(config.ws_url, "ws://127.0.0.1:9999");
		assert_eq!(config.sync, SyncConfig::default());
	}

	#[test]
	fn test_partial_sync_section() {
		let config: ClientConfig = toml::from_str(
			r#"
			ws_url = "wss://poker.example/ws/"
			table_id = "t1"

			[sync]
			gap_timeout_ms = 250
			expected_schema_version = "v3"
			"#,
		)
		.unwrap();
		assert_eq!(config.sync.gap_timeout_ms, 250);
		assert_eq!(config.sync.heartbeat_interval_ms, 25_000);
		assert_eq!(config.sync.expected_schema_version.as_deref(), Some("v3"));
		assert_eq!(config.table_url("t1"), "wss://poker.example/ws/tables/t1");
	}

	#[test]
	fn test_missing_file_is_config_error() {
		let err = load_client("/nonexistent/client.toml").unwrap_err();
		assert!(matches!(err, SyncError::Config(_)));
	}
}
