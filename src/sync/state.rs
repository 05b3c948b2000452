use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
	Disconnected,
	Connecting,
	SyncingSnapshot,
	Live,
	VersionMismatch,
}

impl ConnectionState {
	pub fn as_str(self) -> &'static str {
		match self {
			ConnectionState::Disconnected => "disconnected",
			ConnectionState::Connecting => "connecting",
			ConnectionState::SyncingSnapshot => "syncing_snapshot",
			ConnectionState::Live => "live",
			ConnectionState::VersionMismatch => "version_mismatch",
		}
	}
}

impl std::fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The next event the channel is willing to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
	pub expected_seq: Option<u64>,
	pub table_version: Option<u64>,
	pub schema_version: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
	pub deltas_applied: u64,
	pub deltas_duplicate: u64,
	pub deltas_buffered: u64,
	pub snapshots_applied: u64,
	pub resyncs: u64,
	pub reconnects: u64,
	pub malformed: u64,
}
