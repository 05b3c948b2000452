use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
	#[error("table channel is not connected")]
	NotConnected,
	#[error("failed to encode message: {0}")]
	Encode(#[source] serde_json::Error),
	#[error("failed to decode message: {0}")]
	Decode(#[source] serde_json::Error),
	#[error("malformed message: {0}")]
	Malformed(String),
	#[error("snapshot request failed: {0}")]
	Http(#[from] reqwest::Error),
	#[error("snapshot endpoint returned status {0}")]
	Status(u16),
	#[error("config error: {0}")]
	Config(String),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("sync client has shut down")]
	Closed,
}

pub type Result<T> = std::result::Result<T, SyncError>;
