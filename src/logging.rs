use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const FILTER_ENV: &str = "POKER_SYNC_LOG";

#[derive(Clone, Debug)]
pub struct LogConfig {
	pub level: LevelFilter,
	pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
	fn default() -> Self {
		Self {
			level: LevelFilter::INFO,
			dir: None,
		}
	}
}

impl LogConfig {
	/// Daily files under `logs/`.
	pub fn daily_file() -> Self {
		Self {
			level: LevelFilter::INFO,
			dir: Some(PathBuf::from("logs")),
		}
	}
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
	#[error("failed to create log dir {path:?}: {source}")]
	Io {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error("failed to configure logger: {0}")]
	Configure(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn init(config: &LogConfig) -> Result<(), InitError> {
	if GUARD.get().is_some() {
		return Ok(());
	}

	let filter = match std::env::var(FILTER_ENV) {
		Ok(directives) => EnvFilter::new(directives),
		Err(_) => EnvFilter::new(format!("{},tungstenite=warn,tokio_tungstenite=warn,hyper=warn,reqwest=warn", config.level)),
	};

	let (writer, guard) = match &config.dir {
		Some(dir) => {
			std::fs::create_dir_all(dir).map_err(|source| InitError::Io {
				path: dir.clone(),
				source,
			})?;
			tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "poker-sync"))
		}
		None => tracing_appender::non_blocking(std::io::stderr()),
	};

	let subscriber = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_ansi(config.dir.is_none())
		.with_writer(writer)
		.finish();

	tracing::subscriber::set_global_default(subscriber)
		.map_err(|err| InitError::Configure(err.to_string()))?;

	let _ = GUARD.set(guard);
	Ok(())
}

pub mod channel {
	use tracing::{debug, info, warn};

	use crate::sync::ConnectionState;

	pub fn state_change(table_id: &str, from: ConnectionState, to: ConnectionState) {
		info!(table_id, %from, %to, "connection state changed");
	}

	pub fn snapshot_applied(table_id: &str, event_seq: Option<u64>, table_version: Option<u64>, source: &str) {
		info!(table_id, ?event_seq, ?table_version, source, "snapshot applied");
	}

	pub fn resync(table_id: &str, reason: &str) {
		warn!(table_id, reason, "forcing snapshot resync");
	}

	pub fn delta_discarded(table_id: &str, seq: u64, reason: &str) {
		debug!(table_id, seq, reason, "delta discarded");
	}

	pub fn schema_mismatch(table_id: &str, expected: &str, received: &str) {
		warn!(table_id, expected, received, "schema version mismatch; channel halted");
	}

	pub fn malformed(table_id: &str, error: &str) {
		warn!(table_id, error, "dropping malformed message");
	}
}

pub mod transport {
	use std::time::Duration;

	use tracing::{debug, info, warn};

	pub fn opened(table_id: &str, reconnect: bool) {
		info!(table_id, reconnect, "connection open");
	}

	pub fn closed(table_id: &str, code: Option<u16>) {
		info!(table_id, ?code, "connection closed");
	}

	pub fn error(table_id: &str, error: &str) {
		warn!(table_id, error, "transport error");
	}

	pub fn reconnect_scheduled(table_id: &str, attempt: u32, delay: Duration) {
		info!(table_id, attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
	}

	pub fn heartbeat(table_id: &str) {
		debug!(table_id, "heartbeat");
	}
}
