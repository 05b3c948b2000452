use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::net::protocol::Snapshot;

/// Out-of-band snapshot source raced against the stream after a reconnect.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync + 'static {
	async fn fetch_snapshot(&self, table_id: &str) -> Result<Snapshot>;
}

/// `GET {base_url}/tables/{table_id}/snapshot`
#[derive(Debug, Clone)]
pub struct HttpSnapshotFetcher {
	client: reqwest::Client,
	base_url: String,
}

impl HttpSnapshotFetcher {
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			client: reqwest::Client::new(),
			base_url: base_url.into(),
		}
	}

	pub fn snapshot_url(&self, table_id: &str) -> String {
		format!("{}/tables/{}/snapshot", self.base_url.trim_end_matches('/'), table_id)
	}
}

/// Envelope or bare state body; any non-2xx status is an error.
fn snapshot_from_response(status: StatusCode, body: &str) -> Result<Snapshot> {
	if !status.is_success() {
		return Err(SyncError::Status(status.as_u16()));
	}
	let value: Value = serde_json::from_str(body).map_err(SyncError::Decode)?;
	Snapshot::from_value(value)
}

#[async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
	async fn fetch_snapshot(&self, table_id: &str) -> Result<Snapshot> {
		let url = self.snapshot_url(table_id);
		debug!(%url, "fetching fallback snapshot");

		let response = self.client.get(&url).send().await?;
		let status = response.status();
		let body = response.text().await?;
		snapshot_from_response(status, &body)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_snapshot_url() {
		let fetcher = HttpSnapshotFetcher::new("http://localhost:8080/api/");
		assert_eq!(fetcher.snapshot_url("t-9"), "http://localhost:8080/api/tables/t-9/snapshot");
	}

	#[test]
	fn test_error_status_rejected() {
		let err = snapshot_from_response(StatusCode::SERVICE_UNAVAILABLE, "{}").unwrap_err();
		assert!(matches!(err, SyncError::Status(503)));

		let err = snapshot_from_response(StatusCode::NOT_FOUND, "not found").unwrap_err();
		assert!(matches!(err, SyncError::Status(404)));
	}

	#[test]
	fn test_envelope_body_keeps_cursor() {
		let body = r#"{"type":"snapshot","payload":{"pot":40},"event_seq":12,"table_version":3,"schema_version":"v1"}"#;
		let snapshot = snapshot_from_response(StatusCode::OK, body).unwrap();
		assert_eq!(snapshot.payload, json!({"pot": 40}));
		assert_eq!(snapshot.event_seq, Some(12));
		assert_eq!(snapshot.table_version, Some(3));
		assert_eq!(snapshot.schema_version.as_deref(), Some("v1"));
	}

	#[test]
	fn test_bare_body_has_no_cursor() {
		let snapshot = snapshot_from_response(StatusCode::OK, r#"{"pot":40,"seats":[]}"#).unwrap();
		assert_eq!(snapshot.payload, json!({"pot": 40, "seats": []}));
		assert!(snapshot.event_seq.is_none());
		assert!(snapshot.table_version.is_none());
	}

	#[test]
	fn test_invalid_body_is_decode_error() {
		let err = snapshot_from_response(StatusCode::OK, "<html>").unwrap_err();
		assert!(matches!(err, SyncError::Decode(_)));
	}
}
