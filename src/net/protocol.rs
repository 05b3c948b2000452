use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlayerAction {
	Fold,
	Check,
	Call { amount: f32 },
	Bet { amount: f32 },
	Raise { amount: f32 },
	AllIn { amount: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
	Ping,
	Pong,
	#[serde(alias = "get_snapshot")]
	RequestSnapshot,
	Action {
		#[serde(flatten)]
		action: PlayerAction,
	},
	Chat {
		text: String,
	},
}

/// Full table state plus the cursor it was taken at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
	pub payload: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub event_seq: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub table_version: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub schema_version: Option<String>,
}

impl Snapshot {
	/// Accepts either a `{"type":"snapshot",...}` envelope or a bare state
	/// object, as returned by the REST snapshot endpoint.
	pub fn from_value(value: Value) -> Result<Self> {
		let is_envelope = value.get("type").and_then(Value::as_str) == Some("snapshot");
		if is_envelope {
			return match decode(&value)? {
				InboundMessage::Snapshot(snapshot) => Ok(snapshot),
				_ => Err(SyncError::Malformed("expected snapshot envelope".to_string())),
			};
		}
		Ok(Self {
			payload: value,
			event_seq: None,
			table_version: None,
			schema_version: None,
		})
	}

	pub fn to_frame(&self) -> Value {
		let mut frame = serde_json::to_value(self).unwrap_or(Value::Null);
		if let Value::Object(map) = &mut frame {
			map.insert("type".to_string(), Value::String("snapshot".to_string()));
		}
		frame
	}
}

/// Partial table update for one slice of state (`seat`, `pot`, `timer`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
	#[serde(skip)]
	pub domain: String,
	pub payload: Value,
	pub event_seq: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub table_version: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub schema_version: Option<String>,
}

impl Delta {
	pub fn kind(&self) -> String {
		format!("{}_update", self.domain)
	}

	pub fn to_frame(&self) -> Value {
		let mut frame = serde_json::to_value(self).unwrap_or(Value::Null);
		if let Value::Object(map) = &mut frame {
			map.insert("type".to_string(), Value::String(self.kind()));
		}
		frame
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
	Ping,
	Pong,
	Snapshot(Snapshot),
	Delta(Delta),
	Other { kind: String, body: Value },
}

impl InboundMessage {
	pub fn kind(&self) -> String {
		match self {
			InboundMessage::Ping => "ping".to_string(),
			InboundMessage::Pong => "pong".to_string(),
			InboundMessage::Snapshot(_) => "snapshot".to_string(),
			InboundMessage::Delta(delta) => delta.kind(),
			InboundMessage::Other { kind, .. } => kind.clone(),
		}
	}
}

#[derive(Debug, Deserialize)]
struct Envelope {
	#[serde(rename = "type")]
	kind: String,
	#[serde(default)]
	payload: Option<Value>,
	#[serde(default)]
	event_seq: Option<u64>,
	#[serde(default)]
	table_version: Option<u64>,
	#[serde(default)]
	schema_version: Option<String>,
}

pub fn parse_inbound(text: &str) -> Result<InboundMessage> {
	let value: Value = serde_json::from_str(text).map_err(SyncError::Decode)?;
	decode(&value)
}

fn decode(value: &Value) -> Result<InboundMessage> {
	let envelope = Envelope::deserialize(value).map_err(SyncError::Decode)?;

	match envelope.kind.as_str() {
		"ping" => Ok(InboundMessage::Ping),
		"pong" => Ok(InboundMessage::Pong),
		"snapshot" => Ok(InboundMessage::Snapshot(Snapshot {
			payload: envelope.payload.unwrap_or(Value::Null),
			event_seq: envelope.event_seq,
			table_version: envelope.table_version,
			schema_version: envelope.schema_version,
		})),
		kind => match kind.strip_suffix("_update") {
			Some(domain) if !domain.is_empty() => {
				let event_seq = envelope.event_seq.ok_or_else(|| {
					SyncError::Malformed(format!("{} without event_seq", kind))
				})?;
				Ok(InboundMessage::Delta(Delta {
					domain: domain.to_string(),
					payload: envelope.payload.unwrap_or_else(|| Value::Object(Default::default())),
					event_seq,
					table_version: envelope.table_version,
					schema_version: envelope.schema_version,
				}))
			}
			_ => Ok(InboundMessage::Other {
				kind: kind.to_string(),
				body: value.clone(),
			}),
		},
	}
}

pub fn encode_message<T: Serialize>(msg: &T) -> Result<String> {
	serde_json::to_string(msg).map_err(SyncError::Encode)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_encode_heartbeat() {
		assert_eq!(encode_message(&ClientMessage::Ping).unwrap(), r#"{"type":"ping"}"#);
		assert_eq!(encode_message(&ClientMessage::Pong).unwrap(), r#"{"type":"pong"}"#);
	}

	#[test]
	fn test_encode_request_snapshot() {
		let json = encode_message(&ClientMessage::RequestSnapshot).unwrap();
		assert_eq!(json, r#"{"type":"request_snapshot"}"#);
	}

	#[test]
	fn test_get_snapshot_alias() {
		let msg: ClientMessage = serde_json::from_str(r#"{"type":"get_snapshot"}"#).unwrap();
		assert_eq!(msg, ClientMessage::RequestSnapshot);
	}

	#[test]
	fn test_encode_action() {
		let msg = ClientMessage::Action {
			action: PlayerAction::Raise { amount: 100.0 },
		};
		let value: Value = serde_json::from_str(&encode_message(&msg).unwrap()).unwrap();
		assert_eq!(value["type"], "action");
		assert_eq!(value["action"], "raise");
		assert_eq!(value["amount"], 100.0);
	}

	#[test]
	fn test_parse_snapshot() {
		let text = r#"{"type":"snapshot","payload":{"pot":30},"event_seq":7,"table_version":2,"schema_version":"v1"}"#;
		match parse_inbound(text).unwrap() {
			InboundMessage::Snapshot(snapshot) => {
				assert_eq!(snapshot.payload, json!({"pot": 30}));
				assert_eq!(snapshot.event_seq, Some(7));
				assert_eq!(snapshot.table_version, Some(2));
				assert_eq!(snapshot.schema_version.as_deref(), Some("v1"));
			}
			other => panic!("expected snapshot, got {:?}", other),
		}
	}

	#[test]
	fn test_parse_delta_domain() {
		let text = r#"{"type":"seat_update","payload":{"seats":[]},"event_seq":8}"#;
		match parse_inbound(text).unwrap() {
			InboundMessage::Delta(delta) => {
				assert_eq!(delta.domain, "seat");
				assert_eq!(delta.event_seq, 8);
				assert!(delta.table_version.is_none());
			}
			other => panic!("expected delta, got {:?}", other),
		}
	}

	#[test]
	fn test_delta_without_seq_is_malformed() {
		let err = parse_inbound(r#"{"type":"pot_update","payload":{}}"#).unwrap_err();
		assert!(matches!(err, SyncError::Malformed(_)));
	}

	#[test]
	fn test_unknown_type_passes_through() {
		let text = r#"{"type":"chat","text":"gl"}"#;
		match parse_inbound(text).unwrap() {
			InboundMessage::Other { kind, body } => {
				assert_eq!(kind, "chat");
				assert_eq!(body["text"], "gl");
			}
			other => panic!("expected passthrough, got {:?}", other),
		}
	}

	#[test]
	fn test_invalid_json() {
		assert!(matches!(parse_inbound("{not json"), Err(SyncError::Decode(_))));
		assert!(matches!(parse_inbound(r#"{"payload":{}}"#), Err(SyncError::Decode(_))));
	}

	#[test]
	fn test_snapshot_from_bare_state() {
		let snapshot = Snapshot::from_value(json!({"pot": 12})).unwrap();
		assert_eq!(snapshot.payload, json!({"pot": 12}));
		assert!(snapshot.event_seq.is_none());
	}

	#[test]
	fn test_snapshot_from_envelope() {
		let snapshot = Snapshot::from_value(json!({
			"type": "snapshot",
			"payload": {"pot": 12},
			"event_seq": 40,
		}))
		.unwrap();
		assert_eq!(snapshot.event_seq, Some(40));
		assert_eq!(snapshot.payload, json!({"pot": 12}));
	}

	#[test]
	fn test_delta_frame_parses_back() {
		let delta = Delta {
			domain: "timer".to_string(),
			payload: json!({"timer": {"seat": 2}}),
			event_seq: 3,
			table_version: Some(1),
			schema_version: Some("v1".to_string()),
		};
		let text = delta.to_frame().to_string();
		assert_eq!(parse_inbound(&text).unwrap(), InboundMessage::Delta(delta));
	}
}
