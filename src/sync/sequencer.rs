use std::collections::BTreeMap;

use crate::net::protocol::{Delta, Snapshot};
use crate::sync::state::Cursor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
	SchemaMismatch { expected: String, received: String },
	TableVersionMismatch { expected: u64, received: u64 },
	Duplicate,
	InOrder,
	Future,
	Unanchored,
}

/// Cursor tracking plus the buffer of deltas that arrived ahead of it.
#[derive(Debug, Default)]
pub struct Sequencer {
	cursor: Cursor,
	buffer: BTreeMap<u64, Delta>,
}

impl Sequencer {
	pub fn new(expected_schema: Option<String>) -> Self {
		Self {
			cursor: Cursor {
				schema_version: expected_schema,
				..Cursor::default()
			},
			buffer: BTreeMap::new(),
		}
	}

	pub fn cursor(&self) -> &Cursor {
		&self.cursor
	}

	pub fn buffered(&self) -> usize {
		self.buffer.len()
	}

	pub fn buffered_seqs(&self) -> Vec<u64> {
		self.buffer.keys().copied().collect()
	}

	pub fn check_schema(&self, received: Option<&str>) -> Option<Verdict> {
		match (self.cursor.schema_version.as_deref(), received) {
			(Some(expected), Some(received)) if expected != received => Some(Verdict::SchemaMismatch {
				expected: expected.to_string(),
				received: received.to_string(),
			}),
			_ => None,
		}
	}

	pub fn classify(&self, delta: &Delta) -> Verdict {
		if let Some(mismatch) = self.check_schema(delta.schema_version.as_deref()) {
			return mismatch;
		}

		if let (Some(expected), Some(received)) = (self.cursor.table_version, delta.table_version) {
			if expected != received {
				return Verdict::TableVersionMismatch { expected, received };
			}
		}

		let Some(expected_seq) = self.cursor.expected_seq else {
			return Verdict::Unanchored;
		};

		let seq = delta.event_seq;
		if seq <= expected_seq {
			Verdict::Duplicate
		} else if seq == expected_seq + 1 {
			Verdict::InOrder
		} else {
			Verdict::Future
		}
	}

	pub fn advance(&mut self, delta: &Delta) {
		self.cursor.expected_seq = Some(match self.cursor.expected_seq {
			Some(current) => current.max(delta.event_seq),
			None => delta.event_seq,
		});
		if delta.table_version.is_some() {
			self.cursor.table_version = delta.table_version;
		}
	}

	/// Returns false when a delta with the same sequence was already held.
	pub fn hold(&mut self, delta: Delta) -> bool {
		self.buffer.insert(delta.event_seq, delta).is_none()
	}

	/// Removes the buffered delta that directly follows the cursor, if any.
	pub fn pop_next(&mut self) -> Option<Delta> {
		let next = self.cursor.expected_seq? + 1;
		self.buffer.remove(&next)
	}

	pub fn clear_buffer(&mut self) {
		self.buffer.clear();
	}

	pub fn reset(&mut self, snapshot: &Snapshot) {
		self.buffer.clear();
		self.cursor.expected_seq = snapshot.event_seq;
		self.cursor.table_version = snapshot.table_version;
		if snapshot.schema_version.is_some() {
			self.cursor.schema_version = snapshot.schema_version.clone();
		}
	}

	pub fn forget(&mut self, expected_schema: Option<String>) {
		*self = Self::new(expected_schema);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn delta(seq: u64) -> Delta {
		Delta {
			domain: "pot".to_string(),
			payload: json!({"pot": seq}),
			event_seq: seq,
			table_version: Some(1),
			schema_version: Some("v1".to_string()),
		}
	}

	fn anchored(seq: u64) -> Sequencer {
		let mut sequencer = Sequencer::new(None);
		sequencer.reset(&Snapshot {
			payload: json!({}),
			event_seq: Some(seq),
			table_version: Some(1),
			schema_version: Some("v1".to_string()),
		});
		sequencer
	}

	#[test]
	fn test_classify_relative_to_cursor() {
		let sequencer = anchored(10);
		assert_eq!(sequencer.classify(&delta(9)), Verdict::Duplicate);
		assert_eq!(sequencer.classify(&delta(10)), Verdict::Duplicate);
		assert_eq!(sequencer.classify(&delta(11)), Verdict::InOrder);
		assert_eq!(sequencer.classify(&delta(12)), Verdict::Future);
	}

	#[test]
	fn test_unanchored_without_cursor() {
		let sequencer = Sequencer::new(None);
		assert_eq!(sequencer.classify(&delta(5)), Verdict::Unanchored);
	}

	#[test]
	fn test_schema_checked_before_sequence() {
		let sequencer = anchored(10);
		let mut stale = delta(3);
		stale.schema_version = Some("v2".to_string());
		assert_eq!(
			sequencer.classify(&stale),
			Verdict::SchemaMismatch {
				expected: "v1".to_string(),
				received: "v2".to_string(),
			}
		);
	}

	#[test]
	fn test_table_version_mismatch() {
		let sequencer = anchored(10);
		let mut next = delta(11);
		next.table_version = Some(2);
		assert_eq!(
			sequencer.classify(&next),
			Verdict::TableVersionMismatch { expected: 1, received: 2 }
		);
	}

	#[test]
	fn test_missing_versions_are_not_checked() {
		let sequencer = anchored(10);
		let mut next = delta(11);
		next.table_version = None;
		next.schema_version = None;
		assert_eq!(sequencer.classify(&next), Verdict::InOrder);
	}

	#[test]
	fn test_pop_next_only_contiguous() {
		let mut sequencer = anchored(10);
		sequencer.hold(delta(13));
		sequencer.hold(delta(12));
		assert!(sequencer.pop_next().is_none());

		sequencer.advance(&delta(11));
		let next = sequencer.pop_next().unwrap();
		assert_eq!(next.event_seq, 12);
		sequencer.advance(&next);
		let next = sequencer.pop_next().unwrap();
		assert_eq!(next.event_seq, 13);
		sequencer.advance(&next);
		assert!(sequencer.pop_next().is_none());
		assert_eq!(sequencer.cursor().expected_seq, Some(13));
	}

	#[test]
	fn test_advance_is_monotonic() {
		let mut sequencer = anchored(10);
		sequencer.advance(&delta(12));
		sequencer.advance(&delta(11));
		assert_eq!(sequencer.cursor().expected_seq, Some(12));
	}

	#[test]
	fn test_reset_clears_buffer_and_adopts_snapshot_cursor() {
		let mut sequencer = anchored(10);
		sequencer.hold(delta(15));
		sequencer.reset(&Snapshot {
			payload: json!({}),
			event_seq: Some(3),
			table_version: Some(4),
			schema_version: None,
		});
		assert_eq!(sequencer.buffered(), 0);
		assert_eq!(sequencer.cursor().expected_seq, Some(3));
		assert_eq!(sequencer.cursor().table_version, Some(4));
		assert_eq!(sequencer.cursor().schema_version.as_deref(), Some("v1"));
	}

	#[test]
	fn test_hold_reports_duplicates() {
		let mut sequencer = anchored(10);
		assert!(sequencer.hold(delta(14)));
		assert!(!sequencer.hold(delta(14)));
		assert_eq!(sequencer.buffered_seqs(), vec![14]);
	}
}
