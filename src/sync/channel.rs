//! Per-table sync state machine.
//!
//! `TableSyncChannel` performs no I/O. Socket callbacks, timer fires and
//! caller requests are fed in as method calls; the I/O the channel wants
//! performed comes back out as [`Effect`]s via [`TableSyncChannel::take_effects`].
//! `sync::runtime` drives it on tokio; tests drive it by hand.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::logging;
use crate::merge::deep_merge;
use crate::net::protocol::{encode_message, parse_inbound, ClientMessage, Delta, InboundMessage, Snapshot};
use crate::sync::backoff::Backoff;
use crate::sync::sequencer::{Sequencer, Verdict};
use crate::sync::state::{ConnectionState, Cursor, SyncStats};

pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
	Heartbeat,
	Reconnect,
	GapTimeout,
	RefreshDebounce,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
	Open,
	Close { code: u16 },
	Send(String),
	/// Replaces any running timer of the same kind.
	StartTimer { kind: TimerKind, token: u64, after: Duration },
	CancelTimer(TimerKind),
	FetchSnapshot { attempt: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
	Stream,
	Fallback,
}

impl SnapshotSource {
	fn as_str(self) -> &'static str {
		match self {
			SnapshotSource::Stream => "stream",
			SnapshotSource::Fallback => "fallback",
		}
	}
}

#[derive(Debug, Clone)]
pub struct SnapshotRecord {
	pub snapshot: Snapshot,
	pub source: SnapshotSource,
	pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Socket {
	Closed,
	Opening,
	Open,
}

type MessageCallback = Box<dyn FnMut(&InboundMessage) + Send>;
type StateCallback = Box<dyn FnMut(ConnectionState, ConnectionState) + Send>;
type SnapshotCallback = Box<dyn FnMut(&Value) + Send>;
type DeltaCallback = Box<dyn FnMut(&Delta, &Value) + Send>;
type ReconnectCallback = Box<dyn FnMut(u32) + Send>;

#[derive(Default)]
struct Callbacks {
	on_message: Option<MessageCallback>,
	on_state_change: Option<StateCallback>,
	on_snapshot: Option<SnapshotCallback>,
	on_delta: Option<DeltaCallback>,
	on_reconnect: Option<ReconnectCallback>,
}

pub struct TableSyncChannel {
	table_id: String,
	config: SyncConfig,
	state: ConnectionState,
	socket: Socket,
	auto_reconnect: bool,
	has_connected: bool,
	halted: bool,
	backoff: Backoff,
	sequencer: Sequencer,
	table: Option<Value>,
	revision: u64,
	last_snapshot: Option<SnapshotRecord>,
	timers: HashMap<TimerKind, u64>,
	next_token: u64,
	snapshot_attempt: u64,
	pending_fallback: Option<u64>,
	refresh_queued: bool,
	reconnect_attempt: u32,
	stats: SyncStats,
	effects: Vec<Effect>,
	callbacks: Callbacks,
}

impl TableSyncChannel {
	pub fn new(table_id: impl Into<String>, config: SyncConfig) -> Self {
		Self {
			table_id: table_id.into(),
			state: ConnectionState::Disconnected,
			socket: Socket::Closed,
			auto_reconnect: true,
			has_connected: false,
			halted: false,
			backoff: Backoff::from_config(&config),
			sequencer: Sequencer::new(config.expected_schema_version.clone()),
			table: None,
			revision: 0,
			last_snapshot: None,
			timers: HashMap::new(),
			next_token: 0,
			snapshot_attempt: 0,
			pending_fallback: None,
			refresh_queued: false,
			reconnect_attempt: 0,
			stats: SyncStats::default(),
			effects: Vec::new(),
			callbacks: Callbacks::default(),
			config,
		}
	}

	pub fn on_message(&mut self, f: impl FnMut(&InboundMessage) + Send + 'static) {
		self.callbacks.on_message = Some(Box::new(f));
	}

	pub fn on_state_change(&mut self, f: impl FnMut(ConnectionState, ConnectionState) + Send + 'static) {
		self.callbacks.on_state_change = Some(Box::new(f));
	}

	pub fn on_snapshot(&mut self, f: impl FnMut(&Value) + Send + 'static) {
		self.callbacks.on_snapshot = Some(Box::new(f));
	}

	pub fn on_delta(&mut self, f: impl FnMut(&Delta, &Value) + Send + 'static) {
		self.callbacks.on_delta = Some(Box::new(f));
	}

	/// Called with the number of failed attempts that preceded the reconnect.
	pub fn on_reconnect(&mut self, f: impl FnMut(u32) + Send + 'static) {
		self.callbacks.on_reconnect = Some(Box::new(f));
	}

	pub fn table_id(&self) -> &str {
		&self.table_id
	}

	pub fn config(&self) -> &SyncConfig {
		&self.config
	}

	pub fn connection_state(&self) -> ConnectionState {
		self.state
	}

	pub fn state(&self) -> Option<&Value> {
		self.table.as_ref()
	}

	pub fn last_snapshot(&self) -> Option<&SnapshotRecord> {
		self.last_snapshot.as_ref()
	}

	pub fn cursor(&self) -> &Cursor {
		self.sequencer.cursor()
	}

	pub fn buffered(&self) -> usize {
		self.sequencer.buffered()
	}

	pub fn buffered_seqs(&self) -> Vec<u64> {
		self.sequencer.buffered_seqs()
	}

	/// Bumped on every change to the local table state.
	pub fn revision(&self) -> u64 {
		self.revision
	}

	pub fn stats(&self) -> SyncStats {
		self.stats
	}

	pub fn is_open(&self) -> bool {
		self.socket == Socket::Open
	}

	pub fn timer_active(&self, kind: TimerKind) -> bool {
		self.timers.contains_key(&kind)
	}

	pub fn take_effects(&mut self) -> Vec<Effect> {
		std::mem::take(&mut self.effects)
	}

	pub fn connect(&mut self) {
		if self.socket != Socket::Closed {
			return;
		}
		if self.halted {
			self.halted = false;
			self.has_connected = false;
			self.sequencer.forget(self.config.expected_schema_version.clone());
			self.table = None;
			self.revision += 1;
		}
		self.auto_reconnect = true;
		self.open_socket();
	}

	pub fn disconnect(&mut self) {
		self.auto_reconnect = false;
		let kinds: Vec<TimerKind> = self.timers.keys().copied().collect();
		for kind in kinds {
			self.cancel_timer(kind);
		}
		self.sequencer.clear_buffer();
		self.pending_fallback = None;
		self.refresh_queued = false;
		if self.socket != Socket::Closed {
			self.socket = Socket::Closed;
			self.effects.push(Effect::Close { code: NORMAL_CLOSURE });
		}
		self.set_state(ConnectionState::Disconnected);
	}

	pub fn send(&mut self, msg: &ClientMessage) -> Result<()> {
		if self.socket != Socket::Open {
			return Err(SyncError::NotConnected);
		}
		let text = encode_message(msg)?;
		self.effects.push(Effect::Send(text));
		Ok(())
	}

	pub fn send_raw(&mut self, msg: &Value) -> Result<()> {
		if self.socket != Socket::Open {
			return Err(SyncError::NotConnected);
		}
		self.effects.push(Effect::Send(msg.to_string()));
		Ok(())
	}

	/// Caller-initiated resync over the stream.
	pub fn request_snapshot(&mut self) {
		self.stats.resyncs += 1;
		self.begin_snapshot_request(false);
	}

	pub fn handle_open(&mut self) {
		if self.socket != Socket::Opening {
			return;
		}
		self.socket = Socket::Open;
		let reconnect = self.has_connected;
		self.has_connected = true;
		self.reconnect_attempt = self.backoff.attempts();
		self.backoff.reset();
		logging::transport::opened(&self.table_id, reconnect);

		self.start_timer(TimerKind::Heartbeat, self.config.heartbeat_interval());

		if reconnect {
			self.stats.reconnects += 1;
			if let Some(cb) = self.callbacks.on_reconnect.as_mut() {
				cb(self.reconnect_attempt);
			}
			self.refresh_after_reconnect();
		} else {
			self.set_state(ConnectionState::SyncingSnapshot);
		}
	}

	pub fn handle_error(&mut self, error: &str) {
		logging::transport::error(&self.table_id, error);
	}

	pub fn handle_close(&mut self, code: Option<u16>) {
		if self.socket == Socket::Closed {
			return;
		}
		self.socket = Socket::Closed;
		logging::transport::closed(&self.table_id, code);

		self.cancel_timer(TimerKind::Heartbeat);
		self.cancel_timer(TimerKind::GapTimeout);
		self.cancel_timer(TimerKind::Reconnect);
		self.sequencer.clear_buffer();
		self.pending_fallback = None;

		if self.halted {
			return;
		}
		self.set_state(ConnectionState::Disconnected);

		if self.auto_reconnect {
			let delay = self.backoff.next_delay();
			logging::transport::reconnect_scheduled(&self.table_id, self.backoff.attempts(), delay);
			self.start_timer(TimerKind::Reconnect, delay);
		}
	}

	pub fn handle_message(&mut self, text: &str) {
		let msg = match parse_inbound(text) {
			Ok(msg) => msg,
			Err(err) => {
				self.stats.malformed += 1;
				logging::channel::malformed(&self.table_id, &err.to_string());
				return;
			}
		};

		if let Some(cb) = self.callbacks.on_message.as_mut() {
			cb(&msg);
		}

		match msg {
			InboundMessage::Ping => {
				if let Err(err) = self.send(&ClientMessage::Pong) {
					debug!(table_id = %self.table_id, error = %err, "pong not sent");
				}
			}
			InboundMessage::Pong => {}
			InboundMessage::Snapshot(snapshot) => self.apply_snapshot(snapshot, SnapshotSource::Stream),
			InboundMessage::Delta(delta) => self.ingest_delta(delta),
			InboundMessage::Other { .. } => {}
		}
	}

	pub fn fire_timer(&mut self, kind: TimerKind, token: u64) {
		if self.timers.get(&kind) != Some(&token) {
			return;
		}
		self.timers.remove(&kind);

		match kind {
			TimerKind::Heartbeat => {
				if self.socket == Socket::Open {
					logging::transport::heartbeat(&self.table_id);
					if self.send(&ClientMessage::Ping).is_ok() {
						self.start_timer(TimerKind::Heartbeat, self.config.heartbeat_interval());
					}
				}
			}
			TimerKind::Reconnect => {
				if self.auto_reconnect && self.socket == Socket::Closed {
					self.open_socket();
				}
			}
			TimerKind::GapTimeout => {
				if self.sequencer.buffered() == 0 {
					return;
				}
				self.sequencer.clear_buffer();
				self.stats.resyncs += 1;
				if self.state == ConnectionState::SyncingSnapshot {
					logging::channel::resync(&self.table_id, "gap timeout while syncing");
					self.resend_snapshot_request();
				} else {
					logging::channel::resync(&self.table_id, "gap timeout");
					self.begin_snapshot_request(false);
				}
			}
			TimerKind::RefreshDebounce => {
				if self.refresh_queued {
					self.refresh_queued = false;
					if self.socket == Socket::Open && self.state == ConnectionState::SyncingSnapshot {
						self.stats.resyncs += 1;
						self.begin_snapshot_request(true);
						self.start_timer(TimerKind::RefreshDebounce, self.config.refresh_debounce());
					}
				}
			}
		}
	}

	/// Result of the REST snapshot fetch raced during a reconnect refresh.
	pub fn resolve_fallback(&mut self, attempt: u64, result: Result<Snapshot>) {
		if self.pending_fallback != Some(attempt) || self.state != ConnectionState::SyncingSnapshot {
			debug!(table_id = %self.table_id, attempt, "discarding fallback snapshot result");
			return;
		}
		match result {
			Ok(snapshot) => self.apply_snapshot(snapshot, SnapshotSource::Fallback),
			Err(err) => {
				self.pending_fallback = None;
				warn!(table_id = %self.table_id, attempt, error = %err, "fallback snapshot fetch failed");
			}
		}
	}

	fn open_socket(&mut self) {
		self.cancel_timer(TimerKind::Reconnect);
		self.set_state(ConnectionState::Connecting);
		self.socket = Socket::Opening;
		self.effects.push(Effect::Open);
	}

	fn refresh_after_reconnect(&mut self) {
		self.set_state(ConnectionState::SyncingSnapshot);
		if self.timer_active(TimerKind::RefreshDebounce) {
			self.refresh_queued = true;
			return;
		}
		self.stats.resyncs += 1;
		self.begin_snapshot_request(true);
		self.start_timer(TimerKind::RefreshDebounce, self.config.refresh_debounce());
	}

	fn begin_snapshot_request(&mut self, with_fallback: bool) {
		if self.halted {
			return;
		}
		self.sequencer.clear_buffer();
		self.cancel_timer(TimerKind::GapTimeout);
		self.set_state(ConnectionState::SyncingSnapshot);

		if self.socket == Socket::Open {
			if let Err(err) = self.send(&ClientMessage::RequestSnapshot) {
				warn!(table_id = %self.table_id, error = %err, "snapshot request not sent");
			}
		}

		self.snapshot_attempt += 1;
		if with_fallback && self.config.rest_fallback {
			self.pending_fallback = Some(self.snapshot_attempt);
			self.effects.push(Effect::FetchSnapshot {
				attempt: self.snapshot_attempt,
			});
		} else {
			self.pending_fallback = None;
		}
	}

	/// Asks again for the snapshot already being waited on, keeping any
	/// pending fallback attempt.
	fn resend_snapshot_request(&mut self) {
		if self.socket != Socket::Open {
			return;
		}
		if let Err(err) = self.send(&ClientMessage::RequestSnapshot) {
			warn!(table_id = %self.table_id, error = %err, "snapshot request not sent");
		}
	}

	fn apply_snapshot(&mut self, snapshot: Snapshot, source: SnapshotSource) {
		if self.halted {
			return;
		}
		if let Some(Verdict::SchemaMismatch { expected, received }) =
			self.sequencer.check_schema(snapshot.schema_version.as_deref())
		{
			self.halt(&expected, &received);
			return;
		}

		self.cancel_timer(TimerKind::GapTimeout);
		self.sequencer.reset(&snapshot);
		self.pending_fallback = None;
		self.refresh_queued = false;

		self.table = Some(snapshot.payload.clone());
		self.revision += 1;
		self.stats.snapshots_applied += 1;
		logging::channel::snapshot_applied(&self.table_id, snapshot.event_seq, snapshot.table_version, source.as_str());

		self.last_snapshot = Some(SnapshotRecord {
			snapshot,
			source,
			received_at: Utc::now(),
		});

		if let (Some(cb), Some(table)) = (self.callbacks.on_snapshot.as_mut(), self.table.as_ref()) {
			cb(table);
		}
		self.set_state(ConnectionState::Live);
	}

	fn ingest_delta(&mut self, delta: Delta) {
		if self.halted {
			return;
		}

		match self.sequencer.classify(&delta) {
			Verdict::SchemaMismatch { expected, received } => self.halt(&expected, &received),
			Verdict::TableVersionMismatch { expected, received } => {
				logging::channel::delta_discarded(&self.table_id, delta.event_seq, "table version mismatch");
				if self.state != ConnectionState::SyncingSnapshot {
					self.stats.resyncs += 1;
					logging::channel::resync(
						&self.table_id,
						&format!("table version {} != {}", received, expected),
					);
					self.begin_snapshot_request(false);
				}
			}
			Verdict::Duplicate => {
				self.stats.deltas_duplicate += 1;
				logging::channel::delta_discarded(&self.table_id, delta.event_seq, "duplicate");
			}
			Verdict::InOrder if self.state == ConnectionState::Live => {
				self.apply_delta(delta);
				self.drain();
			}
			Verdict::InOrder | Verdict::Future => {
				self.hold(delta);
				if !self.timer_active(TimerKind::GapTimeout) {
					self.start_timer(TimerKind::GapTimeout, self.config.gap_timeout());
				}
			}
			Verdict::Unanchored => {
				if self.state == ConnectionState::Live {
					self.apply_delta(delta);
				} else if self.config.apply_pre_snapshot_deltas {
					self.apply_delta(delta);
					self.resend_snapshot_request();
				} else {
					logging::channel::delta_discarded(&self.table_id, delta.event_seq, "no snapshot yet");
				}
			}
		}
	}

	fn hold(&mut self, delta: Delta) {
		let seq = delta.event_seq;
		if self.sequencer.hold(delta) {
			self.stats.deltas_buffered += 1;
			debug!(table_id = %self.table_id, seq, buffered = self.sequencer.buffered(), "delta buffered");
		}
	}

	fn drain(&mut self) {
		while let Some(next) = self.sequencer.pop_next() {
			self.apply_delta(next);
		}
		if self.sequencer.buffered() == 0 {
			self.cancel_timer(TimerKind::GapTimeout);
		}
	}

	fn apply_delta(&mut self, delta: Delta) {
		self.sequencer.advance(&delta);
		let table = self.table.get_or_insert(Value::Null);
		deep_merge(table, delta.payload.clone());
		self.revision += 1;
		self.stats.deltas_applied += 1;

		if let (Some(cb), Some(table)) = (self.callbacks.on_delta.as_mut(), self.table.as_ref()) {
			cb(&delta, table);
		}
	}

	fn halt(&mut self, expected: &str, received: &str) {
		logging::channel::schema_mismatch(&self.table_id, expected, received);
		self.halted = true;
		self.sequencer.clear_buffer();
		self.cancel_timer(TimerKind::GapTimeout);
		self.cancel_timer(TimerKind::RefreshDebounce);
		self.pending_fallback = None;
		self.refresh_queued = false;
		self.set_state(ConnectionState::VersionMismatch);
	}

	fn start_timer(&mut self, kind: TimerKind, after: Duration) {
		self.next_token += 1;
		let token = self.next_token;
		self.timers.insert(kind, token);
		self.effects.push(Effect::StartTimer { kind, token, after });
	}

	fn cancel_timer(&mut self, kind: TimerKind) {
		if self.timers.remove(&kind).is_some() {
			self.effects.push(Effect::CancelTimer(kind));
		}
	}

	fn set_state(&mut self, next: ConnectionState) {
		if self.state == next {
			return;
		}
		let previous = self.state;
		self.state = next;
		logging::channel::state_change(&self.table_id, previous, next);
		if let Some(cb) = self.callbacks.on_state_change.as_mut() {
			cb(previous, next);
		}
	}
}
