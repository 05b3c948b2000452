use std::collections::HashMap;
use std::future::pending;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Result, SyncError};
use crate::net::fallback::{HttpSnapshotFetcher, SnapshotFetcher};
use crate::net::protocol::{ClientMessage, Snapshot};
use crate::net::transport::{Outbound, Transport, TransportEvent, WebSocketTransport};
use crate::sync::channel::{Effect, TableSyncChannel, TimerKind};
use crate::sync::state::{ConnectionState, SyncStats};

/// What subscribers see after every change the channel makes.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncView {
	pub connection: ConnectionState,
	pub table: Option<Arc<Value>>,
	pub event_seq: Option<u64>,
	pub stats: SyncStats,
}

impl Default for SyncView {
	fn default() -> Self {
		Self {
			connection: ConnectionState::Disconnected,
			table: None,
			event_seq: None,
			stats: SyncStats::default(),
		}
	}
}

enum Control {
	Connect,
	Disconnect,
	Send(ClientMessage, oneshot::Sender<Result<()>>),
	SendRaw(Value, oneshot::Sender<Result<()>>),
	RequestSnapshot,
	Shutdown,
}

/// Handle to a table channel running on its own tokio task.
pub struct SyncClient {
	control: mpsc::UnboundedSender<Control>,
	view: watch::Receiver<SyncView>,
	task: JoinHandle<()>,
}

impl SyncClient {
	pub fn spawn(
		channel: TableSyncChannel,
		url: impl Into<String>,
		transport: Arc<dyn Transport>,
		fetcher: Option<Arc<dyn SnapshotFetcher>>,
	) -> Self {
		let (control_tx, control_rx) = mpsc::unbounded_channel();
		let (view_tx, view_rx) = watch::channel(SyncView::default());
		let (fallback_tx, fallback_rx) = mpsc::unbounded_channel();

		let driver = Driver {
			channel,
			url: url.into(),
			transport,
			fetcher,
			control: control_rx,
			outbound: None,
			events: None,
			timers: HashMap::new(),
			fallback_tx,
			fallback_rx,
			view: view_tx,
			published_revision: None,
		};
		let task = tokio::spawn(driver.run());

		Self {
			control: control_tx,
			view: view_rx,
			task,
		}
	}

	/// WebSocket transport to `config.table_url(table_id)`, with the REST
	/// fallback enabled when `api_base_url` is set.
	pub fn from_config(channel: TableSyncChannel, config: &ClientConfig) -> Self {
		let url = config.table_url(channel.table_id());
		let fetcher = config
			.api_base_url
			.as_ref()
			.map(|base| Arc::new(HttpSnapshotFetcher::new(base.clone())) as Arc<dyn SnapshotFetcher>);
		Self::spawn(channel, url, Arc::new(WebSocketTransport), fetcher)
	}

	pub fn connect(&self) -> Result<()> {
		self.control(Control::Connect)
	}

	pub fn disconnect(&self) -> Result<()> {
		self.control(Control::Disconnect)
	}

	pub fn request_snapshot(&self) -> Result<()> {
		self.control(Control::RequestSnapshot)
	}

	pub async fn send(&self, msg: ClientMessage) -> Result<()> {
		let (tx, rx) = oneshot::channel();
		self.control(Control::Send(msg, tx))?;
		rx.await.map_err(|_| SyncError::Closed)?
	}

	pub async fn send_raw(&self, msg: Value) -> Result<()> {
		let (tx, rx) = oneshot::channel();
		self.control(Control::SendRaw(msg, tx))?;
		rx.await.map_err(|_| SyncError::Closed)?
	}

	pub fn view(&self) -> SyncView {
		self.view.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<SyncView> {
		self.view.clone()
	}

	/// Disconnects and waits for the driver task to finish.
	pub async fn shutdown(self) {
		let _ = self.control.send(Control::Shutdown);
		if let Err(err) = self.task.await {
			warn!(error = %err, "sync driver task failed");
		}
	}

	fn control(&self, msg: Control) -> Result<()> {
		self.control.send(msg).map_err(|_| SyncError::Closed)
	}
}

enum Step {
	Control(Option<Control>),
	Transport(Option<TransportEvent>),
	Fallback(u64, Result<Snapshot>),
	Timers,
}

struct Driver {
	channel: TableSyncChannel,
	url: String,
	transport: Arc<dyn Transport>,
	fetcher: Option<Arc<dyn SnapshotFetcher>>,
	control: mpsc::UnboundedReceiver<Control>,
	outbound: Option<mpsc::UnboundedSender<Outbound>>,
	events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
	timers: HashMap<TimerKind, (u64, Instant)>,
	fallback_tx: mpsc::UnboundedSender<(u64, Result<Snapshot>)>,
	fallback_rx: mpsc::UnboundedReceiver<(u64, Result<Snapshot>)>,
	view: watch::Sender<SyncView>,
	published_revision: Option<u64>,
}

impl Driver {
	async fn run(mut self) {
		loop {
			self.flush();

			let deadline = self.timers.values().map(|(_, at)| *at).min();
			let timer = async move {
				match deadline {
					Some(at) => sleep_until(at).await,
					None => pending().await,
				}
			};

			let step = tokio::select! {
				ctrl = self.control.recv() => Step::Control(ctrl),
				event = next_event(&mut self.events) => Step::Transport(event),
				Some((attempt, result)) = self.fallback_rx.recv() => Step::Fallback(attempt, result),
				_ = timer => Step::Timers,
			};

			match step {
				Step::Control(None) | Step::Control(Some(Control::Shutdown)) => {
					self.channel.disconnect();
					self.flush();
					break;
				}
				Step::Control(Some(ctrl)) => self.handle_control(ctrl),
				Step::Transport(Some(event)) => self.handle_transport(event),
				Step::Transport(None) => {
					self.events = None;
					self.outbound = None;
					self.channel.handle_close(None);
				}
				Step::Fallback(attempt, result) => self.channel.resolve_fallback(attempt, result),
				Step::Timers => self.fire_due_timers(),
			}
		}
		debug!(table_id = self.channel.table_id(), "sync driver stopped");
	}

	fn handle_control(&mut self, ctrl: Control) {
		match ctrl {
			Control::Connect => self.channel.connect(),
			Control::Disconnect => self.channel.disconnect(),
			Control::RequestSnapshot => self.channel.request_snapshot(),
			Control::Send(msg, reply) => {
				let _ = reply.send(self.channel.send(&msg));
			}
			Control::SendRaw(msg, reply) => {
				let _ = reply.send(self.channel.send_raw(&msg));
			}
			Control::Shutdown => {}
		}
	}

	fn handle_transport(&mut self, event: TransportEvent) {
		match event {
			TransportEvent::Open => self.channel.handle_open(),
			TransportEvent::Message(text) => self.channel.handle_message(&text),
			TransportEvent::Error(err) => self.channel.handle_error(&err),
			TransportEvent::Closed(code) => {
				self.events = None;
				self.outbound = None;
				self.channel.handle_close(code);
			}
		}
	}

	fn fire_due_timers(&mut self) {
		let now = Instant::now();
		let mut due: Vec<(TimerKind, u64, Instant)> = self
			.timers
			.iter()
			.filter(|(_, (_, at))| *at <= now)
			.map(|(kind, (token, at))| (*kind, *token, *at))
			.collect();
		due.sort_by_key(|(_, _, at)| *at);

		for (kind, token, _) in due {
			if self.timers.get(&kind).map(|(t, _)| *t) == Some(token) {
				self.timers.remove(&kind);
				self.channel.fire_timer(kind, token);
			}
		}
	}

	/// Performs pending effects until the channel stops producing them,
	/// then publishes the view.
	fn flush(&mut self) {
		loop {
			let effects = self.channel.take_effects();
			if effects.is_empty() {
				break;
			}
			for effect in effects {
				self.perform(effect);
			}
		}
		self.publish();
	}

	fn perform(&mut self, effect: Effect) {
		match effect {
			Effect::Open => {
				let (tx, rx) = mpsc::unbounded_channel();
				self.outbound = Some(self.transport.open(&self.url, tx));
				self.events = Some(rx);
			}
			Effect::Close { code } => {
				if let Some(outbound) = self.outbound.take() {
					let _ = outbound.send(Outbound::Close(code));
				}
				self.events = None;
			}
			Effect::Send(text) => match &self.outbound {
				Some(outbound) => {
					if outbound.send(Outbound::Text(text)).is_err() {
						debug!(table_id = self.channel.table_id(), "outbound queue closed");
					}
				}
				None => debug!(table_id = self.channel.table_id(), "dropping send with no socket"),
			},
			Effect::StartTimer { kind, token, after } => {
				self.timers.insert(kind, (token, Instant::now() + after));
			}
			Effect::CancelTimer(kind) => {
				self.timers.remove(&kind);
			}
			Effect::FetchSnapshot { attempt } => {
				let Some(fetcher) = self.fetcher.clone() else {
					return;
				};
				let table_id = self.channel.table_id().to_string();
				let results = self.fallback_tx.clone();
				tokio::spawn(async move {
					let result = fetcher.fetch_snapshot(&table_id).await;
					let _ = results.send((attempt, result));
				});
			}
		}
	}

	fn publish(&mut self) {
		let revision = self.channel.revision();
		let table = if self.published_revision == Some(revision) {
			self.view.borrow().table.clone()
		} else {
			self.channel.state().cloned().map(Arc::new)
		};
		self.published_revision = Some(revision);

		let next = SyncView {
			connection: self.channel.connection_state(),
			table,
			event_seq: self.channel.cursor().expected_seq,
			stats: self.channel.stats(),
		};
		self.view.send_if_modified(|current| {
			if *current == next {
				return false;
			}
			*current = next;
			true
		});
	}
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>) -> Option<TransportEvent> {
	match events {
		Some(rx) => rx.recv().await,
		None => pending().await,
	}
}
