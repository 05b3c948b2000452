use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use poker_table_sync::logging::{self, LogConfig};
use poker_table_sync::merge::deep_merge;
use poker_table_sync::net::protocol::{encode_message, Delta, Snapshot};

#[derive(Parser, Clone)]
#[command(name = "mock-table-server")]
#[command(about = "Serve a simulated poker table over the sync protocol")]
struct Cli {
	#[arg(short, long, default_value = "127.0.0.1:9999")]
	bind: String,

	/// Milliseconds between generated deltas
	#[arg(short, long, default_value_t = 1000)]
	interval: u64,

	#[arg(long, default_value = "v1")]
	schema: String,

	#[arg(long, default_value_t = 1)]
	table_version: u64,

	/// Chance of swapping a delta with the one after it
	#[arg(long, default_value_t = 0.0)]
	shuffle: f64,

	/// Chance of silently dropping a delta for a given client
	#[arg(long, default_value_t = 0.0)]
	drop: f64,

	/// Also push deltas before the initial snapshot
	#[arg(long)]
	eager: bool,
}

struct TableSim {
	state: Value,
	event_seq: u64,
	table_version: u64,
	schema: String,
	hand: u64,
}

impl TableSim {
	fn new(cli: &Cli) -> Self {
		let seats: serde_json::Map<String, Value> = (1..=6)
			.map(|seat| (seat.to_string(), json!({"stack": 1000, "bet": 0, "folded": false})))
			.collect();
		Self {
			state: json!({
				"hand": 1,
				"pot": 0,
				"board": [],
				"seats": seats,
				"timer": {"seat": 1, "remaining_ms": 30000},
			}),
			event_seq: 0,
			table_version: cli.table_version,
			schema: cli.schema.clone(),
			hand: 1,
		}
	}

	fn snapshot(&self) -> Snapshot {
		Snapshot {
			payload: self.state.clone(),
			event_seq: Some(self.event_seq),
			table_version: Some(self.table_version),
			schema_version: Some(self.schema.clone()),
		}
	}

	fn step(&mut self) -> Delta {
		let mut rng = rand::rng();
		let seat = rng.random_range(1..=6u32);
		let (domain, payload) = match rng.random_range(0..4u32) {
			0 => {
				let bet = rng.random_range(1..=10u64) * 10;
				let pot = self.state["pot"].as_u64().unwrap_or(0) + bet;
				let stack = self.state["seats"][seat.to_string()]["stack"].as_u64().unwrap_or(0);
				(
					"seat",
					json!({
						"pot": pot,
						"seats": {seat.to_string(): {"bet": bet, "stack": stack.saturating_sub(bet)}},
					}),
				)
			}
			1 => ("timer", json!({"timer": {"seat": seat, "remaining_ms": rng.random_range(0..30_000u64)}})),
			2 => {
				let cards = ["Ah", "Kd", "7c", "7s", "2h", "Tc", "Js", "9d"];
				let count = rng.random_range(0..=5usize);
				let board: Vec<&str> = cards.iter().take(count).copied().collect();
				("board", json!({"board": board}))
			}
			_ => {
				self.hand += 1;
				("pot", json!({"pot": 0, "hand": self.hand, "board": []}))
			}
		};

		self.event_seq += 1;
		deep_merge(&mut self.state, payload.clone());
		Delta {
			domain: domain.to_string(),
			payload,
			event_seq: self.event_seq,
			table_version: Some(self.table_version),
			schema_version: Some(self.schema.clone()),
		}
	}
}

async fn run_table(sim: Arc<Mutex<TableSim>>, deltas: broadcast::Sender<Delta>, interval: Duration) {
	let mut ticker = tokio::time::interval(interval);
	loop {
		ticker.tick().await;
		let delta = match sim.lock() {
			Ok(mut sim) => sim.step(),
			Err(_) => return,
		};
		let _ = deltas.send(delta);
	}
}

fn snapshot_text(sim: &Mutex<TableSim>) -> Option<String> {
	let frame = sim.lock().ok()?.snapshot().to_frame();
	Some(frame.to_string())
}

async fn handle_connection(
	stream: TcpStream,
	addr: SocketAddr,
	sim: Arc<Mutex<TableSim>>,
	mut deltas: broadcast::Receiver<Delta>,
	cli: Cli,
) {
	let ws = match tokio_tungstenite::accept_async(stream).await {
		Ok(ws) => ws,
		Err(err) => {
			warn!(%addr, error = %err, "handshake failed");
			return;
		}
	};
	info!(%addr, "client connected");
	let (mut sink, mut source) = ws.split();

	if cli.eager {
		if let Ok(delta) = deltas.recv().await {
			let _ = sink.send(Message::text(delta.to_frame().to_string())).await;
		}
	}
	if let Some(text) = snapshot_text(&sim) {
		if sink.send(Message::text(text)).await.is_err() {
			return;
		}
	}

	let mut held: Option<Delta> = None;

	loop {
		tokio::select! {
			incoming = source.next() => {
				let text = match incoming {
					Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(_)) => continue,
					Some(Err(err)) => {
						debug!(%addr, error = %err, "read failed");
						break;
					}
				};
				let kind = serde_json::from_str::<Value>(&text)
					.ok()
					.and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string));
				let reply = match kind.as_deref() {
					Some("ping") => encode_message(&json!({"type": "pong"})).ok(),
					Some("request_snapshot") | Some("get_snapshot") => snapshot_text(&sim),
					Some(other) => {
						info!(%addr, kind = other, "client message");
						None
					}
					None => None,
				};
				if let Some(reply) = reply {
					if sink.send(Message::text(reply)).await.is_err() {
						break;
					}
				}
			}
			delta = deltas.recv() => {
				let delta = match delta {
					Ok(delta) => delta,
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!(%addr, skipped, "client lagging");
						continue;
					}
					Err(broadcast::error::RecvError::Closed) => break,
				};

				let (drop, shuffle) = {
					let mut rng = rand::rng();
					(rng.random_bool(cli.drop.clamp(0.0, 1.0)), rng.random_bool(cli.shuffle.clamp(0.0, 1.0)))
				};
				if drop {
					debug!(%addr, seq = delta.event_seq, "dropping delta");
					continue;
				}

				let mut outgoing = Vec::new();
				match held.take() {
					Some(earlier) => {
						outgoing.push(delta);
						outgoing.push(earlier);
					}
					None if shuffle => {
						held = Some(delta);
					}
					None => outgoing.push(delta),
				}

				for delta in outgoing {
					if sink.send(Message::text(delta.to_frame().to_string())).await.is_err() {
						info!(%addr, "client disconnected");
						return;
					}
				}
			}
		}
	}
	info!(%addr, "client disconnected");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
	let cli = Cli::parse();
	if let Err(err) = logging::init(&LogConfig::default()) {
		eprintln!("logging disabled: {}", err);
	}

	let listener = TcpListener::bind(&cli.bind).await?;
	info!(bind = %cli.bind, schema = %cli.schema, table_version = cli.table_version, "mock table server listening");

	let sim = Arc::new(Mutex::new(TableSim::new(&cli)));
	let (deltas, _) = broadcast::channel(256);
	tokio::spawn(run_table(Arc::clone(&sim), deltas.clone(), Duration::from_millis(cli.interval.max(1))));

	loop {
		let (stream, addr) = listener.accept().await?;
		tokio::spawn(handle_connection(stream, addr, Arc::clone(&sim), deltas.subscribe(), cli.clone()));
	}
}
