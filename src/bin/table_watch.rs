use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::mpsc;

use poker_table_sync::config::{load_client, load_client_auto, ClientConfig};
use poker_table_sync::defaults::ensure_config;
use poker_table_sync::logging::{self, LogConfig};
use poker_table_sync::net::{ClientMessage, PlayerAction};
use poker_table_sync::{SyncClient, TableSyncChannel};

#[derive(Parser)]
#[command(name = "table-watch")]
#[command(about = "Follow a poker table's live state over the sync channel")]
struct Cli {
	/// Table to follow; overrides `table_id` from the config file
	table: Option<String>,

	#[arg(short, long, env = "POKER_SYNC_URL")]
	url: Option<String>,

	#[arg(short, long, env = "POKER_SYNC_API")]
	api: Option<String>,

	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Log to daily files under logs/ instead of stderr
	#[arg(long)]
	log_file: bool,

	/// Print the full table state after every change
	#[arg(short, long)]
	verbose: bool,
}

fn load_config(cli: &Cli) -> Result<ClientConfig, String> {
	let mut config = match &cli.config {
		Some(path) => load_client(path).map_err(|e| e.to_string())?,
		None => {
			ensure_config();
			load_client_auto().unwrap_or_default()
		}
	};
	if let Some(url) = &cli.url {
		config.ws_url = url.clone();
	}
	if let Some(api) = &cli.api {
		config.api_base_url = Some(api.clone());
	}
	if let Some(table) = &cli.table {
		config.table_id = Some(table.clone());
	}
	config.log_file |= cli.log_file;
	Ok(config)
}

fn parse_command(line: &str) -> Option<Command> {
	let mut parts = line.split_whitespace();
	let word = parts.next()?;
	let amount = || parts.clone().next().and_then(|a| a.parse::<f32>().ok());

	let cmd = match word {
		"quit" | "q" => Command::Quit,
		"snapshot" | "s" => Command::Snapshot,
		"state" => Command::State,
		"fold" => Command::Send(ClientMessage::Action { action: PlayerAction::Fold }),
		"check" => Command::Send(ClientMessage::Action { action: PlayerAction::Check }),
		"call" => Command::Send(ClientMessage::Action {
			action: PlayerAction::Call { amount: amount()? },
		}),
		"bet" => Command::Send(ClientMessage::Action {
			action: PlayerAction::Bet { amount: amount()? },
		}),
		"raise" => Command::Send(ClientMessage::Action {
			action: PlayerAction::Raise { amount: amount()? },
		}),
		"allin" => Command::Send(ClientMessage::Action {
			action: PlayerAction::AllIn { amount: amount()? },
		}),
		"chat" => Command::Send(ClientMessage::Chat {
			text: line.trim_start().trim_start_matches("chat").trim().to_string(),
		}),
		_ => Command::Help,
	};
	Some(cmd)
}

enum Command {
	Quit,
	Snapshot,
	State,
	Send(ClientMessage),
	Help,
}

fn print_help() {
	println!("Commands:");
	println!("  snapshot, s        - Request a fresh snapshot");
	println!("  state              - Print the current table state");
	println!("  fold | check       - Act at the table");
	println!("  call|bet|raise|allin <amount>");
	println!("  chat <text>        - Send a chat message");
	println!("  quit, q            - Disconnect");
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	let config = match load_config(&cli) {
		Ok(config) => config,
		Err(err) => {
			eprintln!("{}", err);
			return ExitCode::FAILURE;
		}
	};

	let log_config = if config.log_file {
		LogConfig::daily_file()
	} else {
		LogConfig::default()
	};
	if let Err(err) = logging::init(&log_config) {
		eprintln!("logging disabled: {}", err);
	}

	let Some(table_id) = config.table_id.clone() else {
		eprintln!("No table given. Pass one as an argument or set table_id in client.toml.");
		return ExitCode::FAILURE;
	};

	let mut channel = TableSyncChannel::new(&table_id, config.sync.clone());
	channel.on_state_change(|from, to| println!("* {} -> {}", from, to));
	channel.on_reconnect(|attempts| println!("* reconnected after {} attempt(s)", attempts));
	let verbose = cli.verbose;
	channel.on_snapshot(move |state| {
		if verbose {
			println!("= {}", state);
		}
	});
	channel.on_delta(move |delta, state| {
		println!("< #{} {} {}", delta.event_seq, delta.kind(), delta.payload);
		if verbose {
			println!("= {}", state);
		}
	});

	println!("Following table {} at {}", table_id, config.table_url(&table_id));
	let client = SyncClient::from_config(channel, &config);
	if client.connect().is_err() {
		return ExitCode::FAILURE;
	}

	let (line_tx, mut lines) = mpsc::unbounded_channel();
	std::thread::spawn(move || {
		for line in io::stdin().lock().lines() {
			let Ok(line) = line else { break };
			if line_tx.send(line).is_err() {
				break;
			}
		}
	});

	while let Some(line) = lines.recv().await {
		let Some(cmd) = parse_command(&line) else {
			continue;
		};
		match cmd {
			Command::Quit => break,
			Command::Snapshot => {
				let _ = client.request_snapshot();
			}
			Command::State => {
				let view = client.view();
				println!("state: {}  event_seq: {:?}", view.connection, view.event_seq);
				match view.table {
					Some(table) => println!("{}", table),
					None => println!("(no table state yet)"),
				}
			}
			Command::Send(msg) => {
				if let Err(err) = client.send(msg).await {
					println!("! {}", err);
				}
			}
			Command::Help => print_help(),
		}
	}

	client.shutdown().await;
	println!("Disconnected.");
	ExitCode::SUCCESS
}
