use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

/// Socket lifecycle as seen by the sync client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
	Open,
	Message(String),
	Error(String),
	/// Always the last event of a connection, including failed connects.
	Closed(Option<u16>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
	Text(String),
	Close(u16),
}

/// Opens one connection per call. Events for that connection arrive on
/// `events`; dropping the returned sender closes the socket.
pub trait Transport: Send + Sync + 'static {
	fn open(&self, url: &str, events: UnboundedSender<TransportEvent>) -> UnboundedSender<Outbound>;
}

#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl Transport for WebSocketTransport {
	fn open(&self, url: &str, events: UnboundedSender<TransportEvent>) -> UnboundedSender<Outbound> {
		let (tx, rx) = mpsc::unbounded_channel();
		tokio::spawn(run_connection(url.to_string(), events, rx));
		tx
	}
}

async fn run_connection(url: String, events: UnboundedSender<TransportEvent>, mut outbound: UnboundedReceiver<Outbound>) {
	let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
		Ok((stream, _response)) => stream,
		Err(err) => {
			let _ = events.send(TransportEvent::Error(err.to_string()));
			let _ = events.send(TransportEvent::Closed(None));
			return;
		}
	};
	debug!(%url, "websocket connected");
	let _ = events.send(TransportEvent::Open);

	let (mut sink, mut source) = stream.split();
	let mut close_code = None;

	loop {
		tokio::select! {
			out = outbound.recv() => match out {
				Some(Outbound::Text(text)) => {
					trace!(len = text.len(), "websocket send");
					if let Err(err) = sink.send(Message::text(text)).await {
						let _ = events.send(TransportEvent::Error(err.to_string()));
						break;
					}
				}
				Some(Outbound::Close(code)) => {
					let frame = CloseFrame {
						code: CloseCode::from(code),
						reason: "".into(),
					};
					let _ = sink.send(Message::Close(Some(frame))).await;
					close_code = Some(code);
					break;
				}
				None => {
					let _ = sink.close().await;
					break;
				}
			},
			incoming = source.next() => match incoming {
				Some(Ok(Message::Text(text))) => {
					if events.send(TransportEvent::Message(text.as_str().to_owned())).is_err() {
						break;
					}
				}
				Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
					Ok(text) => {
						let _ = events.send(TransportEvent::Message(text));
					}
					Err(_) => debug!(len = bytes.len(), "ignoring non-utf8 binary frame"),
				},
				Some(Ok(Message::Close(frame))) => {
					close_code = frame.map(|f| u16::from(f.code));
					break;
				}
				Some(Ok(_)) => {}
				Some(Err(err)) => {
					let _ = events.send(TransportEvent::Error(err.to_string()));
					break;
				}
				None => break,
			},
		}
	}

	let _ = events.send(TransportEvent::Closed(close_code));
}
