pub mod fallback;
pub mod protocol;
pub mod transport;

pub use fallback::{HttpSnapshotFetcher, SnapshotFetcher};
pub use protocol::{ClientMessage, Delta, InboundMessage, PlayerAction, Snapshot};
pub use transport::{Outbound, Transport, TransportEvent, WebSocketTransport};
