pub mod backoff;
pub mod channel;
pub mod runtime;
pub mod sequencer;
pub mod state;

pub use backoff::Backoff;
pub use channel::{Effect, SnapshotRecord, SnapshotSource, TableSyncChannel, TimerKind, NORMAL_CLOSURE};
pub use runtime::{SyncClient, SyncView};
pub use sequencer::{Sequencer, Verdict};
pub use state::{ConnectionState, Cursor, SyncStats};
