#![allow(clippy::collapsible_if)]
#![allow(clippy::large_enum_variant)]

pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod merge;
pub mod net;
pub mod sync;

pub use config::{ClientConfig, SyncConfig};
pub use error::{Result, SyncError};
pub use sync::{ConnectionState, SyncClient, SyncView, TableSyncChannel};
