//! Offline-tolerant data access.
//!
//! This module keeps a client usable when the network drops:
//! - Reads are cached per target + request options and served from cache while offline
//! - Writes that cannot be delivered are queued and replayed in order on reconnect
//! - Cache and queue are mirrored to durable storage after every change
//!
//! The network and the storage backend are injected, so the layer knows
//! nothing about the site it talks to.

mod connectivity;
mod error;
#[cfg(test)]
pub mod fake;
mod layer;
mod storage;
mod traits;

pub use connectivity::{ConnectivityEvent, ConnectivityMonitor};
pub use error::{OfflineError, TransportError};
pub use layer::{OfflineManager, SyncPolicy};
pub use storage::{MemoryMirror, Mirror, SqliteMirror};
pub use traits::{DrainReport, Method, PostOutcome, RequestOptions, Transport};
