//! Error types for the offline data-access layer.

use thiserror::Error;

/// Errors surfaced to callers of the read and write paths.
#[derive(Debug, Error)]
pub enum OfflineError {
  /// A read was attempted while offline and nothing was cached for it.
  #[error("no cached data for {target} while offline")]
  NoCachedDataOffline { target: String },

  /// The network call failed and no fallback applied.
  #[error(transparent)]
  Transport(#[from] TransportError),
}

/// A failed network call.
#[derive(Debug, Error)]
pub enum TransportError {
  /// The target could not be turned into a request URL.
  #[error("invalid request target {target}: {message}")]
  InvalidTarget { target: String, message: String },

  /// DNS, connection, TLS or timeout failure.
  #[error("request to {target} failed: {message}")]
  Network { target: String, message: String },

  /// The server answered with a non-success status.
  #[error("{target} responded with status {status}")]
  Status {
    target: String,
    status: u16,
    body: String,
  },

  /// The response body could not be read.
  #[error("failed to read response from {target}: {message}")]
  Decode { target: String, message: String },
}

impl TransportError {
  /// Whether retrying the same request can never succeed.
  ///
  /// Client errors are permanent, except request timeouts and rate limiting.
  pub fn is_permanent(&self) -> bool {
    match self {
      Self::InvalidTarget { .. } => true,
      Self::Status { status, .. } => (400..500).contains(status) && *status != 408 && *status != 429,
      Self::Network { .. } | Self::Decode { .. } => false,
    }
  }
}

/// A failure to write to durable storage.
///
/// These never reach callers of the read/write paths; the manager logs them
/// and keeps its in-memory state.
#[derive(Debug, Error)]
pub enum PersistError {
  #[error("storage error: {0}")]
  Storage(#[from] rusqlite::Error),

  #[error("failed to serialize offline state: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("lock poisoned: {0}")]
  Poisoned(String),

  /// Raised by the in-memory mirror when told to fail.
  #[error("storage unavailable")]
  Unavailable,
}
