//! Core traits and types for the offline layer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::error::TransportError;

/// Header carrying the client-generated id of a queued write.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// The network side of the offline layer.
///
/// Implementors perform one request and return the decoded response body.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Send a request to `target` and return the parsed body.
  async fn request(&self, target: &str, options: &RequestOptions) -> Result<Value, TransportError>;

  /// Check whether the remote side is currently reachable.
  async fn probe(&self) -> bool;
}

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  #[default]
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  /// Reads are the only requests whose responses are cached.
  pub fn is_read(self) -> bool {
    matches!(self, Self::Get | Self::Head)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
    }
  }
}

/// Request configuration: method, headers and optional JSON body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
  #[serde(default)]
  pub method: Method,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<Value>,
}

impl RequestOptions {
  /// A plain GET.
  pub fn read() -> Self {
    Self::default()
  }

  /// A POST carrying `payload`.
  pub fn write(payload: Value) -> Self {
    Self {
      method: Method::Post,
      headers: BTreeMap::new(),
      body: Some(payload),
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  /// Stable cache key for `target` requested with these options.
  ///
  /// Headers live in a sorted map, so the serialized form is canonical and two
  /// requests differing only in header insertion order share a key.
  pub fn cache_key(&self, target: &str) -> String {
    let options = serde_json::to_string(self).unwrap_or_default();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(target.as_bytes());
    hasher.update(b"\n");
    hasher.update(options.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// The last successful response for one cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  /// Target the response was fetched from
  pub target: String,
  /// Parsed response body
  pub data: Value,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// A write that has not been confirmed as delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedWrite {
  /// Client-generated id, sent as the idempotency key on every attempt
  pub id: Uuid,
  pub target: String,
  pub payload: Value,
  pub method: Method,
  pub queued_at: DateTime<Utc>,
  /// Failed replay attempts so far
  #[serde(default)]
  pub attempts: u32,
}

impl QueuedWrite {
  pub fn new(target: impl Into<String>, payload: Value, method: Method) -> Self {
    Self {
      id: Uuid::new_v4(),
      target: target.into(),
      payload,
      method,
      queued_at: Utc::now(),
      attempts: 0,
    }
  }

  /// Options used to (re)deliver this write.
  pub fn request_options(&self) -> RequestOptions {
    RequestOptions::write(self.payload.clone())
      .with_method(self.method)
      .with_header(IDEMPOTENCY_HEADER, self.id.to_string())
  }
}

/// Outcome of a write submitted through the offline layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
  /// The server accepted the write and answered with this body.
  Delivered(Value),
  /// The write was stored for delivery on reconnect.
  Queued,
}

impl PostOutcome {
  pub fn is_queued(&self) -> bool {
    matches!(self, Self::Queued)
  }

  /// JSON rendering shown to users: the server response, or
  /// `{"success": true, "queued": true}` for queued writes.
  pub fn to_json(&self) -> Value {
    match self {
      Self::Delivered(body) => body.clone(),
      Self::Queued => serde_json::json!({ "success": true, "queued": true }),
    }
  }
}

/// Summary of one drain of the write queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Entries taken from the queue for replay
  pub attempted: usize,
  pub delivered: usize,
  /// Failed entries put back at the tail of the queue
  pub requeued: usize,
  /// Failed entries moved aside by the sync policy
  pub dead_lettered: usize,
}
