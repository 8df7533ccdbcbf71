//! Scripted transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::error::TransportError;
use super::traits::{RequestOptions, Transport};

/// A request seen by the fake.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
  pub target: String,
  pub options: RequestOptions,
}

/// Transport answering from per-target scripts.
///
/// Each target has a queue of one-shot responses; once it is empty the
/// target's default response (if any) is used, otherwise the call fails with
/// a network error.
#[derive(Default)]
pub struct FakeTransport {
  scripted: Mutex<HashMap<String, VecDeque<Result<Value, u16>>>>,
  defaults: Mutex<HashMap<String, Result<Value, u16>>>,
  requests: Mutex<Vec<RecordedRequest>>,
  reachable: Mutex<bool>,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self {
      reachable: Mutex::new(true),
      ..Self::default()
    }
  }

  /// Always answer `target` with `body`.
  pub fn respond(&self, target: &str, body: Value) {
    self
      .defaults
      .lock()
      .unwrap()
      .insert(target.to_string(), Ok(body));
  }

  /// Always answer `target` with an error status.
  pub fn fail_status(&self, target: &str, status: u16) {
    self
      .defaults
      .lock()
      .unwrap()
      .insert(target.to_string(), Err(status));
  }

  /// Answer the next call to `target` with `body`.
  pub fn respond_once(&self, target: &str, body: Value) {
    self.push(target, Ok(body));
  }

  /// Fail the next call to `target` with `status`.
  pub fn fail_once(&self, target: &str, status: u16) {
    self.push(target, Err(status));
  }

  pub fn set_reachable(&self, reachable: bool) {
    *self.reachable.lock().unwrap() = reachable;
  }

  pub fn requests(&self) -> Vec<RecordedRequest> {
    self.requests.lock().unwrap().clone()
  }

  pub fn requests_to(&self, target: &str) -> usize {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.target == target)
      .count()
  }

  fn push(&self, target: &str, response: Result<Value, u16>) {
    self
      .scripted
      .lock()
      .unwrap()
      .entry(target.to_string())
      .or_default()
      .push_back(response);
  }

  fn next_response(&self, target: &str) -> Option<Result<Value, u16>> {
    let scripted = self
      .scripted
      .lock()
      .unwrap()
      .get_mut(target)
      .and_then(VecDeque::pop_front);
    scripted.or_else(|| self.defaults.lock().unwrap().get(target).cloned())
  }
}

#[async_trait]
impl Transport for FakeTransport {
  async fn request(&self, target: &str, options: &RequestOptions) -> Result<Value, TransportError> {
    self.requests.lock().unwrap().push(RecordedRequest {
      target: target.to_string(),
      options: options.clone(),
    });

    match self.next_response(target) {
      Some(Ok(body)) => Ok(body),
      Some(Err(status)) => Err(TransportError::Status {
        target: target.to_string(),
        status,
        body: String::new(),
      }),
      None => Err(TransportError::Network {
        target: target.to_string(),
        message: "connection refused".to_string(),
      }),
    }
  }

  async fn probe(&self) -> bool {
    *self.reachable.lock().unwrap()
  }
}
