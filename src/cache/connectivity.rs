//! Process-wide online/offline flag.

use std::sync::Arc;

use tokio::sync::watch;

/// A change reported by the connectivity event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
  Online,
  Offline,
}

/// Tracks whether the remote side is reachable.
///
/// Clones share the same state. Subscribers are woken only when the value
/// actually changes, so repeated notifications of the same state are ignored.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
  tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
  pub fn new(initially_online: bool) -> Self {
    let (tx, _rx) = watch::channel(initially_online);
    Self { tx: Arc::new(tx) }
  }

  /// Monitor for contexts with no connectivity signal.
  pub fn always_online() -> Self {
    Self::new(true)
  }

  /// Last observed state.
  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record the current state. Returns true if it changed.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      if online {
        tracing::info!("connectivity: back online");
      } else {
        tracing::warn!("connectivity: offline");
      }
    }

    changed
  }

  pub fn apply(&self, event: ConnectivityEvent) -> bool {
    self.set_online(event == ConnectivityEvent::Online)
  }

  /// Receiver notified on every state change.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::always_online()
  }
}
