use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::{ConnectivityEvent, Transport};

/// Event source that turns periodic reachability probes into connectivity events
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<ConnectivityEvent>,
}

impl EventHandler {
  /// Probe `transport` every `interval`, starting immediately
  pub fn new(transport: Arc<dyn Transport>, interval: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn probe loop
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;

        let event = if transport.probe().await {
          ConnectivityEvent::Online
        } else {
          ConnectivityEvent::Offline
        };

        if tx.send(event).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<ConnectivityEvent> {
    self.rx.recv().await
  }
}
