//! Offline manager: cached reads, queued writes and replay on reconnect.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::connectivity::ConnectivityMonitor;
use super::error::{OfflineError, TransportError};
use super::storage::{CacheMap, Mirror, MirrorSnapshot};
use super::traits::{
  CacheEntry, DrainReport, Method, PostOutcome, QueuedWrite, RequestOptions, Transport,
};

/// What happens to a queued write that fails replay.
///
/// The default keeps every failed write queued for the next reconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPolicy {
  /// Move a write aside once it has failed this many replays
  pub max_attempts: Option<u32>,
  /// Move a write aside as soon as the server rejects it permanently
  pub dead_letter_rejected: bool,
}

impl SyncPolicy {
  fn should_dead_letter(&self, write: &QueuedWrite, error: &TransportError) -> bool {
    if self.dead_letter_rejected && error.is_permanent() {
      return true;
    }
    self
      .max_attempts
      .is_some_and(|max| write.attempts >= max)
  }
}

/// Keys the mirror held when this manager last read or wrote it.
///
/// Other processes may share the mirror. Comparing against these keys tells
/// a write they added apart from one this manager already removed.
#[derive(Debug, Default)]
struct SyncedKeys {
  cache: HashSet<String>,
  queue: HashSet<Uuid>,
  dead_letters: HashSet<Uuid>,
}

impl SyncedKeys {
  fn of(snapshot: &MirrorSnapshot) -> Self {
    Self {
      cache: snapshot.cache.keys().cloned().collect(),
      queue: snapshot.queue.iter().map(|w| w.id).collect(),
      dead_letters: snapshot.dead_letters.iter().map(|w| w.id).collect(),
    }
  }
}

struct State {
  data: MirrorSnapshot,
  synced: SyncedKeys,
}

/// Offline-tolerant access to a remote API.
///
/// Reads are cached and served from cache while offline. Writes that cannot
/// be delivered are queued and replayed in order when connectivity returns.
/// Cache and queue are mirrored to durable storage after every change, merged
/// with whatever other processes saved there in the meantime.
pub struct OfflineManager {
  transport: Arc<dyn Transport>,
  mirror: Arc<dyn Mirror>,
  connectivity: ConnectivityMonitor,
  /// Never held across an await
  state: Mutex<State>,
  draining: tokio::sync::Mutex<()>,
  sync_policy: SyncPolicy,
  max_entries: Option<usize>,
}

impl OfflineManager {
  /// Create a manager, restoring cache and queue from `mirror`.
  pub fn new(
    transport: Arc<dyn Transport>,
    mirror: Arc<dyn Mirror>,
    connectivity: ConnectivityMonitor,
  ) -> Self {
    let state = mirror.load();
    tracing::debug!(
      cached = state.cache.len(),
      queued = state.queue.len(),
      dead_letters = state.dead_letters.len(),
      "loaded offline state"
    );

    Self {
      transport,
      mirror,
      connectivity,
      state: Mutex::new(State {
        synced: SyncedKeys::of(&state),
        data: state,
      }),
      draining: tokio::sync::Mutex::new(()),
      sync_policy: SyncPolicy::default(),
      max_entries: None,
    }
  }

  pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
    self.sync_policy = policy;
    self
  }

  /// Bound the number of cached responses; the oldest are evicted first.
  pub fn with_max_entries(mut self, max_entries: Option<usize>) -> Self {
    self.max_entries = max_entries;
    self
  }

  pub fn connectivity(&self) -> &ConnectivityMonitor {
    &self.connectivity
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  /// Serve a read, falling back to the cache when offline or on failure.
  ///
  /// Successful responses to reads (GET/HEAD) replace the cache entry for
  /// `target` + `options`. Error responses are never cached.
  pub async fn fetch_with_cache(
    &self,
    target: &str,
    options: &RequestOptions,
  ) -> Result<Value, OfflineError> {
    let key = options.cache_key(target);

    if !self.is_online() {
      return self.cached(&key).ok_or_else(|| {
        tracing::debug!(target, "offline with no cached response");
        OfflineError::NoCachedDataOffline {
          target: target.to_string(),
        }
      });
    }

    match self.transport.request(target, options).await {
      Ok(data) => {
        if options.method.is_read() {
          self.store(key, target, data.clone());
        }
        Ok(data)
      }
      Err(e) => match self.cached(&key) {
        Some(data) => {
          tracing::warn!(target, error = %e, "request failed, serving cached response");
          Ok(data)
        }
        None => Err(e.into()),
      },
    }
  }

  /// Submit a write, queueing it when it cannot be delivered now.
  ///
  /// Offline, the write is queued and `PostOutcome::Queued` is returned. Online,
  /// a failed write is queued too, but the error is still returned.
  pub async fn post_with_sync(&self, target: &str, payload: Value) -> Result<PostOutcome, OfflineError> {
    let write = QueuedWrite::new(target, payload, Method::Post);

    if !self.is_online() {
      tracing::info!(target, id = %write.id, "offline, queued write for later delivery");
      self.enqueue(write);
      return Ok(PostOutcome::Queued);
    }

    match self.transport.request(target, &write.request_options()).await {
      Ok(body) => Ok(PostOutcome::Delivered(body)),
      Err(e) => {
        tracing::warn!(target, id = %write.id, error = %e, "write failed, queued for retry");
        self.enqueue(write);
        Err(e.into())
      }
    }
  }

  /// Replay queued writes one at a time, in queue order.
  ///
  /// Writes queued while the drain runs go behind the snapshot; failed writes
  /// are appended after them. Returns immediately when offline or when another
  /// drain is already running.
  pub async fn sync_pending(&self) -> DrainReport {
    let mut report = DrainReport::default();

    if !self.is_online() {
      tracing::debug!("offline, skipping drain");
      return report;
    }

    let Ok(_guard) = self.draining.try_lock() else {
      tracing::debug!("drain already in progress");
      return report;
    };

    let snapshot: Vec<QueuedWrite> = {
      let mut state = self.lock_state();
      self.save(&mut state);
      state.data.queue.drain(..).collect()
    };
    if snapshot.is_empty() {
      return report;
    }

    report.attempted = snapshot.len();
    tracing::info!(count = snapshot.len(), "replaying queued writes");

    for mut write in snapshot {
      match self
        .transport
        .request(&write.target, &write.request_options())
        .await
      {
        Ok(_) => {
          tracing::debug!(target = %write.target, id = %write.id, "replayed queued write");
          report.delivered += 1;
        }
        Err(e) => {
          write.attempts += 1;
          let dead_letter = self.sync_policy.should_dead_letter(&write, &e);
          tracing::warn!(
            target = %write.target,
            id = %write.id,
            attempts = write.attempts,
            dead_letter,
            error = %e,
            "replay of queued write failed"
          );

          let mut state = self.lock_state();
          if dead_letter {
            state.data.dead_letters.push(write);
            report.dead_lettered += 1;
          } else {
            state.data.queue.push_back(write);
            report.requeued += 1;
          }
        }
      }
    }

    self.persist();
    tracing::info!(
      delivered = report.delivered,
      requeued = report.requeued,
      dead_lettered = report.dead_lettered,
      "drain finished"
    );

    report
  }

  /// Drain the queue every time connectivity comes back.
  pub fn spawn_sync_on_reconnect(self: &Arc<Self>) -> JoinHandle<()> {
    let manager = Arc::clone(self);
    let mut rx = self.connectivity.subscribe();

    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if online {
          manager.sync_pending().await;
        }
      }
    })
  }

  /// Pick up whatever other processes saved to the mirror.
  ///
  /// Returns how many queued writes were new to this manager.
  pub fn refresh(&self) -> usize {
    let mut state = self.lock_state();
    let before: HashSet<Uuid> = state.data.queue.iter().map(|w| w.id).collect();
    self.save(&mut state);
    state
      .data
      .queue
      .iter()
      .filter(|w| !before.contains(&w.id))
      .count()
  }

  /// Writes waiting for delivery, oldest first.
  pub fn pending_writes(&self) -> Vec<QueuedWrite> {
    self.lock_state().data.queue.iter().cloned().collect()
  }

  /// Writes removed from the queue by the sync policy.
  pub fn dead_letters(&self) -> Vec<QueuedWrite> {
    self.lock_state().data.dead_letters.clone()
  }

  /// Cached responses, most recent first.
  pub fn cached_entries(&self) -> Vec<CacheEntry> {
    let mut entries: Vec<CacheEntry> = self.lock_state().data.cache.values().cloned().collect();
    entries.sort_by(|a, b| b.cached_at.cmp(&a.cached_at));
    entries
  }

  /// Drop every cached response. Returns how many were removed.
  pub fn clear_cache(&self) -> usize {
    let mut state = self.lock_state();
    let removed = state.data.cache.len();
    state.data.cache.clear();
    self.save(&mut state);
    removed
  }

  /// Put dead-lettered writes back at the tail of the queue.
  pub fn requeue_dead_letters(&self) -> usize {
    let mut state = self.lock_state();
    let dead_letters = std::mem::take(&mut state.data.dead_letters);
    let count = dead_letters.len();
    for mut write in dead_letters {
      write.attempts = 0;
      state.data.queue.push_back(write);
    }
    self.save(&mut state);
    count
  }

  /// Drop dead-lettered writes for good.
  pub fn discard_dead_letters(&self) -> usize {
    let mut state = self.lock_state();
    let count = state.data.dead_letters.len();
    state.data.dead_letters.clear();
    self.save(&mut state);
    count
  }

  fn cached(&self, key: &str) -> Option<Value> {
    self
      .lock_state()
      .data
      .cache
      .get(key)
      .map(|entry| entry.data.clone())
  }

  fn store(&self, key: String, target: &str, data: Value) {
    let mut state = self.lock_state();
    state.data.cache.insert(
      key,
      CacheEntry {
        target: target.to_string(),
        data,
        cached_at: Utc::now(),
      },
    );
    self.save(&mut state);
  }

  fn enqueue(&self, write: QueuedWrite) {
    let mut state = self.lock_state();
    state.data.queue.push_back(write);
    self.save(&mut state);
  }

  fn persist(&self) {
    let mut state = self.lock_state();
    self.save(&mut state);
  }

  /// Merge in what other processes saved, then write the result back.
  ///
  /// Save failures are logged; in-memory state stays authoritative.
  fn save(&self, state: &mut State) {
    let State { data, synced } = state;
    let max_entries = self.max_entries;

    let result = self.mirror.update(data, &mut |ours, stored| {
      if let Some(theirs) = stored {
        merge_cache(&mut ours.cache, theirs.cache, &synced.cache);
        let mut queue = Vec::from(std::mem::take(&mut ours.queue));
        merge_writes(&mut queue, theirs.queue.into(), &synced.queue);
        ours.queue = queue.into();
        merge_writes(&mut ours.dead_letters, theirs.dead_letters, &synced.dead_letters);
      }
      if let Some(max) = max_entries {
        evict_oldest(&mut ours.cache, max);
      }
    });

    match result {
      Ok(()) => *synced = SyncedKeys::of(data),
      Err(e) => tracing::warn!(error = %e, "failed to persist offline state"),
    }
  }

  fn lock_state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Three-way merge of a persisted write list.
///
/// Writes another process added since the last sync are appended; writes it
/// removed are dropped. Writes this manager removed stay removed.
fn merge_writes(ours: &mut Vec<QueuedWrite>, theirs: Vec<QueuedWrite>, synced: &HashSet<Uuid>) {
  let stored: HashSet<Uuid> = theirs.iter().map(|w| w.id).collect();
  ours.retain(|w| !synced.contains(&w.id) || stored.contains(&w.id));

  let known: HashSet<Uuid> = ours.iter().map(|w| w.id).collect();
  let added: Vec<QueuedWrite> = theirs
    .into_iter()
    .filter(|w| !synced.contains(&w.id) && !known.contains(&w.id))
    .collect();
  if !added.is_empty() {
    tracing::debug!(count = added.len(), "picked up writes saved by another process");
  }
  ours.extend(added);
}

/// Same merge for cached responses; the newer of two entries for a key wins.
fn merge_cache(ours: &mut CacheMap, theirs: CacheMap, synced: &HashSet<String>) {
  ours.retain(|key, _| !synced.contains(key) || theirs.contains_key(key));

  for (key, entry) in theirs {
    let newer = match ours.get(&key) {
      Some(current) => entry.cached_at > current.cached_at,
      None => !synced.contains(&key),
    };
    if newer {
      ours.insert(key, entry);
    }
  }
}

fn evict_oldest(cache: &mut CacheMap, max: usize) {
  while cache.len() > max {
    let oldest = cache
      .iter()
      .min_by_key(|(_, entry)| entry.cached_at)
      .map(|(key, _)| key.clone());
    match oldest {
      Some(key) => {
        cache.remove(&key);
      }
      None => break,
    }
  }
}
