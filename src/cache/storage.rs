//! Durable mirror of the response cache and write queue.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;

use super::error::PersistError;
use super::traits::{CacheEntry, QueuedWrite};

pub const CACHE_SLOT: &str = "offline_cache";
pub const QUEUE_SLOT: &str = "offline_queue";
pub const DEAD_LETTER_SLOT: &str = "offline_dead_letters";

/// Cached responses by cache key.
pub type CacheMap = HashMap<String, CacheEntry>;

/// Everything the mirror persists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirrorSnapshot {
  pub cache: CacheMap,
  pub queue: VecDeque<QueuedWrite>,
  pub dead_letters: Vec<QueuedWrite>,
}

/// Trait for mirror backends.
///
/// Backends only move text in and out of named slots; the JSON format and the
/// corruption policy live in the provided `load`/`save`.
pub trait Mirror: Send + Sync {
  /// Read the raw contents of a slot.
  fn read_slot(&self, slot: &str) -> Result<Option<String>, PersistError>;

  /// Write several slots together.
  fn write_slots(&self, slots: &[(&str, String)]) -> Result<(), PersistError>;

  /// Load the persisted state. Missing or unreadable slots come back empty.
  fn load(&self) -> MirrorSnapshot {
    MirrorSnapshot {
      cache: decode_slot(self, CACHE_SLOT),
      queue: decode_slot(self, QUEUE_SLOT),
      dead_letters: decode_slot(self, DEAD_LETTER_SLOT),
    }
  }

  /// Load the persisted state, failing if any slot is unreadable.
  fn try_load(&self) -> Result<MirrorSnapshot, PersistError> {
    read_snapshot(|slot| self.read_slot(slot))
  }

  /// Persist the full state.
  fn save(&self, snapshot: &MirrorSnapshot) -> Result<(), PersistError> {
    self.write_slots(&encode_snapshot(snapshot)?)
  }

  /// Fold the stored state into `ours` with `merge`, then persist `ours`.
  ///
  /// `merge` gets `None` when the stored state cannot be read. Backends that
  /// several processes share hold a write lock across the whole step.
  fn update(&self, ours: &mut MirrorSnapshot, merge: &mut MergeFn<'_>) -> Result<(), PersistError> {
    let stored = self
      .try_load()
      .map_err(|e| tracing::warn!(error = %e, "failed to read offline state, overwriting it"))
      .ok();
    merge(ours, stored);
    self.save(ours)
  }
}

/// Callback that folds the stored state (if readable) into the in-memory one.
pub type MergeFn<'a> = dyn FnMut(&mut MirrorSnapshot, Option<MirrorSnapshot>) + 'a;

fn read_snapshot<F>(mut read: F) -> Result<MirrorSnapshot, PersistError>
where
  F: FnMut(&str) -> Result<Option<String>, PersistError>,
{
  fn parse<T: DeserializeOwned + Default>(raw: Option<String>) -> Result<T, PersistError> {
    match raw {
      Some(raw) => Ok(serde_json::from_str(&raw)?),
      None => Ok(T::default()),
    }
  }

  Ok(MirrorSnapshot {
    cache: parse(read(CACHE_SLOT)?)?,
    queue: parse(read(QUEUE_SLOT)?)?,
    dead_letters: parse(read(DEAD_LETTER_SLOT)?)?,
  })
}

fn encode_snapshot(snapshot: &MirrorSnapshot) -> Result<Vec<(&'static str, String)>, PersistError> {
  Ok(vec![
    (CACHE_SLOT, serde_json::to_string(&snapshot.cache)?),
    (QUEUE_SLOT, serde_json::to_string(&snapshot.queue)?),
    (DEAD_LETTER_SLOT, serde_json::to_string(&snapshot.dead_letters)?),
  ])
}

/// Mirror that keeps slots in memory only.
///
/// Used when persistence is disabled, and by tests (which can make saves fail).
#[derive(Debug, Default)]
pub struct MemoryMirror {
  slots: Mutex<HashMap<String, String>>,
  fail_saves: AtomicBool,
}

impl MemoryMirror {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every subsequent save fail (or succeed again).
  #[cfg(test)]
  pub fn set_fail_saves(&self, fail: bool) {
    self.fail_saves.store(fail, Ordering::SeqCst);
  }

  /// Overwrite a slot with raw text.
  #[cfg(test)]
  pub fn put_raw(&self, slot: &str, raw: &str) {
    if let Ok(mut slots) = self.slots.lock() {
      slots.insert(slot.to_string(), raw.to_string());
    }
  }
}

impl Mirror for MemoryMirror {
  fn read_slot(&self, slot: &str) -> Result<Option<String>, PersistError> {
    let slots = self
      .slots
      .lock()
      .map_err(|e| PersistError::Poisoned(e.to_string()))?;
    Ok(slots.get(slot).cloned())
  }

  fn write_slots(&self, new_slots: &[(&str, String)]) -> Result<(), PersistError> {
    if self.fail_saves.load(Ordering::SeqCst) {
      return Err(PersistError::Unavailable);
    }

    let mut slots = self
      .slots
      .lock()
      .map_err(|e| PersistError::Poisoned(e.to_string()))?;
    for (slot, data) in new_slots {
      slots.insert((*slot).to_string(), data.clone());
    }
    Ok(())
  }
}

/// SQLite-backed mirror.
pub struct SqliteMirror {
  conn: Mutex<Connection>,
}

impl SqliteMirror {
  /// Open or create the mirror database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create offline storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open offline storage at {}: {}", path.display(), e))?;
    // Other chapel processes may hold the write lock briefly
    conn
      .busy_timeout(BUSY_TIMEOUT)
      .map_err(|e| eyre!("Failed to configure offline storage: {}", e))?;

    let mirror = Self {
      conn: Mutex::new(conn),
    };
    mirror.run_migrations()?;

    Ok(mirror)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("chapel").join("offline.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(MIRROR_SCHEMA)
      .map_err(|e| eyre!("Failed to run offline storage migrations: {}", e))?;

    Ok(())
  }
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Schema for the slot table.
const MIRROR_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS offline_slots (
    slot TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

fn select_slot(conn: &Connection, slot: &str) -> Result<Option<String>, PersistError> {
  let data = conn
    .query_row(
      "SELECT data FROM offline_slots WHERE slot = ?",
      params![slot],
      |row| row.get(0),
    )
    .optional()?;

  Ok(data)
}

fn upsert_slots(conn: &Connection, slots: &[(&str, String)]) -> Result<(), PersistError> {
  for (slot, data) in slots {
    conn.execute(
      "INSERT OR REPLACE INTO offline_slots (slot, data, saved_at)
       VALUES (?, ?, datetime('now'))",
      params![slot, data],
    )?;
  }
  Ok(())
}

impl Mirror for SqliteMirror {
  fn read_slot(&self, slot: &str) -> Result<Option<String>, PersistError> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| PersistError::Poisoned(e.to_string()))?;

    select_slot(&conn, slot)
  }

  fn write_slots(&self, slots: &[(&str, String)]) -> Result<(), PersistError> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| PersistError::Poisoned(e.to_string()))?;

    let tx = conn.transaction()?;
    upsert_slots(&tx, slots)?;
    tx.commit()?;

    Ok(())
  }

  fn update(&self, ours: &mut MirrorSnapshot, merge: &mut MergeFn<'_>) -> Result<(), PersistError> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| PersistError::Poisoned(e.to_string()))?;

    // IMMEDIATE takes the write lock up front, so no other process can save
    // between our read and our write.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let stored = read_snapshot(|slot| select_slot(&tx, slot))
      .map_err(|e| tracing::warn!(error = %e, "failed to read offline state, overwriting it"))
      .ok();
    merge(ours, stored);
    upsert_slots(&tx, &encode_snapshot(ours)?)?;
    tx.commit()?;

    Ok(())
  }
}
