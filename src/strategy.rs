//! Storage strategy trait and the bundled backend implementations.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::types::{HabitContext, HabitRecord, PayloadMap, WriteAck};

/// Pluggable persistence backend for habit records.
///
/// Every capability is optional. The default bodies answer "no record",
/// "write not supported" and "nothing to enumerate", so an implementation
/// overrides exactly the operations its backend can express and the
/// coordinator treats the rest as no-ops.
#[async_trait]
pub trait StorageStrategy: Send + Sync {
  /// Look up the record stored for `context.tag`.
  ///
  /// Fails soft: missing or unparsable stored data is `Ok(None)`, never an
  /// error. Infrastructure failures (I/O, poisoned locks) may still surface
  /// as `Err`.
  async fn query_one(&self, _context: &HabitContext) -> Result<Option<HabitRecord>> {
    Ok(None)
  }

  /// Overwrite the stored value for `context.tag` unconditionally.
  ///
  /// `last` is the coordinator's previously cached record, for backends
  /// that diff or version their writes.
  async fn update(
    &self,
    _context: &HabitContext,
    _payload: &PayloadMap,
    _last: Option<&HabitRecord>,
  ) -> Result<WriteAck> {
    Ok(WriteAck::unsupported())
  }

  /// Establish a stored value for a tag the backend has not seen.
  async fn create(&self, _context: &HabitContext, _payload: &PayloadMap) -> Result<WriteAck> {
    Ok(WriteAck::unsupported())
  }

  /// Return every record visible to `identity`. Ordering is not guaranteed
  /// and duplicates are allowed; the coordinator deduplicates on merge.
  async fn query_all(&self, _identity: &Value) -> Result<Vec<HabitRecord>> {
    Ok(Vec::new())
  }
}

/// Row key prefix used by [`LocalStorageStrategy`] unless overridden.
pub const DEFAULT_KEY_PREFIX: &str = "user-habit:";

/// Schema for the local habit store.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS habit_store (
    store_key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Reference backend: a local SQLite key-value store, one row per tag.
///
/// Rows are keyed as `<key_prefix><tag>` with the payload serialized to JSON
/// text. `query_all` is not implemented: rows are keyed per tag and the
/// store carries no identity index to enumerate against, so bulk loads come
/// back empty.
pub struct LocalStorageStrategy {
  conn: Mutex<Connection>,
  key_prefix: String,
}

impl LocalStorageStrategy {
  /// Open (or create) the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create habit store directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  /// Open (or create) the store at the given path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open habit store at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// An in-process store that is discarded on drop.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory habit store: {}", e))?;

    Self::from_connection(conn)
  }

  /// Override the row key prefix (default [`DEFAULT_KEY_PREFIX`]).
  pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.key_prefix = prefix.into();
    self
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run habit store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      key_prefix: DEFAULT_KEY_PREFIX.to_string(),
    })
  }

  /// Get the default store path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("user-habit").join("habits.db"))
  }

  fn store_key(&self, tag: &str) -> String {
    format!("{}{}", self.key_prefix, tag)
  }
}

#[async_trait]
impl StorageStrategy for LocalStorageStrategy {
  async fn query_one(&self, context: &HabitContext) -> Result<Option<HabitRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let raw: Option<String> = conn
      .query_row(
        "SELECT data FROM habit_store WHERE store_key = ?",
        params![self.store_key(&context.tag)],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query habit store: {}", e))?;

    let raw = match raw {
      Some(raw) => raw,
      None => return Ok(None),
    };

    match serde_json::from_str::<PayloadMap>(&raw) {
      Ok(data) => Ok(Some(HabitRecord {
        key: context.tag.clone(),
        data,
      })),
      Err(e) => {
        warn!(tag = %context.tag, "Dropping unparsable stored habit data: {}", e);
        Ok(None)
      }
    }
  }

  async fn update(
    &self,
    context: &HabitContext,
    payload: &PayloadMap,
    _last: Option<&HabitRecord>,
  ) -> Result<WriteAck> {
    let raw = serde_json::to_string(payload)
      .map_err(|e| eyre!("Failed to serialize habit payload: {}", e))?;

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO habit_store (store_key, data, saved_at)
         VALUES (?, ?, datetime('now'))",
        params![self.store_key(&context.tag), raw],
      )
      .map_err(|e| eyre!("Failed to write habit store: {}", e))?;

    Ok(WriteAck::ok())
  }

  async fn create(&self, context: &HabitContext, payload: &PayloadMap) -> Result<WriteAck> {
    // The row key is the primary key, so create is the same upsert.
    self.update(context, payload, None).await
  }
}

/// In-process backend that keeps records in a plain map.
///
/// Supports every capability, including enumeration, which makes it the
/// strategy of choice for tests and for callers that want the coordinator
/// semantics without persistence.
#[derive(Default)]
pub struct MemoryStrategy {
  records: Mutex<BTreeMap<String, PayloadMap>>,
}

impl MemoryStrategy {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl StorageStrategy for MemoryStrategy {
  async fn query_one(&self, context: &HabitContext) -> Result<Option<HabitRecord>> {
    let records = self
      .records
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(records.get(&context.tag).map(|data| HabitRecord {
      key: context.tag.clone(),
      data: data.clone(),
    }))
  }

  async fn update(
    &self,
    context: &HabitContext,
    payload: &PayloadMap,
    _last: Option<&HabitRecord>,
  ) -> Result<WriteAck> {
    let mut records = self
      .records
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    records.insert(context.tag.clone(), payload.clone());
    Ok(WriteAck::ok())
  }

  async fn create(&self, context: &HabitContext, payload: &PayloadMap) -> Result<WriteAck> {
    self.update(context, payload, None).await
  }

  async fn query_all(&self, _identity: &Value) -> Result<Vec<HabitRecord>> {
    let records = self
      .records
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      records
        .iter()
        .map(|(key, data)| HabitRecord {
          key: key.clone(),
          data: data.clone(),
        })
        .collect(),
    )
  }
}
