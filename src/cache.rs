//! The habit cache: a read-through, write-behind coordinator over a
//! storage strategy.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::strategy::StorageStrategy;
use crate::types::{HabitContext, HabitRecord, PayloadMap, WriteAck};

/// What a call to [`HabitCache::set`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
  /// Payload equals the cached value; no I/O was performed.
  Unchanged,
  /// An existing record was overwritten, cache first, backend second.
  Updated(WriteAck),
  /// The backend was asked to establish a record for an unseen tag.
  Created(WriteAck),
}

/// Field name selecting the record key itself when indexing bulk loads.
const DEFAULT_CACHE_KEY: &str = "key";

/// Coordinates an in-memory tag-to-record map with a storage strategy.
///
/// Reads are served from cache and fall back to the backend exactly once
/// per miss; writes land in the cache synchronously and reach the backend
/// afterwards. Clones share both the strategy and the cache map.
pub struct HabitCache<S: StorageStrategy> {
  strategy: Arc<S>,
  cache: Arc<Mutex<HashMap<String, HabitRecord>>>,
  cache_key: String,
}

impl<S: StorageStrategy> HabitCache<S> {
  /// Create a cache backed by the given storage strategy.
  pub fn new(strategy: S) -> Self {
    Self {
      strategy: Arc::new(strategy),
      cache: Arc::new(Mutex::new(HashMap::new())),
      cache_key: DEFAULT_CACHE_KEY.to_string(),
    }
  }

  /// Index bulk-loaded records by this payload field instead of the record
  /// key (default `"key"`).
  pub fn with_cache_key(mut self, field: impl Into<String>) -> Self {
    self.cache_key = field.into();
    self
  }

  /// The storage strategy behind this cache.
  pub fn strategy(&self) -> &S {
    &self.strategy
  }

  /// Get the preference data for `context.tag`.
  ///
  /// Served from cache when present; otherwise read through the strategy.
  /// A backend miss comes back as an empty map and is NOT cached, so the
  /// next call reads through again. The returned map is a copy; mutating it
  /// does not touch the cache.
  pub async fn get(&self, context: &HabitContext) -> Result<PayloadMap> {
    {
      let cache = self
        .cache
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;

      if let Some(record) = cache.get(&context.tag) {
        return Ok(record.data.clone());
      }
    }

    match self.strategy.query_one(context).await? {
      Some(record) => {
        let data = record.data.clone();
        let mut cache = self
          .cache
          .lock()
          .map_err(|e| eyre!("Lock poisoned: {}", e))?;
        cache.insert(context.tag.clone(), record);
        Ok(data)
      }
      None => Ok(PayloadMap::new()),
    }
  }

  /// Store the preference data for `context.tag`.
  ///
  /// A payload deeply equal to the cached value is suppressed without any
  /// I/O. Otherwise the cache is updated first and the backend write runs
  /// after it; a failed write propagates to the caller but the cached value
  /// is not rolled back. A tag with no cache entry goes through `create`
  /// and does not warm the cache; the first `get` after it still reads
  /// through.
  pub async fn set(&self, context: &HabitContext, payload: PayloadMap) -> Result<SetOutcome> {
    let last = {
      let mut cache = self
        .cache
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;

      match cache.get_mut(&context.tag) {
        Some(record) if record.data == payload => return Ok(SetOutcome::Unchanged),
        Some(record) => {
          let last = record.clone();
          record.data = payload.clone();
          Some(last)
        }
        None => None,
      }
    };

    match last {
      Some(last) => {
        let ack = self.strategy.update(context, &payload, Some(&last)).await?;
        Ok(SetOutcome::Updated(ack))
      }
      None => {
        let ack = self.strategy.create(context, &payload).await?;
        Ok(SetOutcome::Created(ack))
      }
    }
  }

  /// Load every record visible to `identity` and merge it into the cache.
  ///
  /// Records are indexed by the configured cache key field; when duplicates
  /// occur the last occurrence in the returned sequence wins. Cache entries
  /// whose tags are absent from the load are left untouched.
  pub async fn query_all_user_habits(&self, identity: &Value) -> Result<()> {
    let list = self.strategy.query_all(identity).await?;
    if list.is_empty() {
      return Ok(());
    }

    let mut incoming: HashMap<String, HabitRecord> = HashMap::new();
    for record in list {
      match self.index_key(&record) {
        Some(key) => {
          incoming.insert(key, record);
        }
        None => {
          warn!(
            record_key = %record.key,
            field = %self.cache_key,
            "Skipping bulk-loaded record without an index field"
          );
        }
      }
    }

    let mut cache = self
      .cache
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    cache.extend(incoming);
    Ok(())
  }

  /// Drop the cache entry for one tag. The backend is not touched; the next
  /// `get` for the tag reads through.
  pub fn clear_tag_cache(&self, tag: &str) -> Result<()> {
    let mut cache = self
      .cache
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    cache.remove(tag);
    Ok(())
  }

  /// Reset the cache to empty. The backend is not touched.
  pub fn clear_all(&self) -> Result<()> {
    let mut cache = self
      .cache
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    cache.clear();
    Ok(())
  }

  fn index_key(&self, record: &HabitRecord) -> Option<String> {
    if self.cache_key == DEFAULT_CACHE_KEY {
      return Some(record.key.clone());
    }

    record
      .data
      .get(&self.cache_key)
      .and_then(Value::as_str)
      .map(String::from)
  }
}

impl<S: StorageStrategy> Clone for HabitCache<S> {
  fn clone(&self) -> Self {
    Self {
      strategy: Arc::clone(&self.strategy),
      cache: Arc::clone(&self.cache),
      cache_key: self.cache_key.clone(),
    }
  }
}
