//! Debounced persistence of habit payloads.
//!
//! UI surfaces tend to report every preference change (each column resize,
//! each toggle). The debouncer absorbs those bursts: a trigger records the
//! latest payload for its tag and arms a flush timer; re-triggering within
//! the delay window cancels and re-arms the timer, and the payload observed
//! last is the one written when it finally fires.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::cache::{HabitCache, SetOutcome};
use crate::strategy::StorageStrategy;
use crate::types::{HabitContext, PayloadMap};

/// Latest state captured for a tag plus the timer that will flush it.
struct PendingSave {
  latest: Arc<Mutex<(HabitContext, PayloadMap)>>,
  timer: JoinHandle<()>,
}

/// Collapses bursts of saves for a tag into one delayed [`HabitCache::set`].
///
/// Clones share the pending-flush table, so one debouncer can serve many
/// components.
pub struct SaveDebouncer<S: StorageStrategy + 'static> {
  cache: HabitCache<S>,
  delay: Duration,
  pending: Arc<Mutex<HashMap<String, PendingSave>>>,
}

impl<S: StorageStrategy + 'static> SaveDebouncer<S> {
  pub fn new(cache: HabitCache<S>, delay: Duration) -> Self {
    Self {
      cache,
      delay,
      pending: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Record `payload` as the latest state for `context.tag` and (re)arm its
  /// flush timer at `now + delay`. A pending flush for the tag is cancelled,
  /// never duplicated.
  pub fn trigger(&self, context: HabitContext, payload: PayloadMap) -> Result<()> {
    let tag = context.tag.clone();
    let mut pending = self
      .pending
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    match pending.get_mut(&tag) {
      Some(save) => {
        *save
          .latest
          .lock()
          .map_err(|e| eyre!("Lock poisoned: {}", e))? = (context, payload);
        save.timer.abort();
        save.timer = self.arm_timer(tag, Arc::clone(&save.latest));
      }
      None => {
        let latest = Arc::new(Mutex::new((context, payload)));
        let timer = self.arm_timer(tag.clone(), Arc::clone(&latest));
        pending.insert(tag, PendingSave { latest, timer });
      }
    }

    Ok(())
  }

  /// Write the pending payload for `tag` immediately, cancelling its timer.
  ///
  /// Components flush on teardown so nothing is lost to an unfired timer.
  /// Returns `Ok(SetOutcome::Unchanged)` when nothing is pending.
  pub async fn flush(&self, tag: &str) -> Result<SetOutcome> {
    let save = {
      let mut pending = self
        .pending
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      pending.remove(tag)
    };

    let save = match save {
      Some(save) => save,
      None => return Ok(SetOutcome::Unchanged),
    };
    save.timer.abort();

    let (context, payload) = {
      let state = save
        .latest
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      state.clone()
    };

    self.cache.set(&context, payload).await
  }

  /// Drop the pending payload for `tag` without writing it.
  pub fn cancel(&self, tag: &str) -> Result<()> {
    let mut pending = self
      .pending
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(save) = pending.remove(tag) {
      save.timer.abort();
    }
    Ok(())
  }

  fn arm_timer(
    &self,
    tag: String,
    latest: Arc<Mutex<(HabitContext, PayloadMap)>>,
  ) -> JoinHandle<()> {
    let cache = self.cache.clone();
    let pending = Arc::clone(&self.pending);
    let delay = self.delay;

    tokio::spawn(async move {
      tokio::time::sleep(delay).await;

      // Drop the pending entry before writing, so a trigger arriving during
      // the write schedules a fresh flush instead of re-arming this one.
      {
        let mut pending = match pending.lock() {
          Ok(guard) => guard,
          Err(_) => return,
        };
        pending.remove(&tag);
      }

      let (context, payload) = {
        let state = match latest.lock() {
          Ok(guard) => guard,
          Err(_) => return,
        };
        state.clone()
      };

      if let Err(e) = cache.set(&context, payload).await {
        warn!(tag = %context.tag, "Debounced habit save failed: {}", e);
      }
    })
  }
}

impl<S: StorageStrategy + 'static> Clone for SaveDebouncer<S> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      delay: self.delay,
      pending: Arc::clone(&self.pending),
    }
  }
}
