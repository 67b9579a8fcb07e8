//! Write-behind preference cache with pluggable storage strategies.
//!
//! This crate persists small per-component "habit" records (arbitrary
//! key/value preference data, e.g. column widths or collapsed panels)
//! through a swappable storage backend while keeping callers off the
//! backend's latency path:
//! - Reads are served from an in-memory cache, with read-through on miss
//! - Writes whose payload equals the cached value are suppressed entirely
//! - Other writes hit the cache first and the backend second (write-behind)
//! - Bulk loads are deduplicated (last occurrence wins) and merged into the
//!   cache without disturbing unrelated entries
//! - A debouncer collapses bursty saves so only the latest payload is
//!   written once things settle

mod cache;
mod debounce;
mod strategy;
mod types;

pub use cache::{HabitCache, SetOutcome};
pub use debounce::SaveDebouncer;
pub use strategy::{LocalStorageStrategy, MemoryStrategy, StorageStrategy};
pub use types::{compose_tag, HabitContext, HabitRecord, PayloadMap, WriteAck};
