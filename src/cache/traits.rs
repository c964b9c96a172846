//! Core traits for the anime cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use tokio::sync::watch;

use crate::anime::types::CacheRecord;

/// Persistent table of cached anime records keyed by id.
///
/// Every mutating call either applies fully or not at all, and bumps the
/// change counter exposed by [`AnimeStore::subscribe`] when it altered rows.
/// Storage failures are returned to the caller, never hidden.
pub trait AnimeStore: Send + Sync {
  /// All records, highest score first, unknown scores last.
  fn get_all(&self) -> Result<Vec<CacheRecord>>;

  /// A single record by id.
  fn get_by_id(&self, id: i64) -> Result<Option<CacheRecord>>;

  /// Upsert records by id in one transaction.
  ///
  /// A list-level record written over a detailed one keeps the detail
  /// columns: `detail_fetched` never goes from true back to false.
  fn upsert_many(&self, records: &[CacheRecord]) -> Result<()>;

  /// Upsert a single record by id.
  fn upsert_one(&self, record: &CacheRecord) -> Result<()> {
    self.upsert_many(std::slice::from_ref(record))
  }

  /// Delete every record.
  fn clear_all(&self) -> Result<()>;

  /// Delete records last updated before `cutoff`. Returns how many were removed.
  fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;

  fn count_all(&self) -> Result<usize>;

  /// `None` when no record exists for `id`.
  fn is_detail_fetched(&self, id: i64) -> Result<Option<bool>>;

  /// Receiver that observes a change counter bumped after each committed write.
  fn subscribe(&self) -> watch::Receiver<u64>;
}

/// Decides when cached data warrants a background refresh.
///
/// Implementations must be pure: no I/O, no state beyond their arguments.
pub trait FreshnessPolicy: Send + Sync {
  fn should_refresh_list(&self, cache_is_empty: bool) -> bool;

  /// `detail_fetched` is `None` when the id is not cached at all.
  fn should_refresh_detail(&self, detail_fetched: Option<bool>) -> bool;
}
