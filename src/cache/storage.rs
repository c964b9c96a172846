//! SQLite implementation of the anime store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

use super::traits::AnimeStore;
use crate::anime::types::CacheRecord;

/// SQLite-based anime store.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  changes: watch::Sender<u64>,
}

impl SqliteStorage {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let (changes, _) = watch::channel(0);
    let storage = Self {
      conn: Mutex::new(conn),
      changes,
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Wake every observer of the table.
  fn notify(&self) {
    self.changes.send_modify(|version| *version += 1);
  }

  fn row_to_record(row: &Row) -> rusqlite::Result<CacheRecord> {
    Ok(CacheRecord {
      id: row.get("id")?,
      title: row.get("title")?,
      image_url: row.get("image_url")?,
      episodes: row.get("episodes")?,
      score: row.get("score")?,
      synopsis: row.get("synopsis")?,
      genres: row.get("genres")?,
      status: row.get("status")?,
      trailer_url: row.get("trailer_url")?,
      last_updated: row.get("last_updated")?,
      detail_fetched: row.get("detail_fetched")?,
    })
  }
}

/// Schema for the anime cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS anime (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    image_url TEXT NOT NULL,
    episodes INTEGER,
    score REAL,
    synopsis TEXT,
    genres TEXT,
    status TEXT,
    trailer_url TEXT,
    last_updated INTEGER NOT NULL,
    detail_fetched INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_anime_score ON anime(score DESC);
CREATE INDEX IF NOT EXISTS idx_anime_last_updated ON anime(last_updated);
"#;

const SELECT_COLUMNS: &str = "SELECT id, title, image_url, episodes, score, synopsis, genres, \
   status, trailer_url, last_updated, detail_fetched FROM anime";

// Detail columns are only taken from the incoming row when it is itself a
// detail row, so a list refresh cannot erase fetched details.
const UPSERT: &str = r#"
INSERT INTO anime (id, title, image_url, episodes, score, synopsis, genres,
                   status, trailer_url, last_updated, detail_fetched)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT(id) DO UPDATE SET
    title = excluded.title,
    image_url = excluded.image_url,
    episodes = excluded.episodes,
    score = excluded.score,
    synopsis = CASE WHEN excluded.detail_fetched THEN excluded.synopsis ELSE anime.synopsis END,
    genres = CASE WHEN excluded.detail_fetched THEN excluded.genres ELSE anime.genres END,
    status = CASE WHEN excluded.detail_fetched THEN excluded.status ELSE anime.status END,
    trailer_url = CASE WHEN excluded.detail_fetched THEN excluded.trailer_url ELSE anime.trailer_url END,
    last_updated = excluded.last_updated,
    detail_fetched = MAX(anime.detail_fetched, excluded.detail_fetched)
"#;

impl AnimeStore for SqliteStorage {
  fn get_all(&self) -> Result<Vec<CacheRecord>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(&format!(
        "{} ORDER BY score IS NULL, score DESC, id ASC",
        SELECT_COLUMNS
      ))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let records = stmt
      .query_map([], Self::row_to_record)
      .map_err(|e| eyre!("Failed to query anime: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read anime row: {}", e))?;

    Ok(records)
  }

  fn get_by_id(&self, id: i64) -> Result<Option<CacheRecord>> {
    let conn = self.lock()?;

    conn
      .query_row(
        &format!("{} WHERE id = ?", SELECT_COLUMNS),
        params![id],
        Self::row_to_record,
      )
      .optional()
      .map_err(|e| eyre!("Failed to read anime {}: {}", id, e))
  }

  fn upsert_many(&self, records: &[CacheRecord]) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }

    {
      let mut conn = self.lock()?;
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      {
        let mut stmt = tx
          .prepare(UPSERT)
          .map_err(|e| eyre!("Failed to prepare upsert: {}", e))?;

        for record in records {
          stmt
            .execute(params![
              record.id,
              record.title,
              record.image_url,
              record.episodes,
              record.score,
              record.synopsis,
              record.genres,
              record.status,
              record.trailer_url,
              record.last_updated,
              record.detail_fetched,
            ])
            .map_err(|e| eyre!("Failed to store anime {}: {}", record.id, e))?;
        }
      }

      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    }

    debug!(count = records.len(), "Upserted anime records");
    self.notify();
    Ok(())
  }

  fn clear_all(&self) -> Result<()> {
    let removed = self
      .lock()?
      .execute("DELETE FROM anime", [])
      .map_err(|e| eyre!("Failed to clear anime cache: {}", e))?;

    debug!(removed, "Cleared anime cache");
    self.notify();
    Ok(())
  }

  fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
    let removed = self
      .lock()?
      .execute(
        "DELETE FROM anime WHERE last_updated < ?",
        params![cutoff.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to prune anime cache: {}", e))?;

    if removed > 0 {
      debug!(removed, %cutoff, "Pruned stale anime records");
      self.notify();
    }
    Ok(removed)
  }

  fn count_all(&self) -> Result<usize> {
    let count: i64 = self
      .lock()?
      .query_row("SELECT COUNT(*) FROM anime", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count anime: {}", e))?;

    Ok(count as usize)
  }

  fn is_detail_fetched(&self, id: i64) -> Result<Option<bool>> {
    self
      .lock()?
      .query_row(
        "SELECT detail_fetched FROM anime WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read detail flag for anime {}: {}", id, e))
  }

  fn subscribe(&self) -> watch::Receiver<u64> {
    self.changes.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn record(id: i64, score: Option<f64>) -> CacheRecord {
    CacheRecord {
      id,
      title: format!("Anime {}", id),
      image_url: format!("https://cdn.example/{}.jpg", id),
      episodes: Some(12),
      score,
      synopsis: None,
      genres: None,
      status: None,
      trailer_url: None,
      last_updated: Utc::now().timestamp_millis(),
      detail_fetched: false,
    }
  }

  fn detailed(id: i64) -> CacheRecord {
    CacheRecord {
      synopsis: Some("Synopsis".to_string()),
      genres: Some(r#"["Action"]"#.to_string()),
      status: Some("Airing".to_string()),
      trailer_url: Some("https://www.youtube.com/embed/x".to_string()),
      detail_fetched: true,
      ..record(id, Some(7.0))
    }
  }

  #[test]
  fn test_get_all_orders_by_score_with_unknown_last() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .upsert_many(&[record(1, None), record(2, Some(7.5)), record(3, Some(9.1))])
      .unwrap();

    let ids: Vec<i64> = storage.get_all().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![3, 2, 1]);
    assert_eq!(storage.count_all().unwrap(), 3);
  }

  #[test]
  fn test_upsert_replaces_by_id() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.upsert_one(&record(1, Some(5.0))).unwrap();

    let updated = CacheRecord {
      title: "Renamed".to_string(),
      score: Some(6.0),
      ..record(1, None)
    };
    storage.upsert_one(&updated).unwrap();

    assert_eq!(storage.count_all().unwrap(), 1);
    assert_eq!(storage.get_by_id(1).unwrap(), Some(updated));
    assert_eq!(storage.get_by_id(2).unwrap(), None);
  }

  #[test]
  fn test_detail_flag_never_reverts() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert_eq!(storage.is_detail_fetched(1).unwrap(), None);

    storage.upsert_one(&record(1, Some(7.0))).unwrap();
    assert_eq!(storage.is_detail_fetched(1).unwrap(), Some(false));

    storage.upsert_one(&detailed(1)).unwrap();
    assert_eq!(storage.is_detail_fetched(1).unwrap(), Some(true));

    // A later list fetch updates list columns but keeps the details
    let relisted = CacheRecord {
      score: Some(8.0),
      ..record(1, None)
    };
    storage.upsert_many(&[relisted]).unwrap();

    let stored = storage.get_by_id(1).unwrap().unwrap();
    assert!(stored.detail_fetched);
    assert_eq!(stored.score, Some(8.0));
    assert_eq!(stored.synopsis.as_deref(), Some("Synopsis"));
    assert_eq!(stored.to_detail().unwrap().genres, vec!["Action"]);
  }

  #[test]
  fn test_prune_older_than() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let old = CacheRecord {
      last_updated: (Utc::now() - Duration::days(30)).timestamp_millis(),
      ..record(1, Some(5.0))
    };
    storage.upsert_many(&[old, record(2, Some(6.0))]).unwrap();

    let removed = storage
      .prune_older_than(Utc::now() - Duration::days(7))
      .unwrap();

    assert_eq!(removed, 1);
    assert_eq!(storage.get_by_id(1).unwrap(), None);
    assert!(storage.get_by_id(2).unwrap().is_some());
  }

  #[test]
  fn test_writes_bump_change_counter() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mut rx = storage.subscribe();

    storage.upsert_many(&[]).unwrap();
    assert!(!rx.has_changed().unwrap());

    storage.upsert_one(&record(1, None)).unwrap();
    assert!(rx.has_changed().unwrap());
    rx.borrow_and_update();

    // Pruning nothing is not a change
    storage
      .prune_older_than(Utc::now() - Duration::days(1))
      .unwrap();
    assert!(!rx.has_changed().unwrap());

    storage.clear_all().unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(storage.count_all().unwrap(), 0);
  }

  #[test]
  fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    let stored = detailed(42);
    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.upsert_one(&stored).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    assert_eq!(storage.get_by_id(42).unwrap(), Some(stored));
  }
}
