//! Stale-while-revalidate access to anime data.
//!
//! Every query first emits what the cache holds, then decides through the
//! freshness policy whether to refresh from the remote source in the
//! background. A successful refresh writes to the store, which re-triggers
//! the store subscription and produces the next emission. Remote failures
//! stop at this boundary: they are logged and the cached emission stands.
//! Storage failures are never swallowed; they end the stream as an error.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Report, Result};
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::api_types::ApiAnime;
use super::client::{AnimeSource, SourceError};
use super::types::{AnimeDetail, AnimeSummary, CacheRecord};
use crate::cache::{observe_all, observe_by_id, AnimeStore, EmptyCachePolicy, FreshnessPolicy};

/// Default number of anime requested from the ranking
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Buffered emissions per subscription before the driver waits on the reader
const SUBSCRIPTION_BUFFER: usize = 16;

/// Live query results.
///
/// Backed by a task that owns the store subscription. Dropping the
/// subscription aborts that task. A refresh it was awaiting keeps running
/// for any other query awaiting the same key, and is cancelled otherwise.
/// Writes already committed stay in the store.
pub struct Subscription<T> {
  rx: mpsc::Receiver<Result<T>>,
  task: JoinHandle<()>,
}

impl<T: Send + 'static> Subscription<T> {
  fn spawn<F, Fut>(driver: F) -> Self
  where
    F: FnOnce(mpsc::Sender<Result<T>>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let task = tokio::spawn(driver(tx));
    Self { rx, task }
  }
}

impl<T> Stream for Subscription<T> {
  type Item = Result<T>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.get_mut().rx.poll_recv(cx)
  }
}

impl<T> Drop for Subscription<T> {
  fn drop(&mut self) {
    self.task.abort();
  }
}

/// What a background refresh is fetching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RefreshKey {
  TopList,
  Detail(i64),
}

/// Outcome of a refresh, cloned out to every query awaiting it
type RefreshOutput = std::result::Result<usize, Arc<Report>>;
type RefreshFuture = BoxFuture<'static, RefreshOutput>;

#[derive(Default)]
struct RefreshTable {
  generation: u64,
  running: HashMap<RefreshKey, (u64, WeakShared<RefreshFuture>)>,
}

/// Refreshes currently in flight, one per key.
///
/// Queries awaiting the same key share one future. The table only holds a
/// weak handle, so the fetch keeps running while any query still awaits it
/// and is dropped with the last one.
#[derive(Clone, Default)]
struct Refreshes {
  table: Arc<Mutex<RefreshTable>>,
}

impl Refreshes {
  fn lock(&self) -> MutexGuard<'_, RefreshTable> {
    self
      .table
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Join the refresh running for `key`, or start one from `start`.
  fn join_or_start<F>(&self, key: RefreshKey, start: F) -> Shared<RefreshFuture>
  where
    F: FnOnce() -> BoxFuture<'static, Result<usize>>,
  {
    let mut table = self.lock();
    if let Some(running) = table.running.get(&key).and_then(|(_, weak)| weak.upgrade()) {
      debug!(?key, "Joining refresh already in flight");
      return running;
    }
    self.insert(&mut table, key, start())
  }

  /// Start `refresh` for `key`, taking over from any refresh already running.
  fn start(&self, key: RefreshKey, refresh: BoxFuture<'static, Result<usize>>) -> Shared<RefreshFuture> {
    let mut table = self.lock();
    self.insert(&mut table, key, refresh)
  }

  fn insert(
    &self,
    table: &mut RefreshTable,
    key: RefreshKey,
    refresh: BoxFuture<'static, Result<usize>>,
  ) -> Shared<RefreshFuture> {
    table.generation += 1;
    let generation = table.generation;

    let refreshes = self.clone();
    let shared = async move {
      let result = refresh.await.map_err(Arc::new);
      refreshes.finish(key, generation);
      result
    }
    .boxed()
    .shared();

    if let Some(weak) = shared.downgrade() {
      table.running.insert(key, (generation, weak));
    }
    shared
  }

  fn finish(&self, key: RefreshKey, generation: u64) {
    let mut table = self.lock();
    if table.running.get(&key).is_some_and(|(g, _)| *g == generation) {
      table.running.remove(&key);
    }
  }
}

/// Anime repository reconciling the local cache with the remote source.
pub struct AnimeRepository<S> {
  store: Arc<S>,
  source: Arc<dyn AnimeSource>,
  policy: Arc<dyn FreshnessPolicy>,
  page_size: u32,
  refreshes: Refreshes,
}

impl<S: AnimeStore + 'static> AnimeRepository<S> {
  pub fn new(store: Arc<S>, source: Arc<dyn AnimeSource>) -> Self {
    Self {
      store,
      source,
      policy: Arc::new(EmptyCachePolicy),
      page_size: DEFAULT_PAGE_SIZE,
      refreshes: Refreshes::default(),
    }
  }

  /// Replace the freshness policy.
  #[allow(dead_code)]
  pub fn with_policy(mut self, policy: impl FreshnessPolicy + 'static) -> Self {
    self.policy = Arc::new(policy);
    self
  }

  /// Set how many anime one list fetch requests.
  pub fn with_page_size(mut self, page_size: u32) -> Self {
    self.page_size = page_size;
    self
  }

  /// Top anime, best score first.
  ///
  /// Emits the cached list immediately and again after every change to the
  /// cache. An empty cache triggers one background fetch of the ranking.
  pub fn get_top_anime(&self) -> Subscription<Vec<AnimeSummary>> {
    let repo = self.clone();

    Subscription::spawn(move |tx| async move {
      let mut snapshots = observe_all(Arc::clone(&repo.store));

      while let Some(snapshot) = snapshots.next().await {
        let records = match snapshot {
          Ok(records) => records,
          Err(e) => {
            error!(error = %e, "Failed to read cached anime list");
            let _ = tx.send(Err(e)).await;
            return;
          }
        };

        let summaries: Vec<AnimeSummary> = records.iter().map(CacheRecord::to_summary).collect();
        if tx.send(Ok(summaries)).await.is_err() {
          return;
        }

        if repo.policy.should_refresh_list(records.is_empty()) {
          let refresh = repo.refresh_in_background(RefreshKey::TopList, || repo.top_list_refresh());
          if let Err(e) = refresh.await {
            error!(error = %e, "Storage failure in anime list query");
            let _ = tx.send(Err(e)).await;
            return;
          }
        }
      }
    })
  }

  /// Details for one anime.
  ///
  /// Only emits once the cache holds a detailed record for `id`; until a
  /// detail fetch succeeds the stream stays silent. Callers that need a
  /// definite "not found" must apply their own timeout.
  pub fn get_anime_detail(&self, id: i64) -> Subscription<AnimeDetail> {
    let repo = self.clone();

    Subscription::spawn(move |tx| async move {
      let mut snapshots = observe_by_id(Arc::clone(&repo.store), id);

      while let Some(snapshot) = snapshots.next().await {
        let step = match snapshot {
          Ok(record) => repo.detail_step(id, record, &tx).await,
          Err(e) => Err(e),
        };

        match step {
          Ok(true) => {}
          Ok(false) => return,
          Err(e) => {
            error!(id, error = %e, "Storage failure in anime detail query");
            let _ = tx.send(Err(e)).await;
            return;
          }
        }
      }
    })
  }

  /// Handle one store emission for a detail query.
  ///
  /// Returns `Ok(false)` once the subscriber has gone away.
  async fn detail_step(
    &self,
    id: i64,
    record: Option<CacheRecord>,
    tx: &mpsc::Sender<Result<AnimeDetail>>,
  ) -> Result<bool> {
    if let Some(detail) = record.as_ref().and_then(CacheRecord::to_detail) {
      if tx.send(Ok(detail)).await.is_err() {
        return Ok(false);
      }
    }

    let detail_fetched = self.store.is_detail_fetched(id)?;
    if self.policy.should_refresh_detail(detail_fetched) {
      self
        .refresh_in_background(RefreshKey::Detail(id), || self.detail_refresh(id))
        .await?;
    }

    Ok(true)
  }

  /// Clear the cache and fetch the ranking again.
  ///
  /// Unlike the live queries this surfaces fetch failures. The cache stays
  /// cleared when the fetch fails.
  pub async fn refresh_anime_list(&self) -> Result<usize> {
    info!("Force refreshing anime list");

    // Registered before the clear so woken list queries join this refresh
    let repo = self.clone();
    let refresh = self.refreshes.start(
      RefreshKey::TopList,
      async move {
        repo.store.clear_all()?;
        repo.fetch_and_cache_top_anime().await
      }
      .boxed(),
    );

    refresh.await.map_err(|e| {
      error!(error = %e, "Error refreshing anime list");
      eyre!("{:#}", e)
    })
  }

  /// Delete cached anime not updated within `max_age`.
  pub fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
    let cutoff = Utc::now() - max_age;
    let removed = self.store.prune_older_than(cutoff)?;
    info!(removed, %cutoff, "Pruned anime cache");
    Ok(removed)
  }

  pub fn clear_cache(&self) -> Result<()> {
    self.store.clear_all()
  }

  pub fn cached_count(&self) -> Result<usize> {
    self.store.count_all()
  }

  /// Await the refresh for `key`, starting it from `start` if none is running.
  ///
  /// Remote failures are logged and dropped. Anything else is a storage
  /// failure and is returned.
  async fn refresh_in_background<F>(&self, key: RefreshKey, start: F) -> Result<()>
  where
    F: FnOnce() -> BoxFuture<'static, Result<usize>>,
  {
    match self.refreshes.join_or_start(key, start).await {
      Ok(count) => {
        debug!(?key, count, "Background refresh complete");
        Ok(())
      }
      Err(e) if e.downcast_ref::<SourceError>().is_some() => {
        warn!(?key, error = %e, "Background refresh failed, keeping cached data");
        Ok(())
      }
      Err(e) => Err(eyre!("{:#}", e)),
    }
  }

  fn top_list_refresh(&self) -> BoxFuture<'static, Result<usize>> {
    let repo = self.clone();
    async move { repo.fetch_and_cache_top_anime().await }.boxed()
  }

  fn detail_refresh(&self, id: i64) -> BoxFuture<'static, Result<usize>> {
    let repo = self.clone();
    async move { repo.fetch_and_cache_detail(id).await }.boxed()
  }

  async fn fetch_and_cache_top_anime(&self) -> Result<usize> {
    debug!(page_size = self.page_size, "Fetching top anime");
    let page = self.source.fetch_top_list(1, self.page_size).await?;
    debug!(has_next_page = page.pagination.has_next_page, "Fetched first page of ranking");

    let records: Vec<CacheRecord> = page.data.into_iter().map(ApiAnime::into_record).collect();
    self.store.upsert_many(&records)?;

    info!(count = records.len(), "Cached top anime");
    Ok(records.len())
  }

  async fn fetch_and_cache_detail(&self, id: i64) -> Result<usize> {
    debug!(id, "Fetching anime detail");
    let record = self.source.fetch_detail(id).await?.into_record();
    self.store.upsert_one(&record)?;

    info!(id, title = %record.title, "Cached anime detail");
    Ok(1)
  }
}

impl<S> Clone for AnimeRepository<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      source: Arc::clone(&self.source),
      policy: Arc::clone(&self.policy),
      page_size: self.page_size,
      refreshes: self.refreshes.clone(),
    }
  }
}
