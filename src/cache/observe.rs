//! Live views over the anime store.
//!
//! Each stream yields the current state immediately, then again after
//! committed writes to the table (for a single id, only writes that change it). Writes that land while a consumer is busy
//! are coalesced into a single re-read. A storage failure is yielded once
//! and ends the stream.

use color_eyre::Result;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;

use super::traits::AnimeStore;
use crate::anime::types::CacheRecord;

/// Observe all records, ordered as [`AnimeStore::get_all`] orders them.
pub fn observe_all<S>(store: Arc<S>) -> BoxStream<'static, Result<Vec<CacheRecord>>>
where
  S: AnimeStore + ?Sized + 'static,
{
  observe(store, |store| store.get_all())
}

/// Observe a single record by id. Yields `None` while the id is not cached.
///
/// Writes that leave this record unchanged do not produce an emission.
pub fn observe_by_id<S>(store: Arc<S>, id: i64) -> BoxStream<'static, Result<Option<CacheRecord>>>
where
  S: AnimeStore + ?Sized + 'static,
{
  let mut last: Option<Option<CacheRecord>> = None;

  observe(store, move |store| store.get_by_id(id))
    .filter(move |snapshot| {
      let changed = match snapshot {
        Ok(record) if last.as_ref() == Some(record) => false,
        Ok(record) => {
          last = Some(record.clone());
          true
        }
        Err(_) => true,
      };
      future::ready(changed)
    })
    .boxed()
}

struct Observer<S: ?Sized, F> {
  store: Arc<S>,
  changes: watch::Receiver<u64>,
  read: F,
  started: bool,
  failed: bool,
}

fn observe<S, T, F>(store: Arc<S>, read: F) -> BoxStream<'static, Result<T>>
where
  S: AnimeStore + ?Sized + 'static,
  T: Send + 'static,
  F: Fn(&S) -> Result<T> + Send + Sync + 'static,
{
  let changes = store.subscribe();
  let observer = Observer {
    store,
    changes,
    read,
    started: false,
    failed: false,
  };

  stream::unfold(observer, |mut observer| async move {
    if observer.failed {
      return None;
    }

    if observer.started {
      // The store owns the sender, so this only ends if the store is gone
      observer.changes.changed().await.ok()?;
    } else {
      observer.started = true;
    }
    observer.changes.borrow_and_update();

    let snapshot = (observer.read)(&*observer.store);
    observer.failed = snapshot.is_err();
    Some((snapshot, observer))
  })
  .boxed()
}
