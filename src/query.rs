//! Query abstraction that turns result streams into presentation states.
//!
//! Inspired by TanStack Query, a `Query<T>` subscribes to a stream of results
//! and tracks the latest one as a [`QueryState`]. Live repository queries and
//! one-shot operations both go through it.
//!
//! # Example
//!
//! ```ignore
//! let repo = repository.clone();
//! let mut query = Query::new(move || results(repo.get_top_anime()));
//!
//! // Start the subscription
//! query.fetch();
//!
//! // Wait for the next state change, or poll from a tick handler
//! query.changed().await;
//!
//! match query.state() {
//!     QueryState::Idle => {}
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(list) if list.is_empty() => render_empty(),
//!     QueryState::Success(list) => render_list(list),
//!     QueryState::Error(e) => render_error(e),
//! }
//! ```

use futures::stream::{BoxStream, Stream, StreamExt};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is waiting for its first result
  Loading,
  /// Latest result was a value
  Success(T),
  /// Latest result was an error
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Adapt a stream of eyre results to the string errors a query carries.
pub fn results<T, S>(stream: S) -> BoxStream<'static, Result<T, String>>
where
  T: Send + 'static,
  S: Stream<Item = color_eyre::Result<T>> + Send + 'static,
{
  stream.map(|r| r.map_err(|e| format!("{:#}", e))).boxed()
}

/// A factory that opens a fresh result stream
type SubscribeFn<T> = Box<dyn Fn() -> BoxStream<'static, Result<T, String>> + Send + Sync>;

/// Subscription to a result stream with state management.
///
/// Query<T> encapsulates:
/// - How to open the stream (via a closure)
/// - Idle/loading/success/error states
/// - A forwarding task feeding results through a channel
/// - When the last result arrived
pub struct Query<T> {
  state: QueryState<T>,
  subscribe: SubscribeFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, String>>>,
  task: Option<JoinHandle<()>>,
  updated_at: Option<Instant>,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query over the streams returned by `subscribe`.
  ///
  /// The factory is called each time `fetch()` or `refetch()` starts a
  /// subscription.
  pub fn new<F>(subscribe: F) -> Self
  where
    F: Fn() -> BoxStream<'static, Result<T, String>> + Send + Sync + 'static,
  {
    Self {
      state: QueryState::Idle,
      subscribe: Box::new(subscribe),
      receiver: None,
      task: None,
      updated_at: None,
    }
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Get the data if the latest result was a value.
  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  /// Get the error message if the latest result was an error.
  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// When the latest result arrived.
  #[allow(dead_code)]
  pub fn updated_at(&self) -> Option<Instant> {
    self.updated_at
  }

  /// Start the subscription unless one is already running.
  pub fn fetch(&mut self) {
    if self.receiver.is_some() {
      return;
    }
    self.start();
  }

  /// Drop the running subscription and open a new one.
  #[allow(dead_code)]
  pub fn refetch(&mut self) {
    self.stop();
    self.start();
  }

  /// Apply every result that has already arrived, without blocking.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;

    while let Some(receiver) = &mut self.receiver {
      match receiver.try_recv() {
        Ok(result) => {
          self.apply(result);
          changed = true;
        }
        Err(mpsc::error::TryRecvError::Empty) => break,
        Err(mpsc::error::TryRecvError::Disconnected) => {
          changed |= self.finish();
          break;
        }
      }
    }

    changed
  }

  /// Wait until the state changes.
  ///
  /// Returns `false` when there is no subscription or it ended without
  /// changing the state.
  pub async fn changed(&mut self) -> bool {
    let next = match &mut self.receiver {
      Some(receiver) => receiver.recv().await,
      None => return false,
    };

    match next {
      Some(result) => {
        self.apply(result);
        true
      }
      None => self.finish(),
    }
  }

  fn apply(&mut self, result: Result<T, String>) {
    self.state = match result {
      Ok(data) => QueryState::Success(data),
      Err(error) => QueryState::Error(error),
    };
    self.updated_at = Some(Instant::now());
  }

  /// The stream ended. A stream that ends before producing anything is an error.
  fn finish(&mut self) -> bool {
    self.receiver = None;
    self.task = None;
    if self.state.is_loading() {
      self.state = QueryState::Error("Query ended without a result".to_string());
      return true;
    }
    false
  }

  fn start(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let mut stream = (self.subscribe)();
    self.task = Some(tokio::spawn(async move {
      while let Some(result) = stream.next().await {
        // Receiver dropped means the query was refetched or dropped
        if tx.send(result).is_err() {
          break;
        }
      }
    }));
  }

  fn stop(&mut self) {
    self.receiver = None;
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("updated_at", &self.updated_at)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::stream;
  use std::time::Duration;

  #[tokio::test]
  async fn test_query_success() {
    let mut query = Query::new(|| stream::once(async { Ok::<_, String>(vec![1, 2, 3]) }).boxed());

    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.is_loading());

    // Wait for the result
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_success());
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_query_error() {
    let mut query: Query<i32> =
      Query::new(|| stream::once(async { Err("Something went wrong".to_string()) }).boxed());

    query.fetch();
    assert!(query.changed().await);
    assert!(query.is_error());
    assert_eq!(query.error(), Some("Something went wrong"));
  }

  #[tokio::test]
  async fn test_empty_success_is_not_error() {
    let mut query = Query::new(|| stream::once(async { Ok::<_, String>(Vec::<u32>::new()) }).boxed());

    query.fetch();
    assert!(query.changed().await);
    assert!(query.is_success());
    assert_eq!(query.data().map(Vec::len), Some(0));
  }

  #[tokio::test]
  async fn test_poll_keeps_latest_of_many() {
    let mut query = Query::new(|| stream::iter(vec![Ok::<_, String>(1), Ok(2), Ok(3)]).boxed());

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert_eq!(query.data(), Some(&3));
    assert!(!query.poll());
  }

  #[tokio::test]
  async fn test_stream_ending_without_value_is_error() {
    let mut query: Query<i32> = Query::new(|| stream::empty().boxed());

    query.fetch();
    assert!(query.changed().await);
    assert!(query.is_error());
  }

  #[tokio::test]
  async fn test_fetch_while_subscribed_is_noop() {
    let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter_clone = counter.clone();

    let mut query = Query::new(move || {
      counter_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
      stream::pending::<Result<u32, String>>().boxed()
    });

    query.fetch();
    query.fetch();
    assert!(query.is_loading());
    assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_refetch_cancels_pending() {
    let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter_clone = counter.clone();

    let mut query = Query::new(move || {
      let n = counter_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
      stream::once(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, String>(n)
      })
      .boxed()
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Refetch should cancel the first and start a new one
    query.refetch();
    tokio::time::sleep(Duration::from_millis(100)).await;

    query.poll();
    // Only the second subscription should have delivered
    assert_eq!(query.data(), Some(&1));
  }
}
