//! Async query abstraction binding the UI layer to the sync core.
//!
//! A `Query<T>` encapsulates a fetch closure, loading/success/error
//! state, and poll-based result delivery. Bound to the update bus via
//! [`Query::watching`], it refetches automatically when a watched cache
//! key is refreshed, patched, or invalidated - the consumer keeps
//! calling `poll()` from its event loop and re-renders on `true`.
//!
//! # Example
//!
//! ```ignore
//! let mail = cached_client.clone();
//! let mut query = Query::new(move || {
//!     let mail = mail.clone();
//!     async move {
//!         mail.list_page(&Scope::Inbox, None)
//!             .await
//!             .map(|r| r.value)
//!             .map_err(|e| e.to_string())
//!     }
//! })
//! .watching(
//!     mail.update_bus(),
//!     vec![CacheKey::new(Namespace::Lists, "inbox:first")],
//! );
//!
//! query.fetch();
//! // In the event loop tick:
//! if query.poll() {
//!     // State changed, re-render
//! }
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc};

use crate::cache::Namespace;
use crate::sync::{CacheKey, UpdateBus, UpdateEvent};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
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

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, String>> + Send + Sync>;

/// Async query with state management and cache-update awareness.
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, String>>>,
  fetched_at: Option<Instant>,
  stale_time: Duration,
  updates: Option<broadcast::Receiver<UpdateEvent>>,
  watched: Vec<CacheKey>,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query with the given fetcher function.
  ///
  /// The fetcher is a closure that returns a future. It will be called
  /// each time `fetch()` or `refetch()` is invoked.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      fetched_at: None,
      stale_time: Duration::from_secs(60),
      updates: None,
      watched: Vec::new(),
    }
  }

  /// Set the stale time for this query.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  /// Watch cache keys on the update bus. When any of them is refreshed,
  /// patched, or invalidated, the next `poll()` starts a refetch.
  pub fn watching(mut self, bus: &UpdateBus, keys: Vec<CacheKey>) -> Self {
    self.updates = Some(bus.subscribe());
    self.watched = keys;
    self
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

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

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Check if the data is stale (older than stale_time).
  pub fn is_stale(&self) -> bool {
    match &self.state {
      QueryState::Success(_) => self
        .fetched_at
        .map(|t| t.elapsed() > self.stale_time)
        .unwrap_or(true),
      _ => false,
    }
  }

  /// Start fetching data if not already loading.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, even if already loading or data exists.
  pub fn refetch(&mut self) {
    // Cancel any pending fetch by dropping the receiver
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for cache updates and pending fetch results.
  ///
  /// Returns `true` if the state changed. Call this in your event loop
  /// tick handler.
  pub fn poll(&mut self) -> bool {
    if self.drain_updates() {
      self.refetch();
      return true;
    }

    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.state = QueryState::Success(data);
        self.fetched_at = Some(Instant::now());
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  /// True when a watched key changed since the last poll.
  fn drain_updates(&mut self) -> bool {
    let Some(updates) = &mut self.updates else {
      return false;
    };

    let mut hit = false;
    loop {
      match updates.try_recv() {
        Ok(event) => {
          if event_matches(&event, &self.watched) {
            hit = true;
          }
        }
        Err(broadcast::error::TryRecvError::Empty) => break,
        Err(broadcast::error::TryRecvError::Closed) => break,
        // Missed events: assume a watched key was among them
        Err(broadcast::error::TryRecvError::Lagged(_)) => {
          hit = true;
        }
      }
    }

    // Never interrupt nothing: an Idle query has no data to refresh
    hit && !matches!(self.state, QueryState::Idle)
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

fn event_matches(event: &UpdateEvent, watched: &[CacheKey]) -> bool {
  let (namespace, key): (Namespace, Option<&str>) = match event {
    UpdateEvent::Refreshed(k) | UpdateEvent::Patched(k) => (k.namespace, Some(k.key.as_str())),
    UpdateEvent::Invalidated { namespace, key } => (*namespace, key.as_deref()),
  };

  watched.iter().any(|w| {
    w.namespace == namespace
      && match key {
        // Namespace-wide invalidation touches every watched key in it
        None => true,
        Some(k) => w.key == k,
      }
  })
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .field("watched", &self.watched)
      .finish_non_exhaustive()
  }
}
