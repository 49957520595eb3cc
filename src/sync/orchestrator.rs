//! Stale-while-revalidate fetch orchestration.
//!
//! Two read paths, chosen by the caller per resource:
//!
//! - [`FetchOrchestrator::fetch_swr`] for singleton resources and *first*
//!   pages: any cached value is returned to the caller immediately; if it
//!   is past its TTL a background revalidation is spawned that writes
//!   through and notifies subscribers.
//! - [`FetchOrchestrator::fetch_network_first`] for *later* pages: a page's
//!   cache key is the request cursor, so a stale cached page could replay
//!   earlier content under a different cursor and corrupt perceived scroll
//!   order. Later pages therefore hit the network unless the cache is
//!   explicitly fresh, and fall back to the cache only when the network
//!   fails.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::cache::{is_fresh, CacheHandle, Namespace, TtlPolicy};
use crate::error::SyncResult;

use super::{CacheKey, UpdateBus, UpdateEvent};

/// Where a fetch result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  /// Fresh data from the network, already written through
  Network,
  /// Cached data inside its TTL window
  CacheFresh,
  /// Cached data past its TTL; a background revalidation is in flight
  CacheRevalidating,
  /// Network failed; serving the cached value instead
  CacheFallback,
}

/// A fetch result with provenance.
#[derive(Debug, Clone)]
pub struct FetchResult<T> {
  pub value: T,
  pub source: FetchSource,
  pub cached_at: Option<DateTime<Utc>>,
}

/// Abort handles for in-flight background revalidations, keyed by the
/// cache key they will write to.
///
/// The mutation engine drains matching entries *before* taking its
/// snapshot, so a concurrently-resolving fetch cannot overwrite an
/// optimistic patch after it lands.
#[derive(Clone, Default)]
pub struct InflightRegistry {
  tasks: Arc<Mutex<HashMap<CacheKey, AbortHandle>>>,
}

impl InflightRegistry {
  fn register(&self, key: CacheKey, handle: AbortHandle) {
    let Ok(mut tasks) = self.tasks.lock() else {
      return;
    };
    // Latest revalidation wins; a superseded one must not write
    if let Some(old) = tasks.insert(key, handle) {
      old.abort();
    }
  }

  fn complete(&self, key: &CacheKey) {
    if let Ok(mut tasks) = self.tasks.lock() {
      tasks.remove(key);
    }
  }

  /// Abort and forget the fetch for one key, if any.
  pub fn cancel(&self, key: &CacheKey) {
    let Ok(mut tasks) = self.tasks.lock() else {
      return;
    };
    if let Some(handle) = tasks.remove(key) {
      handle.abort();
    }
  }

  /// Abort and forget every fetch matching the predicate.
  pub fn cancel_where(&self, pred: impl Fn(&CacheKey) -> bool) {
    let Ok(mut tasks) = self.tasks.lock() else {
      return;
    };
    tasks.retain(|key, handle| {
      if pred(key) {
        handle.abort();
        false
      } else {
        true
      }
    });
  }

  pub fn cancel_all(&self) {
    self.cancel_where(|_| true);
  }

  #[cfg(test)]
  fn len(&self) -> usize {
    self.tasks.lock().map(|t| t.len()).unwrap_or(0)
  }
}

/// The stale-while-revalidate fetch layer.
#[derive(Clone)]
pub struct FetchOrchestrator {
  cache: CacheHandle,
  ttl: TtlPolicy,
  bus: UpdateBus,
  inflight: InflightRegistry,
}

impl FetchOrchestrator {
  pub fn new(cache: CacheHandle, ttl: TtlPolicy, bus: UpdateBus) -> Self {
    Self {
      cache,
      ttl,
      bus,
      inflight: InflightRegistry::default(),
    }
  }

  pub fn inflight(&self) -> &InflightRegistry {
    &self.inflight
  }

  /// Cache-first read for singleton resources and first pages.
  ///
  /// A cached value satisfies the immediate read regardless of freshness;
  /// if it is past its TTL, the fetcher runs in the background, writes
  /// through on success, and subscribers hear about it via
  /// [`UpdateEvent::Refreshed`]. Only a cache miss awaits the network.
  pub async fn fetch_swr<T, F, Fut>(
    &self,
    namespace: Namespace,
    key: &str,
    fetcher: F,
  ) -> SyncResult<FetchResult<T>>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = SyncResult<T>> + Send + 'static,
  {
    if let Some(cached) = self.cache.get::<T>(namespace, key) {
      if is_fresh(cached.cached_at, self.ttl.ttl(namespace), Utc::now()) {
        return Ok(FetchResult {
          value: cached.value,
          source: FetchSource::CacheFresh,
          cached_at: Some(cached.cached_at),
        });
      }

      self.spawn_revalidation(namespace, key, fetcher());
      return Ok(FetchResult {
        value: cached.value,
        source: FetchSource::CacheRevalidating,
        cached_at: Some(cached.cached_at),
      });
    }

    // Miss: the network is the only source
    let value = fetcher().await?;
    self.write_through(namespace, key, &value);
    Ok(FetchResult {
      value,
      source: FetchSource::Network,
      cached_at: None,
    })
  }

  /// Network-first read for later pages.
  ///
  /// Serves the cache directly only when explicitly fresh. Otherwise the
  /// network result wins; on network failure the cached page (if any) is
  /// served as a fallback, else the failure propagates.
  pub async fn fetch_network_first<T, F, Fut>(
    &self,
    namespace: Namespace,
    key: &str,
    fetcher: F,
  ) -> SyncResult<FetchResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
  {
    let stale = match self.cache.get::<T>(namespace, key) {
      Some(cached) if is_fresh(cached.cached_at, self.ttl.ttl(namespace), Utc::now()) => {
        return Ok(FetchResult {
          value: cached.value,
          source: FetchSource::CacheFresh,
          cached_at: Some(cached.cached_at),
        });
      }
      other => other,
    };

    match fetcher().await {
      Ok(value) => {
        self.write_through(namespace, key, &value);
        Ok(FetchResult {
          value,
          source: FetchSource::Network,
          cached_at: None,
        })
      }
      Err(e) => match stale {
        Some(cached) => {
          warn!("network fetch of {namespace}/{key} failed, serving cached page: {e}");
          Ok(FetchResult {
            value: cached.value,
            source: FetchSource::CacheFallback,
            cached_at: Some(cached.cached_at),
          })
        }
        None => Err(e),
      },
    }
  }

  /// Every successful network result lands in the store before anything
  /// else sees it.
  fn write_through<T: Serialize>(&self, namespace: Namespace, key: &str, value: &T) {
    self.cache.set(namespace, key, value);
    self
      .bus
      .publish(UpdateEvent::Refreshed(CacheKey::new(namespace, key)));
  }

  fn spawn_revalidation<T, Fut>(&self, namespace: Namespace, key: &str, fut: Fut)
  where
    T: Serialize + Send + 'static,
    Fut: Future<Output = SyncResult<T>> + Send + 'static,
  {
    let ckey = CacheKey::new(namespace, key);
    let cache = self.cache.clone();
    let bus = self.bus.clone();
    let inflight = self.inflight.clone();
    let task_key = ckey.clone();

    let task = tokio::spawn(async move {
      match fut.await {
        Ok(value) => {
          cache.set(namespace, &task_key.key, &value);
          bus.publish(UpdateEvent::Refreshed(task_key.clone()));
        }
        Err(e) => debug!("background revalidation of {task_key} failed: {e}"),
      }
      inflight.complete(&task_key);
    });

    // If the task already finished, this stores a dead handle; aborting
    // a finished task is a no-op.
    self.inflight.register(ckey, task.abort_handle());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::CacheConfig;
  use crate::mail::types::{ListPage, ThreadSummary};
  use chrono::Duration;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn summary(id: &str) -> ThreadSummary {
    ThreadSummary {
      id: id.to_string(),
      sender: "alice@example.com".into(),
      subject: format!("subject {id}"),
      received_at: Utc::now(),
      unread: true,
      starred: false,
      has_attachment: false,
      status: "TODO".into(),
      summary: None,
    }
  }

  fn orchestrator() -> FetchOrchestrator {
    FetchOrchestrator::new(CacheHandle::noop(), TtlPolicy::default(), UpdateBus::new())
  }

  fn orchestrator_with_cache() -> (FetchOrchestrator, CacheHandle, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = crate::cache::SqliteStore::open_at(&dir.path().join("cache.db")).unwrap();
    let cache = CacheHandle::new(Arc::new(store));
    let orch = FetchOrchestrator::new(cache.clone(), TtlPolicy::default(), UpdateBus::new());
    (orch, cache, dir)
  }

  fn stamp_page(cache: &CacheHandle, key: &str, page: &ListPage, age: Duration) {
    cache.put_raw(
      Namespace::Lists,
      crate::cache::RawEntry {
        key: key.into(),
        payload: serde_json::to_vec(page).unwrap(),
        cached_at: Utc::now() - age,
      },
    );
  }

  #[tokio::test]
  async fn fresh_first_page_served_without_network() {
    let (orch, cache, _dir) = orchestrator_with_cache();
    let page = ListPage {
      items: vec![summary("a"), summary("b"), summary("c")],
      next_cursor: Some("tok2".into()),
      has_more: true,
    };
    // cached 1s ago, TTL 60s: fresh
    stamp_page(&cache, "inbox:first", &page, Duration::seconds(1));

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in = calls.clone();
    let result = orch
      .fetch_swr::<ListPage, _, _>(Namespace::Lists, "inbox:first", move || {
        calls_in.fetch_add(1, Ordering::SeqCst);
        async move { unreachable!("fresh cache must satisfy the read") }
      })
      .await
      .unwrap();

    assert_eq!(result.source, FetchSource::CacheFresh);
    assert_eq!(result.value.items.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn stale_entry_served_then_revalidated_in_background() {
    let (_, cache, _dir) = orchestrator_with_cache();
    let bus = UpdateBus::new();
    let orch = FetchOrchestrator::new(cache.clone(), TtlPolicy::default(), bus.clone());
    let mut events = bus.subscribe();

    let old = ListPage {
      items: vec![summary("old")],
      next_cursor: None,
      has_more: false,
    };
    stamp_page(&cache, "inbox:first", &old, Duration::hours(1));

    let fresh = ListPage {
      items: vec![summary("new")],
      next_cursor: None,
      has_more: false,
    };
    let fresh_out = fresh.clone();
    let result = orch
      .fetch_swr::<ListPage, _, _>(Namespace::Lists, "inbox:first", move || async move {
        Ok(fresh_out)
      })
      .await
      .unwrap();

    // Stale value satisfies the immediate read
    assert_eq!(result.source, FetchSource::CacheRevalidating);
    assert_eq!(result.value.items[0].id, "old");

    // The background write lands and is announced
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let stored = cache
      .get::<ListPage>(Namespace::Lists, "inbox:first")
      .unwrap();
    assert_eq!(stored.value.items[0].id, "new");
    assert!(matches!(events.try_recv(), Ok(UpdateEvent::Refreshed(k)) if k.key == "inbox:first"));
  }

  #[tokio::test]
  async fn miss_awaits_network_and_writes_through() {
    let (orch, cache, _dir) = orchestrator_with_cache();
    let page = ListPage {
      items: vec![summary("a")],
      next_cursor: None,
      has_more: false,
    };
    let page_out = page.clone();

    let result = orch
      .fetch_swr::<ListPage, _, _>(Namespace::Lists, "inbox:first", move || async move {
        Ok(page_out)
      })
      .await
      .unwrap();

    assert_eq!(result.source, FetchSource::Network);
    assert!(cache
      .get::<ListPage>(Namespace::Lists, "inbox:first")
      .is_some());
  }

  #[tokio::test]
  async fn miss_propagates_network_failure() {
    let orch = orchestrator();
    let result = orch
      .fetch_swr::<ListPage, _, _>(Namespace::Lists, "inbox:first", || async {
        Err(crate::error::SyncError::Api {
          status: "unavailable".into(),
        })
      })
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn later_page_prefers_network_over_stale_cache() {
    let (orch, cache, _dir) = orchestrator_with_cache();
    let old = ListPage {
      items: vec![summary("old")],
      next_cursor: None,
      has_more: false,
    };
    stamp_page(&cache, "inbox:tok2", &old, Duration::hours(1));

    let fresh = ListPage {
      items: vec![summary("new")],
      next_cursor: None,
      has_more: false,
    };
    let fresh_out = fresh.clone();
    let result = orch
      .fetch_network_first::<ListPage, _, _>(Namespace::Lists, "inbox:tok2", move || async move {
        Ok(fresh_out)
      })
      .await
      .unwrap();

    assert_eq!(result.source, FetchSource::Network);
    assert_eq!(result.value.items[0].id, "new");
  }

  #[tokio::test]
  async fn later_page_falls_back_to_cache_on_network_failure() {
    let (orch, cache, _dir) = orchestrator_with_cache();
    let old = ListPage {
      items: vec![summary("old")],
      next_cursor: None,
      has_more: false,
    };
    stamp_page(&cache, "inbox:tok2", &old, Duration::hours(1));

    let result = orch
      .fetch_network_first::<ListPage, _, _>(Namespace::Lists, "inbox:tok2", || async {
        Err(crate::error::SyncError::Api {
          status: "unavailable".into(),
        })
      })
      .await
      .unwrap();

    assert_eq!(result.source, FetchSource::CacheFallback);
    assert_eq!(result.value.items[0].id, "old");
  }

  #[tokio::test]
  async fn later_page_failure_without_cache_propagates() {
    let orch = orchestrator();
    let result = orch
      .fetch_network_first::<ListPage, _, _>(Namespace::Lists, "inbox:tok9", || async {
        Err(crate::error::SyncError::Api {
          status: "unavailable".into(),
        })
      })
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn later_page_served_directly_when_fresh() {
    let (orch, cache, _dir) = orchestrator_with_cache();
    let page = ListPage {
      items: vec![summary("a")],
      next_cursor: None,
      has_more: false,
    };
    stamp_page(&cache, "inbox:tok2", &page, Duration::seconds(1));

    let result = orch
      .fetch_network_first::<ListPage, _, _>(Namespace::Lists, "inbox:tok2", || async {
        unreachable!("fresh later page must not hit the network")
      })
      .await
      .unwrap();

    assert_eq!(result.source, FetchSource::CacheFresh);
  }

  #[tokio::test]
  async fn cancelled_revalidation_never_writes() {
    let (orch, cache, _dir) = orchestrator_with_cache();
    let old = ListPage {
      items: vec![summary("old")],
      next_cursor: None,
      has_more: false,
    };
    stamp_page(&cache, "inbox:first", &old, Duration::hours(1));

    let slow = ListPage {
      items: vec![summary("slow")],
      next_cursor: None,
      has_more: false,
    };
    let slow_out = slow.clone();
    let _ = orch
      .fetch_swr::<ListPage, _, _>(Namespace::Lists, "inbox:first", move || async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Ok(slow_out)
      })
      .await
      .unwrap();

    assert_eq!(orch.inflight().len(), 1);
    orch
      .inflight()
      .cancel(&CacheKey::new(Namespace::Lists, "inbox:first"));

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    let stored = cache
      .get::<ListPage>(Namespace::Lists, "inbox:first")
      .unwrap();
    assert_eq!(stored.value.items[0].id, "old");
  }

  #[tokio::test]
  async fn short_ttl_config_marks_entries_stale() {
    let cfg = CacheConfig {
      detail_ttl_secs: 0,
      list_ttl_secs: 0,
      summary_ttl_secs: 0,
      path: None,
    };
    let (_, cache, _dir) = orchestrator_with_cache();
    let orch = FetchOrchestrator::new(cache.clone(), TtlPolicy::from_config(&cfg), UpdateBus::new());

    let page = ListPage {
      items: vec![summary("a")],
      next_cursor: None,
      has_more: false,
    };
    stamp_page(&cache, "inbox:first", &page, Duration::zero());

    let page_out = page.clone();
    let result = orch
      .fetch_swr::<ListPage, _, _>(Namespace::Lists, "inbox:first", move || async move {
        Ok(page_out)
      })
      .await
      .unwrap();

    // Zero TTL: entry is immediately stale, served while revalidating
    assert_eq!(result.source, FetchSource::CacheRevalidating);
  }
}
