//! Cached mail client that wraps MailClient with the sync core.
//!
//! This is the facade the UI binding layer consumes: the same method
//! surface as the raw client, with the cache store, fetch orchestrator,
//! mutation engine, invalidation coordinator, and pending poller wired
//! behind it. The store handle is injected and owned here, with an
//! explicit construct/shutdown lifecycle tied to the session.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::cache::{derive_key, CacheHandle, Namespace, TtlPolicy};
use crate::config::Config;
use crate::error::SyncResult;
use crate::sync::invalidation::{InvalidationCoordinator, InvalidationTrigger, PushEvent};
use crate::sync::mutation::MutationEngine;
use crate::sync::orchestrator::{FetchOrchestrator, FetchResult};
use crate::sync::poller::PendingPoller;
use crate::sync::{UpdateBus, UpdateEvent};

use super::client::MailClient;
use super::types::{ListPage, MutationKind, Scope, ScopeSummary, ThreadDetail};

#[derive(Clone)]
pub struct CachedMailClient {
  inner: MailClient,
  cache: CacheHandle,
  bus: UpdateBus,
  orchestrator: FetchOrchestrator,
  mutations: MutationEngine,
  coordinator: InvalidationCoordinator,
  poller: PendingPoller,
}

impl CachedMailClient {
  /// Create a cached client over the default durable store.
  pub fn new(config: &Config, token: String) -> SyncResult<Self> {
    let cache = CacheHandle::open(config.cache.path.as_deref());
    Self::with_store(config, token, cache)
  }

  /// Create a cached client over an injected store handle.
  pub fn with_store(config: &Config, token: String, cache: CacheHandle) -> SyncResult<Self> {
    let inner = MailClient::new(&config.backend.url, token)?;
    let bus = UpdateBus::new();
    let ttl = TtlPolicy::from_config(&config.cache);

    let orchestrator = FetchOrchestrator::new(cache.clone(), ttl, bus.clone());
    let coordinator = InvalidationCoordinator::new(cache.clone(), bus.clone());
    let mutations = MutationEngine::new(
      cache.clone(),
      bus.clone(),
      orchestrator.inflight().clone(),
      coordinator.clone(),
    );
    let poller = PendingPoller::new(
      coordinator.clone(),
      Duration::from_secs(config.poll.interval_secs),
    );

    Ok(Self {
      inner,
      cache,
      bus,
      orchestrator,
      mutations,
      coordinator,
      poller,
    })
  }

  /// Subscribe to cache update events. Fetch calls return what the cache
  /// holds now; fresher data and patches arrive here.
  pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
    self.bus.subscribe()
  }

  pub fn update_bus(&self) -> &UpdateBus {
    &self.bus
  }

  /// Fetch one page of a scope's thread list.
  ///
  /// The first page reads cache-first with background revalidation;
  /// later pages read network-first, because their cache key is the
  /// request cursor and a stale page could replay earlier content.
  pub async fn list_page(
    &self,
    scope: &Scope,
    cursor: Option<&str>,
  ) -> SyncResult<FetchResult<ListPage>> {
    let key = derive_key(&scope.storage_key(), cursor);
    let inner = self.inner.clone();
    let scope_owned = scope.clone();
    let cursor_owned = cursor.map(String::from);
    let fetcher =
      move || async move { inner.list_page(&scope_owned, cursor_owned.as_deref()).await };

    if cursor.is_none() {
      self
        .orchestrator
        .fetch_swr(Namespace::Lists, &key, fetcher)
        .await
    } else {
      self
        .orchestrator
        .fetch_network_first(Namespace::Lists, &key, fetcher)
        .await
    }
  }

  /// Fetch a single thread with caching.
  pub async fn get_thread(&self, id: &str) -> SyncResult<FetchResult<ThreadDetail>> {
    let inner = self.inner.clone();
    let id_owned = id.to_string();
    self
      .orchestrator
      .fetch_swr(Namespace::Details, id, move || async move {
        inner.get_thread(&id_owned).await
      })
      .await
  }

  /// Fetch a scope's aggregate summary with caching.
  pub async fn scope_summary(&self, scope: &Scope) -> SyncResult<FetchResult<ScopeSummary>> {
    let inner = self.inner.clone();
    let scope_owned = scope.clone();
    self
      .orchestrator
      .fetch_swr(
        Namespace::Summaries,
        &scope.storage_key(),
        move || async move { inner.scope_summary(&scope_owned).await },
      )
      .await
  }

  /// Apply a mutation optimistically and send it to the backend.
  ///
  /// On failure the local patch is already rolled back when this
  /// returns; surface a transient message and let the user retry.
  pub async fn mutate(&self, thread_id: &str, kind: MutationKind) -> SyncResult<()> {
    let inner = self.inner.clone();
    let id_owned = thread_id.to_string();
    let remote_kind = kind.clone();
    self
      .mutations
      .run(thread_id, kind, move || async move {
        inner.modify_thread(&id_owned, &remote_kind).await
      })
      .await
  }

  /// The push channel's single entry point into the cache.
  pub fn on_push_event(&self, event: PushEvent) {
    self.coordinator.apply(&InvalidationTrigger::Push(event));
  }

  /// Start polling for a thread awaiting a server-side transition.
  pub fn track_pending(&self, thread_id: &str) {
    self.poller.track(thread_id);
  }

  pub fn untrack_pending(&self, thread_id: &str) {
    self.poller.untrack(thread_id);
  }

  /// Wipe the cache (diagnostics, logout-without-teardown).
  pub fn invalidate_all(&self) {
    self.coordinator.apply(&InvalidationTrigger::SessionEnd);
  }

  /// Session teardown: stop background work, clear every namespace, and
  /// dispose of the store handle.
  pub fn shutdown(self) {
    self.poller.shutdown();
    self.orchestrator.inflight().cancel_all();
    self.coordinator.apply(&InvalidationTrigger::SessionEnd);
  }

  /// Entry counts per namespace (diagnostics).
  pub fn cache_stats(&self) -> Vec<(Namespace, usize)> {
    Namespace::ALL
      .iter()
      .map(|ns| (*ns, self.cache.get_all_raw(*ns).len()))
      .collect()
  }
}
