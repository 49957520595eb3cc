//! Optimistic mutations with snapshot and rollback.
//!
//! One generic engine runs every mutation kind through the same
//! lifecycle:
//!
//! 1. cancel in-flight background fetches for every key the mutation may
//!    touch (a late-resolving fetch must not clobber the patch),
//! 2. snapshot the current value of each affected key,
//! 3. apply the kind's pure patch function and write the predicted
//!    values into the cache,
//! 4. await the remote call,
//! 5. on failure restore the snapshot verbatim,
//! 6. settle: route the affected regions through the invalidation
//!    coordinator regardless of outcome, since derived fields (aggregate
//!    unread counters) need server truth to resynchronize under
//!    concurrent mutations.
//!
//! Steps 2 and 3 contain no await points, so the snapshot is exactly the
//! state the patch was computed from.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use tracing::warn;

use crate::cache::{derive_key, page_scope_key, CacheHandle, Namespace, RawEntry};
use crate::error::SyncResult;
use crate::mail::types::{ListPage, MutationKind, ScopeSummary, ThreadDetail, ThreadSummary};

use super::invalidation::{InvalidationCoordinator, InvalidationTrigger};
use super::orchestrator::InflightRegistry;
use super::{CacheKey, UpdateBus, UpdateEvent};

/// Pre-mutation state of every key a mutation patched.
///
/// Captured once at mutation start and consumed at most once, on
/// rollback. The recorded values are self-contained raw entries, so a
/// concurrent namespace clear cannot corrupt a restore.
pub struct Snapshot {
  entries: Vec<(CacheKey, Option<RawEntry>)>,
}

impl Snapshot {
  fn capture(cache: &CacheHandle, keys: &[CacheKey]) -> Self {
    Self {
      entries: keys
        .iter()
        .map(|k| (k.clone(), cache.get_raw(k.namespace, &k.key)))
        .collect(),
    }
  }

  /// Restore every recorded key to its pre-mutation value, verbatim.
  fn restore(self, cache: &CacheHandle, bus: &UpdateBus) {
    for (key, prior) in self.entries {
      match prior {
        Some(raw) => cache.put_raw(key.namespace, raw),
        None => cache.delete(key.namespace, &key.key),
      }
      bus.publish(UpdateEvent::Patched(key));
    }
  }

  #[cfg(test)]
  fn keys(&self) -> Vec<CacheKey> {
    self.entries.iter().map(|(k, _)| k.clone()).collect()
  }
}

/// Field-level patch for one cached item. Returns whether anything
/// actually changed.
fn patch_item(item: &mut ThreadSummary, kind: &MutationKind) -> bool {
  match kind {
    MutationKind::MarkRead => {
      let changed = item.unread;
      item.unread = false;
      changed
    }
    MutationKind::MarkUnread => {
      let changed = !item.unread;
      item.unread = true;
      changed
    }
    MutationKind::Star => {
      let changed = !item.starred;
      item.starred = true;
      changed
    }
    MutationKind::Unstar => {
      let changed = item.starred;
      item.starred = false;
      changed
    }
    MutationKind::Summarize { text } => {
      let changed = item.summary.as_deref() != Some(text.as_str());
      item.summary = Some(text.clone());
      changed
    }
    // Removal is a page-shape change, handled by the page patch
    MutationKind::Delete | MutationKind::MoveColumn { .. } => false,
  }
}

/// Same patch applied to the detail record. Deletion leaves the detail
/// entry alone; its invalidation is the coordinator's job.
fn patch_detail(detail: &mut ThreadDetail, kind: &MutationKind) -> bool {
  match kind {
    MutationKind::MarkRead => {
      let changed = detail.unread;
      detail.unread = false;
      changed
    }
    MutationKind::MarkUnread => {
      let changed = !detail.unread;
      detail.unread = true;
      changed
    }
    MutationKind::Star => {
      let changed = !detail.starred;
      detail.starred = true;
      changed
    }
    MutationKind::Unstar => {
      let changed = detail.starred;
      detail.starred = false;
      changed
    }
    MutationKind::Summarize { text } => {
      let changed = detail.summary.as_deref() != Some(text.as_str());
      detail.summary = Some(text.clone());
      changed
    }
    MutationKind::MoveColumn { to, .. } => {
      let changed = detail.status != *to;
      detail.status = to.clone();
      changed
    }
    MutationKind::Delete => false,
  }
}

/// What the page patch saw and did.
struct PagePatchOutcome {
  /// Keys of pages whose contents changed
  changed: BTreeSet<String>,
  /// Scope keys whose cached pages contained the thread, pre-patch
  scopes: Vec<String>,
  /// The unread flag the thread last had in any cached page
  prior_unread: Option<bool>,
}

/// Pure patch over the full set of cached pages.
///
/// Field toggles apply to the thread everywhere it is cached. Deletion
/// removes it from every page. A column move removes the thread from
/// wherever it sits and prepends it to the scope's first page, so the
/// merged destination column surfaces it first (most-recently-moved
/// ordering is the tie-break, not the original timestamp).
fn patch_pages(
  pages: &mut Vec<(String, ListPage)>,
  thread_id: &str,
  kind: &MutationKind,
) -> PagePatchOutcome {
  let mut changed = BTreeSet::new();
  let mut scopes: Vec<String> = Vec::new();
  let mut prior_unread = None;

  for (key, page) in pages.iter() {
    if let Some(item) = page.items.iter().find(|i| i.id == thread_id) {
      if prior_unread.is_none() {
        prior_unread = Some(item.unread);
      }
      if let Some(scope) = page_scope_key(key) {
        if !scopes.iter().any(|s| s == scope) {
          scopes.push(scope.to_string());
        }
      }
    }
  }

  match kind {
    MutationKind::Delete => {
      for (key, page) in pages.iter_mut() {
        let before = page.items.len();
        page.items.retain(|i| i.id != thread_id);
        if page.items.len() != before {
          changed.insert(key.clone());
        }
      }
    }
    MutationKind::MoveColumn { to, .. } => {
      for scope in &scopes {
        let mut removed: Option<ThreadSummary> = None;
        let mut removed_from: Option<usize> = None;

        for (idx, (key, page)) in pages.iter_mut().enumerate() {
          if page_scope_key(key) != Some(scope.as_str()) {
            continue;
          }
          while let Some(pos) = page.items.iter().position(|i| i.id == thread_id) {
            let item = page.items.remove(pos);
            if removed.is_none() {
              removed = Some(item);
              removed_from = Some(idx);
            }
            changed.insert(key.clone());
          }
        }

        if let Some(mut item) = removed {
          item.status = to.clone();
          let first_key = derive_key(scope, None);
          let target = pages
            .iter()
            .position(|(k, _)| *k == first_key)
            .or(removed_from);
          if let Some(t) = target {
            pages[t].1.items.insert(0, item);
            changed.insert(pages[t].0.clone());
          }
        }
      }
    }
    _ => {
      for (key, page) in pages.iter_mut() {
        let mut page_changed = false;
        for item in page.items.iter_mut().filter(|i| i.id == thread_id) {
          page_changed |= patch_item(item, kind);
        }
        if page_changed {
          changed.insert(key.clone());
        }
      }
    }
  }

  PagePatchOutcome {
    changed,
    scopes,
    prior_unread,
  }
}

/// Aggregate unread counter movement for a mutation.
///
/// The counter moves only when the thread's last known local read-state
/// differs from the target state, which keeps a repeated mutation on an
/// already-patched thread from double counting.
fn unread_delta(prior_unread: bool, kind: &MutationKind) -> i64 {
  match kind {
    MutationKind::MarkRead if prior_unread => -1,
    MutationKind::MarkUnread if !prior_unread => 1,
    _ => 0,
  }
}

fn write_patched<T: Serialize>(
  cache: &CacheHandle,
  namespace: Namespace,
  key: &str,
  value: &T,
  cached_at: DateTime<Utc>,
) {
  match serde_json::to_vec(value) {
    Ok(payload) => cache.put_raw(
      namespace,
      RawEntry {
        key: key.to_string(),
        payload,
        cached_at,
      },
    ),
    Err(e) => warn!("failed to encode patched value for {namespace}/{key}: {e}"),
  }
}

/// The generic optimistic mutation engine.
#[derive(Clone)]
pub struct MutationEngine {
  cache: CacheHandle,
  bus: UpdateBus,
  inflight: InflightRegistry,
  coordinator: InvalidationCoordinator,
}

impl MutationEngine {
  pub fn new(
    cache: CacheHandle,
    bus: UpdateBus,
    inflight: InflightRegistry,
    coordinator: InvalidationCoordinator,
  ) -> Self {
    Self {
      cache,
      bus,
      inflight,
      coordinator,
    }
  }

  /// Run one mutation through cancel, snapshot, patch, remote call,
  /// rollback on error, settle.
  ///
  /// The returned error is the remote failure; the optimistic patch has
  /// already been rolled back by the time the caller sees it. No
  /// automatic retry.
  pub async fn run<F, Fut>(&self, thread_id: &str, kind: MutationKind, remote: F) -> SyncResult<()>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = SyncResult<()>>,
  {
    // Cancel-in-flight must complete before the snapshot is taken.
    let detail_key = CacheKey::new(Namespace::Details, thread_id);
    self.inflight.cancel_where(|k| {
      k.namespace == Namespace::Lists || k.namespace == Namespace::Summaries || *k == detail_key
    });

    let snapshot = self.apply_optimistic(thread_id, &kind);

    let result = remote().await;

    if let Err(e) = &result {
      warn!(
        "mutation {} on {} failed, rolling back: {e}",
        kind.action(),
        thread_id
      );
      snapshot.restore(&self.cache, &self.bus);
    }

    // Settle runs on success and failure alike.
    self.coordinator.apply(&InvalidationTrigger::Mutation {
      thread_id: thread_id.to_string(),
      kind,
    });

    result
  }

  /// Snapshot affected keys and write the patched values. Fully
  /// synchronous: nothing can interleave between capture and write.
  fn apply_optimistic(&self, thread_id: &str, kind: &MutationKind) -> Snapshot {
    let cached_pages = self.cache.get_all::<ListPage>(Namespace::Lists);
    let mut working: Vec<(String, ListPage)> = cached_pages
      .iter()
      .map(|(key, cached)| (key.clone(), cached.value.clone()))
      .collect();

    let outcome = patch_pages(&mut working, thread_id, kind);

    let cached_detail = self.cache.get::<ThreadDetail>(Namespace::Details, thread_id);
    let mut patched_detail = None;
    if let Some(cached) = &cached_detail {
      let mut detail = cached.value.clone();
      if patch_detail(&mut detail, kind) {
        patched_detail = Some((detail, cached.cached_at));
      }
    }

    // Aggregate counters: adjust only the scopes that held the thread,
    // and only when its local read-state actually flips.
    let prior_unread = outcome
      .prior_unread
      .or_else(|| cached_detail.as_ref().map(|c| c.value.unread));
    let mut summary_updates: Vec<(String, ScopeSummary, DateTime<Utc>)> = Vec::new();
    if let Some(prior) = prior_unread {
      let delta = unread_delta(prior, kind);
      if delta != 0 {
        for scope in &outcome.scopes {
          if let Some(cached) = self.cache.get::<ScopeSummary>(Namespace::Summaries, scope) {
            let mut summary = cached.value.clone();
            summary.unread = if delta > 0 {
              summary.unread.saturating_add(1)
            } else {
              summary.unread.saturating_sub(1)
            };
            summary_updates.push((scope.clone(), summary, cached.cached_at));
          }
        }
      }
    }

    let mut affected: Vec<CacheKey> = outcome
      .changed
      .iter()
      .map(|k| CacheKey::new(Namespace::Lists, k.clone()))
      .collect();
    if patched_detail.is_some() {
      affected.push(CacheKey::new(Namespace::Details, thread_id));
    }
    for (scope, _, _) in &summary_updates {
      affected.push(CacheKey::new(Namespace::Summaries, scope.clone()));
    }

    let snapshot = Snapshot::capture(&self.cache, &affected);

    // Write the predictions. `cached_at` is preserved: an optimistic
    // guess is no fresher than the entry it patched.
    for (key, page) in &working {
      if outcome.changed.contains(key) {
        let cached_at = cached_pages
          .iter()
          .find(|(k, _)| k == key)
          .map(|(_, c)| c.cached_at)
          .unwrap_or_else(Utc::now);
        write_patched(&self.cache, Namespace::Lists, key, page, cached_at);
      }
    }
    if let Some((detail, cached_at)) = &patched_detail {
      write_patched(&self.cache, Namespace::Details, thread_id, detail, *cached_at);
    }
    for (scope, summary, cached_at) in &summary_updates {
      write_patched(&self.cache, Namespace::Summaries, scope, summary, *cached_at);
    }

    for key in &affected {
      self.bus.publish(UpdateEvent::Patched(key.clone()));
    }

    snapshot
  }
}
