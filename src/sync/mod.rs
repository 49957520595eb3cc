//! The synchronization core: stale-while-revalidate fetching, optimistic
//! mutations with snapshot/rollback, page reconciliation, invalidation
//! coordination, and the pending-thread poller.
//!
//! Everything here is single-owner, cooperative async: cache and storage
//! operations are synchronous, so state transitions interleave only at
//! network await points.

pub mod invalidation;
pub mod merge;
pub mod mutation;
pub mod orchestrator;
pub mod poller;

use tokio::sync::broadcast;

use crate::cache::Namespace;

/// Fully-qualified cache address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub namespace: Namespace,
  pub key: String,
}

impl CacheKey {
  pub fn new(namespace: Namespace, key: impl Into<String>) -> Self {
    Self {
      namespace,
      key: key.into(),
    }
  }
}

impl std::fmt::Display for CacheKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}", self.namespace, self.key)
  }
}

/// Update notifications for subscribers (the UI binding layer).
///
/// Fetch calls return whatever the cache holds right now; subscribers
/// learn about fresher data, optimistic patches, and invalidations
/// through these events.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
  /// A network result was written through for this key.
  Refreshed(CacheKey),
  /// An optimistic patch (or its rollback) rewrote this key.
  Patched(CacheKey),
  /// The key - or, with `key == None`, the whole namespace - was cleared.
  Invalidated {
    namespace: Namespace,
    key: Option<String>,
  },
}

/// Broadcast fan-out for [`UpdateEvent`]s.
#[derive(Clone)]
pub struct UpdateBus {
  tx: broadcast::Sender<UpdateEvent>,
}

impl UpdateBus {
  pub fn new() -> Self {
    let (tx, _) = broadcast::channel(256);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
    self.tx.subscribe()
  }

  /// Publish to whoever is listening. No subscribers is not an error.
  pub fn publish(&self, event: UpdateEvent) {
    let _ = self.tx.send(event);
  }
}

impl Default for UpdateBus {
  fn default() -> Self {
    Self::new()
  }
}
