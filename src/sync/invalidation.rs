//! Declarative cache invalidation.
//!
//! One table maps each trigger (a settling mutation, an external push
//! event, a poll wake-up, session teardown) to the cache regions that
//! must be cleared, and one entry point applies it. Every producer goes
//! through [`InvalidationCoordinator::apply`]; nothing else clears cache
//! regions.
//!
//! List invalidation is coarse: the store keeps no secondary index from
//! scope to page keys, so any list-affecting trigger clears the whole
//! `Lists` namespace and lets readers refetch.

use tracing::debug;

use crate::cache::{CacheHandle, Namespace};
use crate::mail::types::MutationKind;

use super::{UpdateBus, UpdateEvent};

/// Change events arriving from the external push channel.
#[derive(Debug, Clone)]
pub enum PushEvent {
  ItemAdded { thread_id: String },
  ItemRemoved { thread_id: String },
  LabelChanged { thread_id: String },
}

/// Everything that can demand invalidation.
#[derive(Debug, Clone)]
pub enum InvalidationTrigger {
  /// A mutation settled, successfully or not.
  Mutation {
    thread_id: String,
    kind: MutationKind,
  },
  /// The push channel reported a remote change.
  Push(PushEvent),
  /// The pending-thread poller fired.
  PollWake { thread_ids: Vec<String> },
  /// Logout / session teardown.
  SessionEnd,
}

/// A clearable cache region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
  /// One detail entry
  Detail(String),
  /// The whole paginated-lists namespace
  ListPages,
  /// The whole aggregate-summaries namespace
  Summaries,
  /// Every namespace
  Everything,
}

/// The trigger-to-regions table.
pub fn regions_for(trigger: &InvalidationTrigger) -> Vec<Region> {
  match trigger {
    InvalidationTrigger::Mutation { thread_id, kind } => {
      let detail = Region::Detail(thread_id.clone());
      match kind {
        // Read-state changes move aggregate counters
        MutationKind::MarkRead | MutationKind::MarkUnread => {
          vec![detail, Region::ListPages, Region::Summaries]
        }
        MutationKind::Star | MutationKind::Unstar => vec![detail, Region::ListPages],
        // Deletion also changes totals
        MutationKind::Delete => vec![detail, Region::ListPages, Region::Summaries],
        MutationKind::MoveColumn { .. } => vec![detail, Region::ListPages],
        MutationKind::Summarize { .. } => vec![detail, Region::ListPages],
      }
    }
    InvalidationTrigger::Push(event) => match event {
      PushEvent::ItemAdded { .. } => vec![Region::ListPages, Region::Summaries],
      PushEvent::ItemRemoved { thread_id } | PushEvent::LabelChanged { thread_id } => vec![
        Region::Detail(thread_id.clone()),
        Region::ListPages,
        Region::Summaries,
      ],
    },
    InvalidationTrigger::PollWake { thread_ids } => {
      let mut regions: Vec<Region> = thread_ids.iter().cloned().map(Region::Detail).collect();
      regions.push(Region::ListPages);
      regions.push(Region::Summaries);
      regions
    }
    InvalidationTrigger::SessionEnd => vec![Region::Everything],
  }
}

/// Applies the invalidation table to the store and tells subscribers.
#[derive(Clone)]
pub struct InvalidationCoordinator {
  cache: CacheHandle,
  bus: UpdateBus,
}

impl InvalidationCoordinator {
  pub fn new(cache: CacheHandle, bus: UpdateBus) -> Self {
    Self { cache, bus }
  }

  /// The single entry point. Mutation settles, push events, poll wakes,
  /// and logout all invalidate through this call.
  pub fn apply(&self, trigger: &InvalidationTrigger) {
    debug!("invalidating for {:?}", trigger);
    for region in regions_for(trigger) {
      self.clear_region(region);
    }
  }

  fn clear_region(&self, region: Region) {
    match region {
      Region::Detail(id) => {
        self.cache.delete(Namespace::Details, &id);
        self.bus.publish(UpdateEvent::Invalidated {
          namespace: Namespace::Details,
          key: Some(id),
        });
      }
      Region::ListPages => {
        self.cache.clear(Namespace::Lists);
        self.bus.publish(UpdateEvent::Invalidated {
          namespace: Namespace::Lists,
          key: None,
        });
      }
      Region::Summaries => {
        self.cache.clear(Namespace::Summaries);
        self.bus.publish(UpdateEvent::Invalidated {
          namespace: Namespace::Summaries,
          key: None,
        });
      }
      Region::Everything => {
        self.cache.clear_all();
        for namespace in Namespace::ALL {
          self.bus.publish(UpdateEvent::Invalidated {
            namespace,
            key: None,
          });
        }
      }
    }
  }
}
