//! Background polling for threads awaiting server-side transitions.
//!
//! Snoozed threads resurface and queued sends complete on the server's
//! schedule, with no push event in some deployments. While any such
//! thread is tracked, a timer periodically routes an invalidation
//! through the coordinator so readers refetch; the timer is aborted the
//! instant the tracked set empties.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::invalidation::{InvalidationCoordinator, InvalidationTrigger};

pub struct PendingPoller {
  inner: Arc<PollerInner>,
}

struct PollerInner {
  coordinator: InvalidationCoordinator,
  interval: Duration,
  tracked: Mutex<HashSet<String>>,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl PendingPoller {
  pub fn new(coordinator: InvalidationCoordinator, interval: Duration) -> Self {
    Self {
      inner: Arc::new(PollerInner {
        coordinator,
        interval,
        tracked: Mutex::new(HashSet::new()),
        task: Mutex::new(None),
      }),
    }
  }

  /// Start watching a thread. Spawns the timer if it isn't running.
  pub fn track(&self, thread_id: impl Into<String>) {
    let id = thread_id.into();
    if let Ok(mut tracked) = self.inner.tracked.lock() {
      tracked.insert(id);
    }
    self.ensure_running();
  }

  /// Stop watching a thread. The timer dies with the last entry.
  pub fn untrack(&self, thread_id: &str) {
    let now_empty = match self.inner.tracked.lock() {
      Ok(mut tracked) => {
        tracked.remove(thread_id);
        tracked.is_empty()
      }
      Err(_) => false,
    };
    if now_empty {
      self.stop();
    }
  }

  pub fn is_running(&self) -> bool {
    self
      .inner
      .task
      .lock()
      .ok()
      .and_then(|task| task.as_ref().map(|t| !t.is_finished()))
      .unwrap_or(false)
  }

  /// Abort the timer and forget every tracked thread.
  pub fn shutdown(&self) {
    if let Ok(mut tracked) = self.inner.tracked.lock() {
      tracked.clear();
    }
    self.stop();
  }

  fn ensure_running(&self) {
    let Ok(mut task) = self.inner.task.lock() else {
      return;
    };
    if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
      return;
    }

    let inner = Arc::clone(&self.inner);
    *task = Some(tokio::spawn(async move {
      let mut timer = tokio::time::interval(inner.interval);
      // The first tick of a tokio interval completes immediately
      timer.tick().await;
      loop {
        timer.tick().await;
        let ids: Vec<String> = match inner.tracked.lock() {
          Ok(tracked) => tracked.iter().cloned().collect(),
          Err(_) => break,
        };
        if ids.is_empty() {
          break;
        }
        debug!("poll wake for {} pending thread(s)", ids.len());
        inner
          .coordinator
          .apply(&InvalidationTrigger::PollWake { thread_ids: ids });
      }
    }));
  }

  fn stop(&self) {
    if let Ok(mut task) = self.inner.task.lock() {
      if let Some(task) = task.take() {
        task.abort();
      }
    }
  }
}

impl Clone for PendingPoller {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}
