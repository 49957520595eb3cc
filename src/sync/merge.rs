//! Page reconciliation and the client-side derived view.
//!
//! Fetched pages overlap under pagination drift, so merging walks pages
//! in fetch order with a seen-id set: the first occurrence of a thread
//! wins its position, later duplicates are dropped. Merging is
//! idempotent - re-merging a sequence with repeated pages yields the
//! same output.
//!
//! Filtering and sorting recompute from already-fetched data only; they
//! never trigger a fetch.

use crate::mail::types::ThreadSummary;

/// Consecutive all-empty pages tolerated before auto-pagination stops
/// asking for more. Guards against an unbounded fetch loop while a
/// slow-to-sync backend catches up.
pub const MAX_CONSECUTIVE_EMPTY_PAGES: u32 = 3;

/// A merged board column.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardColumn {
  pub status: String,
  pub items: Vec<ThreadSummary>,
}

/// Status-partitioned view of merged pages. Columns appear in first-seen
/// order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoardView {
  pub columns: Vec<BoardColumn>,
}

impl BoardView {
  pub fn column(&self, status: &str) -> Option<&BoardColumn> {
    self.columns.iter().find(|c| c.status == status)
  }

  pub fn total_items(&self) -> usize {
    self.columns.iter().map(|c| c.items.len()).sum()
  }
}

/// Merge page item-lists into one deduplicated linear list, preserving
/// fetch order.
pub fn merge_linear<'a, I>(pages: I) -> Vec<ThreadSummary>
where
  I: IntoIterator<Item = &'a [ThreadSummary]>,
{
  let mut seen = std::collections::HashSet::new();
  let mut merged = Vec::new();

  for items in pages {
    for item in items {
      if seen.insert(item.id.clone()) {
        merged.push(item.clone());
      }
    }
  }

  merged
}

/// Merge page item-lists into status-partitioned columns.
///
/// Per column the guarantee is the same as [`merge_linear`]: fetch
/// order preserved, every thread id exactly once.
pub fn merge_board<'a, I>(pages: I) -> BoardView
where
  I: IntoIterator<Item = &'a [ThreadSummary]>,
{
  let mut view = BoardView::default();

  for item in merge_linear(pages) {
    match view.columns.iter_mut().find(|c| c.status == item.status) {
      Some(column) => column.items.push(item),
      None => view.columns.push(BoardColumn {
        status: item.status.clone(),
        items: vec![item],
      }),
    }
  }

  view
}

/// Client-side filter over already-fetched threads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewFilter {
  pub unread_only: bool,
  pub has_attachment: bool,
  /// Case-insensitive substring match on the sender
  pub sender: Option<String>,
}

impl ViewFilter {
  pub fn is_active(&self) -> bool {
    self.unread_only || self.has_attachment || self.sender.is_some()
  }

  fn matches(&self, item: &ThreadSummary) -> bool {
    if self.unread_only && !item.unread {
      return false;
    }
    if self.has_attachment && !item.has_attachment {
      return false;
    }
    if let Some(needle) = &self.sender {
      if !item
        .sender
        .to_lowercase()
        .contains(&needle.trim().to_lowercase())
      {
        return false;
      }
    }
    true
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
  /// Received timestamp
  ReceivedAt,
  /// Sender display name
  Sender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
  Ascending,
  Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSort {
  pub field: SortField,
  pub direction: SortDirection,
}

/// Recompute the derived view: filter, then stable-sort.
///
/// Pure over its input; recomputed on every filter/sort change without
/// touching the network.
pub fn apply_view(
  items: &[ThreadSummary],
  filter: &ViewFilter,
  sort: Option<ViewSort>,
) -> Vec<ThreadSummary> {
  let mut out: Vec<ThreadSummary> = items
    .iter()
    .filter(|i| filter.matches(i))
    .cloned()
    .collect();

  if let Some(sort) = sort {
    out.sort_by(|a, b| {
      let ordering = match sort.field {
        SortField::ReceivedAt => a.received_at.cmp(&b.received_at),
        SortField::Sender => a.sender.to_lowercase().cmp(&b.sender.to_lowercase()),
      };
      match sort.direction {
        SortDirection::Ascending => ordering,
        SortDirection::Descending => ordering.reverse(),
      }
    });
  }

  out
}

/// Gate for requesting the next page.
///
/// Fires only when the viewport sentinel is visible, no client-side
/// filter is active (filters operate on fetched data; fetching more
/// would not by itself satisfy one), and fewer than
/// [`MAX_CONSECUTIVE_EMPTY_PAGES`] fetched pages in a row were empty.
pub fn should_fetch_next(
  sentinel_visible: bool,
  filter: &ViewFilter,
  consecutive_empty_pages: u32,
) -> bool {
  sentinel_visible && !filter.is_active() && consecutive_empty_pages < MAX_CONSECUTIVE_EMPTY_PAGES
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, Utc};

  fn thread(id: &str, status: &str) -> ThreadSummary {
    ThreadSummary {
      id: id.to_string(),
      sender: format!("{id}@example.com"),
      subject: format!("subject {id}"),
      received_at: Utc::now(),
      unread: false,
      starred: false,
      has_attachment: false,
      status: status.to_string(),
      summary: None,
    }
  }

  fn ids(items: &[ThreadSummary]) -> Vec<&str> {
    items.iter().map(|i| i.id.as_str()).collect()
  }

  #[test]
  fn merge_dedups_and_preserves_order() {
    let p1 = vec![thread("a", "TODO"), thread("b", "TODO")];
    let p2 = vec![thread("b", "TODO"), thread("c", "TODO")];

    let merged = merge_linear([p1.as_slice(), p2.as_slice()]);
    assert_eq!(ids(&merged), vec!["a", "b", "c"]);
  }

  #[test]
  fn merge_is_idempotent_under_repeated_pages() {
    let p1 = vec![thread("a", "TODO"), thread("b", "TODO")];
    let p2 = vec![thread("b", "TODO"), thread("d", "DONE")];

    let once = merge_linear([p1.as_slice(), p2.as_slice()]);
    let again = merge_linear([p1.as_slice(), p2.as_slice(), p1.as_slice()]);
    assert_eq!(once, again);
  }

  #[test]
  fn board_merge_matches_three_page_example() {
    // {TODO:[A,B], DONE:[C]}, {TODO:[B,D]}, {DONE:[C,E]}
    // -> {TODO:[A,B,D], DONE:[C,E]}
    let p1 = vec![thread("a", "TODO"), thread("b", "TODO"), thread("c", "DONE")];
    let p2 = vec![thread("b", "TODO"), thread("d", "TODO")];
    let p3 = vec![thread("c", "DONE"), thread("e", "DONE")];

    let view = merge_board([p1.as_slice(), p2.as_slice(), p3.as_slice()]);

    assert_eq!(ids(&view.column("TODO").unwrap().items), vec!["a", "b", "d"]);
    assert_eq!(ids(&view.column("DONE").unwrap().items), vec!["c", "e"]);
    assert_eq!(view.total_items(), 5);
  }

  #[test]
  fn filters_compose() {
    let mut a = thread("a", "TODO");
    a.unread = true;
    a.has_attachment = true;
    let mut b = thread("b", "TODO");
    b.unread = true;
    let c = thread("c", "TODO");

    let items = vec![a, b, c];

    let unread = apply_view(
      &items,
      &ViewFilter {
        unread_only: true,
        ..Default::default()
      },
      None,
    );
    assert_eq!(ids(&unread), vec!["a", "b"]);

    let both = apply_view(
      &items,
      &ViewFilter {
        unread_only: true,
        has_attachment: true,
        ..Default::default()
      },
      None,
    );
    assert_eq!(ids(&both), vec!["a"]);
  }

  #[test]
  fn sender_filter_is_case_insensitive_substring() {
    let items = vec![thread("Alice", "TODO"), thread("bob", "TODO")];

    let filtered = apply_view(
      &items,
      &ViewFilter {
        sender: Some("ALICE".into()),
        ..Default::default()
      },
      None,
    );
    assert_eq!(ids(&filtered), vec!["Alice"]);
  }

  #[test]
  fn sort_by_received_at_is_stable_both_ways() {
    let base = Utc::now();
    let mut a = thread("a", "TODO");
    a.received_at = base;
    let mut b = thread("b", "TODO");
    b.received_at = base - Duration::hours(1);
    // Same timestamp as a: stable sort keeps c after a
    let mut c = thread("c", "TODO");
    c.received_at = base;

    let items = vec![a, b, c];

    let asc = apply_view(
      &items,
      &ViewFilter::default(),
      Some(ViewSort {
        field: SortField::ReceivedAt,
        direction: SortDirection::Ascending,
      }),
    );
    assert_eq!(ids(&asc), vec!["b", "a", "c"]);

    let desc = apply_view(
      &items,
      &ViewFilter::default(),
      Some(ViewSort {
        field: SortField::ReceivedAt,
        direction: SortDirection::Descending,
      }),
    );
    assert_eq!(ids(&desc), vec!["a", "c", "b"]);
  }

  #[test]
  fn next_page_gate() {
    let none = ViewFilter::default();
    let active = ViewFilter {
      unread_only: true,
      ..Default::default()
    };

    assert!(should_fetch_next(true, &none, 0));
    assert!(should_fetch_next(true, &none, 2));
    // Sentinel off screen
    assert!(!should_fetch_next(false, &none, 0));
    // Active filter suppresses fetching
    assert!(!should_fetch_next(true, &active, 0));
    // Three consecutive empty pages stop the loop
    assert!(!should_fetch_next(true, &none, 3));
  }
}
