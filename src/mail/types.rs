//! Domain types for threads, scopes, and pages.
//!
//! These are the shapes the cache persists and the UI consumes. Wire
//! shapes live in `api_types` and convert into these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::hash_query;

/// Board column for threads the backend has not categorized yet. A
/// thread belongs to exactly one status at a time.
pub const DEFAULT_STATUS: &str = "TODO";

/// Summary of a thread for list and board views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
  pub id: String,
  pub sender: String,
  pub subject: String,
  pub received_at: DateTime<Utc>,
  pub unread: bool,
  pub starred: bool,
  pub has_attachment: bool,
  /// Board column
  pub status: String,
  /// AI-generated summary, if one has been produced
  pub summary: Option<String>,
}

/// Full thread details for the reading pane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadDetail {
  pub id: String,
  pub sender: String,
  pub subject: String,
  pub received_at: DateTime<Utc>,
  pub unread: bool,
  pub starred: bool,
  pub status: String,
  pub summary: Option<String>,
  pub labels: Vec<String>,
  pub body: String,
  pub updated_at: Option<DateTime<Utc>>,
}

/// One fetched page of a scope's thread list.
///
/// `next_cursor` is the token to request the *following* page with; it is
/// never part of this page's cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
  pub items: Vec<ThreadSummary>,
  pub next_cursor: Option<String>,
  pub has_more: bool,
}

/// Per-scope aggregate record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeSummary {
  pub scope_key: String,
  pub total: u64,
  pub unread: u64,
}

/// A mailbox partition the UI can open.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
  /// Linear inbox list
  Inbox,
  /// Kanban board (status-partitioned)
  Board,
  /// Semantic/full-text search results
  Search { query: String },
}

impl Scope {
  /// Stable storage key. Search text is normalized and hashed so keys
  /// stay bounded and case-insensitive.
  pub fn storage_key(&self) -> String {
    match self {
      Scope::Inbox => "inbox".to_string(),
      Scope::Board => "board".to_string(),
      Scope::Search { query } => format!("search:{}", hash_query(query)),
    }
  }

  /// Value sent to the backend's `scope` query parameter.
  pub fn request_value(&self) -> String {
    match self {
      Scope::Inbox => "INBOX".to_string(),
      Scope::Board => "BOARD".to_string(),
      Scope::Search { query } => query.clone(),
    }
  }
}

impl std::str::FromStr for Scope {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "inbox" => Ok(Scope::Inbox),
      "board" => Ok(Scope::Board),
      other => match other.strip_prefix("search:") {
        Some(query) if !query.trim().is_empty() => Ok(Scope::Search {
          query: query.to_string(),
        }),
        _ => Err(format!(
          "unknown scope '{}' (expected inbox, board, or search:<query>)",
          other
        )),
      },
    }
  }
}

/// The mutation vocabulary: what a user can do to a thread.
///
/// Doubles as the action payload the backend's modify endpoint accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
  MarkRead,
  MarkUnread,
  Star,
  Unstar,
  Delete,
  MoveColumn { from: String, to: String },
  Summarize { text: String },
}

impl MutationKind {
  /// Action name on the wire.
  pub fn action(&self) -> &'static str {
    match self {
      MutationKind::MarkRead => "markRead",
      MutationKind::MarkUnread => "markUnread",
      MutationKind::Star => "star",
      MutationKind::Unstar => "unstar",
      MutationKind::Delete => "delete",
      MutationKind::MoveColumn { .. } => "moveColumn",
      MutationKind::Summarize { .. } => "summarize",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::str::FromStr;

  #[test]
  fn scope_parsing() {
    assert_eq!(Scope::from_str("inbox").unwrap(), Scope::Inbox);
    assert_eq!(Scope::from_str("board").unwrap(), Scope::Board);
    assert_eq!(
      Scope::from_str("search:from alice").unwrap(),
      Scope::Search {
        query: "from alice".into()
      }
    );
    assert!(Scope::from_str("outbox").is_err());
    assert!(Scope::from_str("search:   ").is_err());
  }

  #[test]
  fn search_scopes_share_storage_key_case_insensitively() {
    let a = Scope::Search {
      query: "From Alice".into(),
    };
    let b = Scope::Search {
      query: "from alice".into(),
    };
    assert_eq!(a.storage_key(), b.storage_key());
    assert_ne!(a.storage_key(), Scope::Inbox.storage_key());
  }
}
