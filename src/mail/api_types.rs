//! Serde-deserializable types matching the backend API responses.
//!
//! These types are separate from domain types to allow clean
//! deserialization while keeping domain types focused on what the cache
//! and UI need.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::{ListPage, ScopeSummary, ThreadDetail, ThreadSummary, DEFAULT_STATUS};

/// Response envelope common to every endpoint.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
  pub status: String,
  pub data: T,
  #[serde(default)]
  pub meta: ApiMeta,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiMeta {
  #[serde(rename = "nextPageToken")]
  pub next_page_token: Option<String>,
  #[serde(rename = "hasMore", default)]
  pub has_more: bool,
}

// ============================================================================
// Thread payloads
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiAddress {
  #[serde(rename = "displayName")]
  pub display_name: Option<String>,
  pub email: String,
}

impl ApiAddress {
  fn into_sender(self) -> String {
    self.display_name.unwrap_or(self.email)
  }
}

/// Thread fields shared by list and detail endpoints.
#[derive(Debug, Deserialize)]
pub struct ApiThread {
  pub id: String,
  pub from: ApiAddress,
  #[serde(default)]
  pub subject: String,
  #[serde(rename = "receivedAt")]
  pub received_at: DateTime<Utc>,
  #[serde(default)]
  pub unread: bool,
  #[serde(default)]
  pub starred: bool,
  #[serde(rename = "hasAttachment", default)]
  pub has_attachment: bool,
  /// Board column; threads never seen by the board land in the default
  pub status: Option<String>,
  #[serde(rename = "aiSummary")]
  pub summary: Option<String>,
}

impl ApiThread {
  pub fn into_summary(self) -> ThreadSummary {
    ThreadSummary {
      id: self.id,
      sender: self.from.into_sender(),
      subject: self.subject,
      received_at: self.received_at,
      unread: self.unread,
      starred: self.starred,
      has_attachment: self.has_attachment,
      status: self.status.unwrap_or_else(|| DEFAULT_STATUS.to_string()),
      summary: self.summary,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiThreadDetail {
  #[serde(flatten)]
  pub thread: ApiThread,
  #[serde(default)]
  pub labels: Vec<String>,
  #[serde(default)]
  pub body: String,
  #[serde(rename = "updatedAt")]
  pub updated_at: Option<DateTime<Utc>>,
}

impl ApiThreadDetail {
  pub fn into_detail(self) -> ThreadDetail {
    let summary = self.thread.into_summary();
    ThreadDetail {
      id: summary.id,
      sender: summary.sender,
      subject: summary.subject,
      received_at: summary.received_at,
      unread: summary.unread,
      starred: summary.starred,
      status: summary.status,
      summary: summary.summary,
      labels: self.labels,
      body: self.body,
      updated_at: self.updated_at,
    }
  }
}

// ============================================================================
// Aggregates
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiScopeSummary {
  pub total: u64,
  #[serde(rename = "unreadCount")]
  pub unread: u64,
}

impl ApiScopeSummary {
  pub fn into_summary(self, scope_key: String) -> ScopeSummary {
    ScopeSummary {
      scope_key,
      total: self.total,
      unread: self.unread,
    }
  }
}

/// Assemble a domain page from an envelope's data + meta.
pub fn into_page(threads: Vec<ApiThread>, meta: ApiMeta) -> ListPage {
  ListPage {
    items: threads.into_iter().map(ApiThread::into_summary).collect(),
    next_cursor: meta.next_page_token,
    has_more: meta.has_more,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn envelope_and_thread_decode() {
    let body = r#"{
      "status": "ok",
      "data": [{
        "id": "t1",
        "from": {"displayName": "Alice", "email": "alice@example.com"},
        "subject": "hello",
        "receivedAt": "2026-08-01T10:00:00Z",
        "unread": true,
        "hasAttachment": true,
        "status": "TODO"
      }],
      "meta": {"nextPageToken": "tok2", "hasMore": true}
    }"#;

    let env: ApiEnvelope<Vec<ApiThread>> = serde_json::from_str(body).unwrap();
    assert_eq!(env.status, "ok");

    let page = into_page(env.data, env.meta);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].sender, "Alice");
    assert!(page.items[0].unread);
    assert!(!page.items[0].starred);
    assert_eq!(page.next_cursor.as_deref(), Some("tok2"));
    assert!(page.has_more);
  }

  #[test]
  fn sender_falls_back_to_email() {
    let body = r#"{
      "id": "t2",
      "from": {"email": "bob@example.com"},
      "receivedAt": "2026-08-01T10:00:00Z"
    }"#;

    let thread: ApiThread = serde_json::from_str(body).unwrap();
    let summary = thread.into_summary();
    assert_eq!(summary.sender, "bob@example.com");
    assert_eq!(summary.status, DEFAULT_STATUS);
  }

  #[test]
  fn detail_decodes_with_flattened_thread_fields() {
    let body = r#"{
      "id": "t3",
      "from": {"email": "carol@example.com"},
      "subject": "quarterly numbers",
      "receivedAt": "2026-08-02T09:30:00Z",
      "unread": false,
      "labels": ["finance"],
      "body": "see attached",
      "updatedAt": "2026-08-02T11:00:00Z"
    }"#;

    let detail: ApiThreadDetail = serde_json::from_str(body).unwrap();
    let detail = detail.into_detail();
    assert_eq!(detail.id, "t3");
    assert_eq!(detail.labels, vec!["finance"]);
    assert_eq!(detail.body, "see attached");
    assert!(detail.updated_at.is_some());
  }
}
