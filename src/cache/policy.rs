//! Pure cache policy: namespaces, TTLs, freshness, key derivation.
//!
//! Nothing in this module performs I/O.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;

/// Logical cache partitions. Each namespace has exactly one TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
  /// Single thread records (detail views)
  Details,
  /// Paginated list pages, keyed by scope + request cursor
  Lists,
  /// Per-scope aggregates (unread counts, totals)
  Summaries,
}

impl Namespace {
  pub const ALL: [Namespace; 3] = [Namespace::Details, Namespace::Lists, Namespace::Summaries];

  /// Storage partition name.
  pub fn as_str(&self) -> &'static str {
    match self {
      Namespace::Details => "details",
      Namespace::Lists => "lists",
      Namespace::Summaries => "summaries",
    }
  }
}

impl std::fmt::Display for Namespace {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Per-namespace freshness windows.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
  detail: Duration,
  list: Duration,
  summary: Duration,
}

impl TtlPolicy {
  pub fn from_config(cfg: &CacheConfig) -> Self {
    Self {
      detail: Duration::seconds(cfg.detail_ttl_secs as i64),
      list: Duration::seconds(cfg.list_ttl_secs as i64),
      summary: Duration::seconds(cfg.summary_ttl_secs as i64),
    }
  }

  pub fn ttl(&self, namespace: Namespace) -> Duration {
    match namespace {
      Namespace::Details => self.detail,
      Namespace::Lists => self.list,
      Namespace::Summaries => self.summary,
    }
  }
}

impl Default for TtlPolicy {
  fn default() -> Self {
    Self::from_config(&CacheConfig::default())
  }
}

/// A cached value is fresh strictly inside its TTL window.
pub fn is_fresh(cached_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
  now - cached_at < ttl
}

/// Derive the cache key for a paginated read.
///
/// The key is always the *request* cursor, never the cursor the response
/// carries. The first page of a scope therefore has a stable key.
pub fn derive_key(scope_key: &str, cursor: Option<&str>) -> String {
  format!("{}:{}", scope_key, cursor.unwrap_or("first"))
}

/// Stable fixed-length storage key for arbitrary query text.
///
/// Search scopes embed user-typed queries; normalizing and hashing keeps
/// storage keys bounded and case-insensitive.
pub fn hash_query(text: &str) -> String {
  let normalized = text.trim().to_lowercase();
  let mut hasher = Sha256::new();
  hasher.update(normalized.as_bytes());
  hex::encode(hasher.finalize())
}

/// Recover the scope portion of a page key produced by [`derive_key`].
///
/// Cursor tokens are opaque and may contain ':', so this walks the known
/// scope-key shapes instead of splitting on the separator: `inbox`,
/// `board`, or `search:` followed by a 64-hex digest.
pub fn page_scope_key(page_key: &str) -> Option<&str> {
  for prefix in ["inbox", "board"] {
    if let Some(rest) = page_key.strip_prefix(prefix) {
      if rest.starts_with(':') && rest.len() > 1 {
        return Some(&page_key[..prefix.len()]);
      }
    }
  }

  if let Some(rest) = page_key.strip_prefix("search:") {
    let digest_len = 64;
    if rest.len() > digest_len + 1 && rest.as_bytes()[digest_len] == b':' {
      return Some(&page_key[.."search:".len() + digest_len]);
    }
  }

  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fresh_strictly_inside_ttl_window() {
    let t0 = Utc::now();
    let ttl = Duration::milliseconds(5000);

    assert!(is_fresh(t0, ttl, t0));
    assert!(is_fresh(t0, ttl, t0 + Duration::milliseconds(4999)));
    assert!(!is_fresh(t0, ttl, t0 + Duration::milliseconds(5000)));
    assert!(!is_fresh(t0, ttl, t0 + Duration::milliseconds(5001)));
  }

  #[test]
  fn derive_key_uses_request_cursor() {
    assert_eq!(derive_key("inbox", None), "inbox:first");
    assert_eq!(derive_key("inbox", Some("tok42")), "inbox:tok42");
  }

  #[test]
  fn hash_query_normalizes_case_and_whitespace() {
    assert_eq!(hash_query("from:alice  "), hash_query("FROM:Alice"));
    assert_ne!(hash_query("from:alice"), hash_query("from:bob"));
    // Fixed length regardless of input size
    assert_eq!(hash_query("x").len(), 64);
    assert_eq!(hash_query(&"y".repeat(10_000)).len(), 64);
  }

  #[test]
  fn page_scope_key_recovers_known_scopes() {
    assert_eq!(page_scope_key("inbox:first"), Some("inbox"));
    assert_eq!(page_scope_key("board:tok:with:colons"), Some("board"));

    let search_scope = format!("search:{}", hash_query("from alice"));
    let page_key = derive_key(&search_scope, Some("tok2"));
    assert_eq!(page_scope_key(&page_key), Some(search_scope.as_str()));

    assert_eq!(page_scope_key("inbox"), None);
    assert_eq!(page_scope_key("outbox:first"), None);
    assert_eq!(page_scope_key("search:short:first"), None);
  }

  #[test]
  fn ttl_policy_reads_config() {
    let cfg = CacheConfig {
      detail_ttl_secs: 10,
      list_ttl_secs: 20,
      summary_ttl_secs: 30,
      path: None,
    };
    let policy = TtlPolicy::from_config(&cfg);
    assert_eq!(policy.ttl(Namespace::Details), Duration::seconds(10));
    assert_eq!(policy.ttl(Namespace::Lists), Duration::seconds(20));
    assert_eq!(policy.ttl(Namespace::Summaries), Duration::seconds(30));
  }
}
