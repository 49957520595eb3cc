//! Persistent namespaced cache with freshness policy.
//!
//! This module provides the storage half of the sync core:
//! - Entries live in one of three namespaces (thread details, paginated
//!   list pages, per-scope summaries), each with its own TTL
//! - Freshness is a pure function of `cached_at` against the TTL
//! - Storage is durable (SQLite) with a no-op fallback when the backend
//!   cannot be opened; storage trouble is never fatal to a caller

mod policy;
mod store;

pub use policy::{derive_key, hash_query, is_fresh, page_scope_key, Namespace, TtlPolicy};
pub use store::{Cached, CacheHandle, CacheStore, NoopStore, RawEntry, SqliteStore};
