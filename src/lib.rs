//! Client-side data synchronization core for a Gmail-backed mail client.
//!
//! The UI in front of this crate shows a linear inbox and a kanban board;
//! everything it displays flows through the pieces here:
//!
//! - [`cache`]: persistent namespaced cache store with freshness policy
//! - [`sync`]: stale-while-revalidate fetching, optimistic mutations with
//!   snapshot/rollback, page reconciliation, and invalidation coordination
//! - [`mail`]: the remote backend boundary and the cached client facade
//! - [`query`]: poll-based async binding consumed by the UI layer

pub mod cache;
pub mod config;
pub mod error;
pub mod mail;
pub mod query;
pub mod sync;

pub use error::{SyncError, SyncResult};
pub use mail::cached_client::CachedMailClient;
