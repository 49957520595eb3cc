//! Error taxonomy for the sync core.
//!
//! Propagation policy: cache-layer errors are logged and swallowed by the
//! store handle (best effort only); mutation failures roll back and surface
//! as a transient message; read failures with no cache fallback propagate.

use thiserror::Error;

/// Errors produced by the sync core.
#[derive(Debug, Error)]
pub enum SyncError {
  /// The persistent cache backend is missing, blocked, or failed a
  /// statement. Never fatal: callers degrade to network-only operation.
  #[error("cache unavailable: {0}")]
  CacheUnavailable(String),

  /// A remote call failed at the transport level. Timeouts are the
  /// transport's concern and surface here like any other failure.
  #[error("network request failed: {0}")]
  Network(#[from] reqwest::Error),

  /// The backend answered with a non-ok envelope status.
  #[error("backend rejected request: {status}")]
  Api { status: String },

  /// A cached or remote payload failed to decode. On cache reads this is
  /// treated as a miss.
  #[error("payload decode failed: {0}")]
  Decode(#[from] serde_json::Error),

  /// The client was constructed from unusable settings (bad base URL).
  #[error("invalid configuration: {0}")]
  Config(String),
}

impl SyncError {
  /// True for failures of the remote boundary (transport or envelope).
  pub fn is_network(&self) -> bool {
    matches!(self, SyncError::Network(_) | SyncError::Api { .. })
  }
}

/// Message surfaced to the UI when an optimistic mutation fails. The
/// rollback already restored local state; the user just needs to retry.
pub const TRANSIENT_MUTATION_MESSAGE: &str = "Could not save your change. Please try again.";

pub type SyncResult<T> = Result<T, SyncError>;
