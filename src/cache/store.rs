//! Cache storage trait, SQLite implementation, and the shared handle.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::error::{SyncError, SyncResult};

use super::policy::Namespace;

/// A stored cache entry: opaque JSON payload plus its write timestamp.
///
/// Entries are replaced wholesale on every write; there are no partial
/// updates at the storage level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
  pub key: String,
  pub payload: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

/// A decoded cache hit.
#[derive(Debug, Clone)]
pub struct Cached<T> {
  pub value: T,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
pub trait CacheStore: Send + Sync {
  /// Get a single entry by namespace and key.
  fn get(&self, namespace: Namespace, key: &str) -> SyncResult<Option<RawEntry>>;

  /// Insert or replace an entry, keeping the entry's own `cached_at`.
  fn put(&self, namespace: Namespace, entry: &RawEntry) -> SyncResult<()>;

  /// Remove a single entry. Removing a missing entry is not an error.
  fn delete(&self, namespace: Namespace, key: &str) -> SyncResult<()>;

  /// Remove every entry in a namespace.
  fn clear(&self, namespace: Namespace) -> SyncResult<()>;

  /// All entries in a namespace, ordered by key. Diagnostics only.
  fn get_all(&self, namespace: Namespace) -> SyncResult<Vec<RawEntry>>;
}

/// Storage implementation that doesn't cache anything.
/// Used when the durable backend is unavailable - all operations are no-ops.
pub struct NoopStore;

impl CacheStore for NoopStore {
  fn get(&self, _namespace: Namespace, _key: &str) -> SyncResult<Option<RawEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _namespace: Namespace, _entry: &RawEntry) -> SyncResult<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _namespace: Namespace, _key: &str) -> SyncResult<()> {
    Ok(())
  }

  fn clear(&self, _namespace: Namespace) -> SyncResult<()> {
    Ok(())
  }

  fn get_all(&self, _namespace: Namespace) -> SyncResult<Vec<RawEntry>> {
    Ok(Vec::new())
  }
}

/// SQLite-based cache storage.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    payload BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, entry_key)
);
"#;

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> SyncResult<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open the store at an explicit path.
  pub fn open_at(path: &Path) -> SyncResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::CacheUnavailable(format!("create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      SyncError::CacheUnavailable(format!("open cache database at {}: {}", path.display(), e))
    })?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| SyncError::CacheUnavailable(format!("run cache migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Default database path under the platform data directory.
  fn default_path() -> SyncResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| SyncError::CacheUnavailable("could not determine data directory".into()))?;

    Ok(data_dir.join("mailboard").join("cache.db"))
  }

  fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::CacheUnavailable(format!("lock poisoned: {}", e)))
  }
}

impl CacheStore for SqliteStore {
  fn get(&self, namespace: Namespace, key: &str) -> SyncResult<Option<RawEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT payload, cached_at FROM cache_entries WHERE namespace = ? AND entry_key = ?")
      .map_err(|e| SyncError::CacheUnavailable(format!("prepare get: {}", e)))?;

    let row: Option<(Vec<u8>, String)> = stmt
      .query_row(params![namespace.as_str(), key], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })
      .ok();

    match row {
      Some((payload, cached_at)) => Ok(Some(RawEntry {
        key: key.to_string(),
        payload,
        cached_at: parse_datetime(&cached_at)?,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, namespace: Namespace, entry: &RawEntry) -> SyncResult<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (namespace, entry_key, payload, cached_at)
         VALUES (?, ?, ?, ?)",
        params![
          namespace.as_str(),
          entry.key,
          entry.payload,
          entry.cached_at.to_rfc3339()
        ],
      )
      .map_err(|e| SyncError::CacheUnavailable(format!("store entry: {}", e)))?;

    Ok(())
  }

  fn delete(&self, namespace: Namespace, key: &str) -> SyncResult<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE namespace = ? AND entry_key = ?",
        params![namespace.as_str(), key],
      )
      .map_err(|e| SyncError::CacheUnavailable(format!("delete entry: {}", e)))?;

    Ok(())
  }

  fn clear(&self, namespace: Namespace) -> SyncResult<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE namespace = ?",
        params![namespace.as_str()],
      )
      .map_err(|e| SyncError::CacheUnavailable(format!("clear namespace: {}", e)))?;

    Ok(())
  }

  fn get_all(&self, namespace: Namespace) -> SyncResult<Vec<RawEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT entry_key, payload, cached_at FROM cache_entries
         WHERE namespace = ? ORDER BY entry_key",
      )
      .map_err(|e| SyncError::CacheUnavailable(format!("prepare get_all: {}", e)))?;

    let rows: Vec<(String, Vec<u8>, String)> = stmt
      .query_map(params![namespace.as_str()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| SyncError::CacheUnavailable(format!("query get_all: {}", e)))?
      .filter_map(|r| r.ok())
      .collect();

    let mut entries = Vec::with_capacity(rows.len());
    for (key, payload, cached_at) in rows {
      entries.push(RawEntry {
        key,
        payload,
        cached_at: parse_datetime(&cached_at)?,
      });
    }

    Ok(entries)
  }
}

/// Parse an RFC 3339 timestamp written by `put`.
fn parse_datetime(s: &str) -> SyncResult<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| SyncError::CacheUnavailable(format!("parse cached_at '{}': {}", s, e)))
}

/// Shared store handle injected into the orchestrator, mutation engine,
/// and invalidation coordinator.
///
/// Every operation is best-effort: storage errors are logged and
/// swallowed, so cache trouble degrades reads to misses and writes to
/// no-ops instead of failing the caller.
#[derive(Clone)]
pub struct CacheHandle {
  store: Arc<dyn CacheStore>,
}

impl CacheHandle {
  pub fn new(store: Arc<dyn CacheStore>) -> Self {
    Self { store }
  }

  /// Open the durable store, falling back to the no-op store when the
  /// backend is unavailable.
  pub fn open(path_override: Option<&Path>) -> Self {
    let opened = match path_override {
      Some(p) => SqliteStore::open_at(p),
      None => SqliteStore::open(),
    };

    match opened {
      Ok(store) => Self::new(Arc::new(store)),
      Err(e) => {
        warn!("cache backend unavailable, running without persistence: {e}");
        Self::noop()
      }
    }
  }

  pub fn noop() -> Self {
    Self::new(Arc::new(NoopStore))
  }

  /// Typed read. Decode failures count as misses.
  pub fn get<T: DeserializeOwned>(&self, namespace: Namespace, key: &str) -> Option<Cached<T>> {
    let raw = self.get_raw(namespace, key)?;
    match serde_json::from_slice(&raw.payload) {
      Ok(value) => Some(Cached {
        value,
        cached_at: raw.cached_at,
      }),
      Err(e) => {
        warn!("discarding undecodable cache entry {namespace}/{key}: {e}");
        None
      }
    }
  }

  pub fn get_raw(&self, namespace: Namespace, key: &str) -> Option<RawEntry> {
    match self.store.get(namespace, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!("cache read failed for {namespace}/{key}: {e}");
        None
      }
    }
  }

  /// Typed write stamped with the current time.
  pub fn set<T: Serialize>(&self, namespace: Namespace, key: &str, value: &T) {
    let payload = match serde_json::to_vec(value) {
      Ok(p) => p,
      Err(e) => {
        warn!("cache encode failed for {namespace}/{key}: {e}");
        return;
      }
    };
    self.put_raw(
      namespace,
      RawEntry {
        key: key.to_string(),
        payload,
        cached_at: Utc::now(),
      },
    );
  }

  /// Raw write preserving the entry's own `cached_at`. Used to restore
  /// snapshots verbatim and to patch entries without refreshing them.
  pub fn put_raw(&self, namespace: Namespace, entry: RawEntry) {
    if let Err(e) = self.store.put(namespace, &entry) {
      warn!("cache write failed for {namespace}/{}: {e}", entry.key);
    }
  }

  pub fn delete(&self, namespace: Namespace, key: &str) {
    if let Err(e) = self.store.delete(namespace, key) {
      warn!("cache delete failed for {namespace}/{key}: {e}");
    }
  }

  pub fn clear(&self, namespace: Namespace) {
    if let Err(e) = self.store.clear(namespace) {
      warn!("cache clear failed for {namespace}: {e}");
    }
  }

  /// Full wipe across namespaces (session teardown).
  pub fn clear_all(&self) {
    for namespace in Namespace::ALL {
      self.clear(namespace);
    }
  }

  /// Every entry of a namespace, decoded; undecodable entries skipped.
  pub fn get_all<T: DeserializeOwned>(&self, namespace: Namespace) -> Vec<(String, Cached<T>)> {
    self
      .get_all_raw(namespace)
      .into_iter()
      .filter_map(|raw| {
        let value = serde_json::from_slice(&raw.payload).ok()?;
        Some((
          raw.key.clone(),
          Cached {
            value,
            cached_at: raw.cached_at,
          },
        ))
      })
      .collect()
  }

  pub fn get_all_raw(&self, namespace: Namespace) -> Vec<RawEntry> {
    match self.store.get_all(namespace) {
      Ok(entries) => entries,
      Err(e) => {
        warn!("cache scan failed for {namespace}: {e}");
        Vec::new()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Probe {
    id: String,
    n: u32,
  }

  fn sqlite_handle(dir: &tempfile::TempDir) -> CacheHandle {
    let store = SqliteStore::open_at(&dir.path().join("cache.db")).unwrap();
    CacheHandle::new(Arc::new(store))
  }

  #[test]
  fn set_then_get_returns_value() {
    let dir = tempfile::tempdir().unwrap();
    let cache = sqlite_handle(&dir);

    let v = Probe {
      id: "t1".into(),
      n: 7,
    };
    cache.set(Namespace::Details, "t1", &v);

    let hit = cache.get::<Probe>(Namespace::Details, "t1").unwrap();
    assert_eq!(hit.value, v);
  }

  #[test]
  fn namespaces_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let cache = sqlite_handle(&dir);

    cache.set(Namespace::Details, "k", &1u32);
    cache.set(Namespace::Lists, "k", &2u32);

    assert_eq!(cache.get::<u32>(Namespace::Details, "k").unwrap().value, 1);
    assert_eq!(cache.get::<u32>(Namespace::Lists, "k").unwrap().value, 2);

    cache.clear(Namespace::Lists);
    assert!(cache.get::<u32>(Namespace::Lists, "k").is_none());
    assert!(cache.get::<u32>(Namespace::Details, "k").is_some());
  }

  #[test]
  fn delete_removes_single_entry() {
    let dir = tempfile::tempdir().unwrap();
    let cache = sqlite_handle(&dir);

    cache.set(Namespace::Summaries, "a", &1u32);
    cache.set(Namespace::Summaries, "b", &2u32);
    cache.delete(Namespace::Summaries, "a");

    assert!(cache.get::<u32>(Namespace::Summaries, "a").is_none());
    assert!(cache.get::<u32>(Namespace::Summaries, "b").is_some());
  }

  #[test]
  fn put_raw_preserves_cached_at() {
    let dir = tempfile::tempdir().unwrap();
    let cache = sqlite_handle(&dir);

    let stamp = Utc::now() - chrono::Duration::minutes(10);
    cache.put_raw(
      Namespace::Lists,
      RawEntry {
        key: "inbox:first".into(),
        payload: serde_json::to_vec(&42u32).unwrap(),
        cached_at: stamp,
      },
    );

    let hit = cache.get::<u32>(Namespace::Lists, "inbox:first").unwrap();
    assert_eq!(hit.value, 42);
    assert_eq!(hit.cached_at, stamp);
  }

  #[test]
  fn get_all_lists_namespace_contents() {
    let dir = tempfile::tempdir().unwrap();
    let cache = sqlite_handle(&dir);

    cache.set(Namespace::Lists, "inbox:first", &1u32);
    cache.set(Namespace::Lists, "inbox:tok2", &2u32);
    cache.set(Namespace::Details, "t1", &3u32);

    let all = cache.get_all::<u32>(Namespace::Lists);
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].0, "inbox:first");
    assert_eq!(all[1].0, "inbox:tok2");
  }

  #[test]
  fn clear_all_wipes_every_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let cache = sqlite_handle(&dir);

    cache.set(Namespace::Details, "a", &1u32);
    cache.set(Namespace::Lists, "b", &2u32);
    cache.set(Namespace::Summaries, "c", &3u32);

    cache.clear_all();

    for ns in Namespace::ALL {
      assert!(cache.get_all_raw(ns).is_empty());
    }
  }

  #[test]
  fn noop_store_always_misses() {
    let cache = CacheHandle::noop();
    cache.set(Namespace::Details, "t1", &1u32);
    assert!(cache.get::<u32>(Namespace::Details, "t1").is_none());
    assert!(cache.get_all_raw(Namespace::Details).is_empty());
  }

  #[test]
  fn undecodable_entry_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let cache = sqlite_handle(&dir);

    cache.put_raw(
      Namespace::Details,
      RawEntry {
        key: "broken".into(),
        payload: b"not json".to_vec(),
        cached_at: Utc::now(),
      },
    );

    assert!(cache.get::<Probe>(Namespace::Details, "broken").is_none());
  }

  struct FailingStore;

  impl CacheStore for FailingStore {
    fn get(&self, _: Namespace, _: &str) -> SyncResult<Option<RawEntry>> {
      Err(SyncError::CacheUnavailable("backend blocked".into()))
    }
    fn put(&self, _: Namespace, _: &RawEntry) -> SyncResult<()> {
      Err(SyncError::CacheUnavailable("backend blocked".into()))
    }
    fn delete(&self, _: Namespace, _: &str) -> SyncResult<()> {
      Err(SyncError::CacheUnavailable("backend blocked".into()))
    }
    fn clear(&self, _: Namespace) -> SyncResult<()> {
      Err(SyncError::CacheUnavailable("backend blocked".into()))
    }
    fn get_all(&self, _: Namespace) -> SyncResult<Vec<RawEntry>> {
      Err(SyncError::CacheUnavailable("backend blocked".into()))
    }
  }

  #[test]
  fn handle_swallows_backend_failures() {
    let cache = CacheHandle::new(Arc::new(FailingStore));

    // None of these may panic or propagate
    cache.set(Namespace::Details, "t1", &1u32);
    assert!(cache.get::<u32>(Namespace::Details, "t1").is_none());
    cache.delete(Namespace::Details, "t1");
    cache.clear_all();
    assert!(cache.get_all_raw(Namespace::Lists).is_empty());
  }
}
