//! In-memory storage backend.
//!
//! [`MemoryBackend`] keeps every entry, together with its optional expiry, in
//! one ordered map behind a single lock. Version chains are therefore read in
//! key order, and insert-if-absent is decided and applied atomically.
//!
//! Expired entries are invisible to reads as soon as their deadline passes; a
//! background task drops them from the map once per second.
//!
//! ```
//! use std::time::Duration;
//! use lollipop_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend
//!         .compare_and_set(b"lollipop-keys/sha256-abc/0", None, b"{}".to_vec(), Some(Duration::from_secs(900)))
//!         .await
//!         .unwrap();
//!     assert!(backend.get(b"lollipop-keys/sha256-abc/0").await.unwrap().is_some());
//! }
//! ```
//!
//! Data is not persisted.

use std::{
    collections::BTreeMap,
    ops::{Bound, RangeBounds},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::{
    backend::{KeyValue, StorageBackend},
    error::{StorageError, StorageResult},
};

const PURGE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self { value: Bytes::from(value), expires_at: ttl.map(|ttl| Instant::now() + ttl) }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

type Entries = BTreeMap<Vec<u8>, Entry>;

/// Stops the purge task when the last backend clone goes away.
struct PurgeHandle {
    stop: watch::Sender<bool>,
}

impl Drop for PurgeHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

/// In-memory [`StorageBackend`] for tests and local development.
///
/// Clones share the same entries. The purge task ends when every clone is
/// dropped, or earlier through [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct MemoryBackend {
    entries: Arc<RwLock<Entries>>,
    purge: Arc<PurgeHandle>,
}

impl MemoryBackend {
    /// Creates an empty backend and spawns its purge task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let (stop, stopped) = watch::channel(false);
        let entries = Arc::new(RwLock::new(Entries::new()));
        tokio::spawn(purge_expired(Arc::downgrade(&entries), stopped));
        Self { entries, purge: Arc::new(PurgeHandle { stop }) }
    }

    /// Stops the purge task. Expired entries stay invisible to reads.
    pub fn shutdown(&self) {
        let _ = self.purge.stop.send(true);
    }

    /// Remaining lifetime of a live key, or `None` if it has no TTL or is absent.
    #[must_use]
    pub fn remaining_ttl(&self, key: &[u8]) -> Option<Duration> {
        let entries = self.entries.read();
        entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .and_then(|deadline| deadline.checked_duration_since(Instant::now()))
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().values().filter(|entry| entry.is_live(now)).count()
    }

    /// Whether the backend holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

async fn purge_expired(entries: std::sync::Weak<RwLock<Entries>>, mut stopped: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(PURGE_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = stopped.changed() => return,
        }
        let Some(entries) = entries.upgrade() else { return };
        let now = Instant::now();
        let mut entries = entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            tracing::trace!(purged, "expired entries purged");
        }
    }
}

fn as_slice_bound(bound: Bound<&Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(b) => Bound::Included(b.as_slice()),
        Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries.get(key).filter(|entry| entry.is_live(now)).map(|entry| entry.value.clone()))
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        self.entries.write().insert(key, Entry::new(value, Some(ttl)));
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let current = entries.get(key).filter(|entry| entry.is_live(now)).map(|e| &e.value[..]);
        if current != expected {
            return Err(StorageError::Conflict);
        }
        entries.insert(key.to_vec(), Entry::new(new_value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        let bounds = (as_slice_bound(range.start_bound()), as_slice_bound(range.end_bound()));
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .range::<[u8], _>(bounds)
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, entry)| KeyValue::new(Bytes::copy_from_slice(key), entry.value.clone()))
            .collect())
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
