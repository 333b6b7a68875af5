//! The [`StorageBackend`] trait.
//!
//! Any document store with per-key TTL and an insert-if-absent write can back
//! the key and blob stores: keys and values are opaque bytes, uniqueness is
//! enforced by the backend, and version chains are read with ordered prefix
//! scans (see [`prefix_end`]).

use std::{ops::RangeBounds, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Byte-level key-value store with per-key expiry.
///
/// The key store reads version chains with [`get_range`](Self::get_range) and
/// appends versions with insert-if-absent [`compare_and_set`](Self::compare_and_set);
/// the blob store uses the same primitive for write-once assertions.
///
/// ```
/// use std::time::Duration;
/// use bytes::Bytes;
/// use lollipop_storage::{StorageBackend, MemoryBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
/// backend.set_with_ttl(b"probe".to_vec(), b"1".to_vec(), Duration::from_secs(60)).await.unwrap();
/// assert_eq!(backend.get(b"probe").await.unwrap(), Some(Bytes::from("1")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// The live value at `key`, or `None` if absent or expired.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Unconditionally writes `value` at `key`, expiring after `ttl`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()>;

    /// Writes `new_value` at `key` only if the live value equals `expected`.
    ///
    /// `expected: None` means the key must be absent or expired (insert-if-absent).
    /// `ttl: None` stores the value without expiry.
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`](crate::StorageError::Conflict) when the live
    /// value differs from `expected`.
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> StorageResult<()>;

    /// Removes `key`. Removing an absent key succeeds.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Live entries whose keys fall in `range`, in ascending key order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Succeeds when the backend can serve calls.
    #[must_use = "health check results indicate backend availability and must be inspected"]
    async fn health_check(&self) -> StorageResult<()>;
}

/// An entry returned by [`StorageBackend::get_range`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Full storage key, prefix included.
    pub key: Bytes,
    /// Stored bytes.
    pub value: Bytes,
}

impl KeyValue {
    /// Pairs `key` with `value`.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// Returns the exclusive upper bound for a prefix scan over `prefix`.
///
/// Increments the last byte that is not `0xFF` and truncates after it, so
/// that `prefix..prefix_end(prefix)` covers every key starting with `prefix`.
/// Returns `None` when no such bound exists (empty or all-`0xFF` prefix).
#[must_use]
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
