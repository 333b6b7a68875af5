//! Shared test utilities for key store and blob store testing.
//!
//! Feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! lollipop-storage = { path = "../storage", features = ["testutil"] }
//! ```

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    blob::{AssertionBlobStore, BackendBlobStore, BlobError},
    config::KeyStoreConfig,
    error::StorageError,
    keys::{
        ActivatedPopKey, AssertionFileName, AssertionRef, AssertionType, BackendPopKeyStore,
        FiscalCode, KeyStoreError, KeyStoreResult, PopKey, PopKeyStore, StoredPopKey,
    },
    memory::MemoryBackend,
};

/// A syntactically valid fiscal code for tests.
pub const TEST_FISCAL_CODE: &str = "RSSMRA85T10A562S";

/// Parses [`TEST_FISCAL_CODE`].
#[must_use]
pub fn test_fiscal_code() -> FiscalCode {
    FiscalCode::parse(TEST_FISCAL_CODE).expect("valid test fiscal code")
}

/// A deterministic identifier, distinct per `idx`.
#[must_use]
pub fn make_assertion_ref(idx: usize) -> AssertionRef {
    AssertionRef::parse(format!("sha256-test{idx:06}")).expect("valid test identifier")
}

/// A `VALID` record for `assertion_ref`, owned by [`TEST_FISCAL_CODE`].
#[must_use]
pub fn valid_key(assertion_ref: &AssertionRef, pub_key: &str, expired_at: DateTime<Utc>) -> PopKey {
    let owner = test_fiscal_code();
    PopKey::Valid(
        ActivatedPopKey::builder()
            .assertion_file_name(AssertionFileName::new(&owner, assertion_ref))
            .assertion_ref(assertion_ref.clone())
            .pub_key(pub_key)
            .login_fiscal_code(owner)
            .assertion_type(AssertionType::Saml)
            .expired_at(expired_at)
            .build(),
    )
}

/// A key store and a blob store sharing one in-memory backend.
pub fn memory_stores() -> (BackendPopKeyStore<MemoryBackend>, BackendBlobStore<MemoryBackend>) {
    let backend = MemoryBackend::new();
    let keys = BackendPopKeyStore::new(backend.clone(), KeyStoreConfig::default())
        .expect("default config is valid");
    (keys, BackendBlobStore::new(backend))
}

/// Assert that a result is an error matching the given pattern.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use lollipop_storage::{assert_err, keys::KeyStoreError};
///
/// let result: Result<(), KeyStoreError> = Err(KeyStoreError::decoding("bad"));
/// assert_err!(result, KeyStoreError::Decoding { .. });
/// ```
#[macro_export]
macro_rules! assert_err {
    ($result:expr, $pattern:pat) => {
        match $result {
            Err($pattern) => {},
            other => panic!("expected Err({}), got: {:?}", stringify!($pattern), other),
        }
    };
}

/// Assert that a result is a [`KeyStoreError::Conflict`].
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        $crate::assert_err!($result, $crate::keys::KeyStoreError::Conflict { .. })
    };
}

/// Unwrap an `Ok`, panicking with the error's debug form otherwise.
#[macro_export]
macro_rules! assert_store_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got: {e:?}"),
        }
    };
}

fn injected() -> StorageError {
    StorageError::unavailable("injected failure")
}

/// [`PopKeyStore`] wrapper that fails chosen writes and counts calls.
///
/// Failures are injected as transient [`KeyStoreError::Unavailable`] errors,
/// and failed writes leave the inner store untouched.
#[derive(Clone)]
pub struct FailingKeyStore {
    inner: Arc<dyn PopKeyStore>,
    failing_upserts: Arc<Mutex<HashSet<AssertionRef>>>,
    failing_reads: Arc<Mutex<HashSet<AssertionRef>>>,
    latency: Arc<Mutex<Option<Duration>>>,
    upserts: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl FailingKeyStore {
    /// Wraps `inner`; no failures are armed.
    pub fn new(inner: Arc<dyn PopKeyStore>) -> Self {
        Self {
            inner,
            failing_upserts: Arc::default(),
            failing_reads: Arc::default(),
            latency: Arc::default(),
            upserts: Arc::default(),
            reads: Arc::default(),
        }
    }

    /// Every write of a new version of `assertion_ref` fails.
    pub fn fail_upserts_for(&self, assertion_ref: &AssertionRef) {
        self.failing_upserts.lock().insert(assertion_ref.clone());
    }

    /// Every `find_latest` of `assertion_ref` fails.
    pub fn fail_reads_for(&self, assertion_ref: &AssertionRef) {
        self.failing_reads.lock().insert(assertion_ref.clone());
    }

    /// Disarms all failures.
    pub fn heal(&self) {
        self.failing_upserts.lock().clear();
        self.failing_reads.lock().clear();
        *self.latency.lock() = None;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Number of `upsert`/`upsert_after` calls seen, failed or not.
    #[must_use]
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Number of `find_latest` calls seen, failed or not.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_upsert(&self, key: &PopKey) -> KeyStoreResult<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.failing_upserts.lock().contains(key.assertion_ref()) {
            return Err(injected().into());
        }
        Ok(())
    }
}

#[async_trait]
impl PopKeyStore for FailingKeyStore {
    async fn create(&self, key: PopKey) -> KeyStoreResult<StoredPopKey> {
        self.delay().await;
        if self.failing_upserts.lock().contains(key.assertion_ref()) {
            return Err(injected().into());
        }
        self.inner.create(key).await
    }

    async fn upsert(&self, key: PopKey) -> KeyStoreResult<StoredPopKey> {
        self.delay().await;
        self.check_upsert(&key)?;
        self.inner.upsert(key).await
    }

    async fn upsert_after(
        &self,
        key: PopKey,
        expected: Option<u64>,
    ) -> KeyStoreResult<StoredPopKey> {
        self.delay().await;
        self.check_upsert(&key)?;
        self.inner.upsert_after(key, expected).await
    }

    async fn find_latest(
        &self,
        assertion_ref: &AssertionRef,
    ) -> KeyStoreResult<Option<StoredPopKey>> {
        self.delay().await;
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_reads.lock().contains(assertion_ref) {
            return Err(KeyStoreError::from(injected()));
        }
        self.inner.find_latest(assertion_ref).await
    }
}

/// [`AssertionBlobStore`] wrapper whose writes can be made to fail.
#[derive(Clone)]
pub struct FailingBlobStore {
    inner: Arc<dyn AssertionBlobStore>,
    fail_writes: Arc<Mutex<bool>>,
    writes: Arc<AtomicUsize>,
}

impl FailingBlobStore {
    /// Wraps `inner`; writes succeed until [`fail_writes`](Self::fail_writes).
    pub fn new(inner: Arc<dyn AssertionBlobStore>) -> Self {
        Self { inner, fail_writes: Arc::default(), writes: Arc::default() }
    }

    /// Makes every following write fail (or succeed again with `false`).
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    /// Number of write attempts seen.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssertionBlobStore for FailingBlobStore {
    async fn exists(&self, name: &AssertionFileName) -> Result<bool, BlobError> {
        self.inner.exists(name).await
    }

    async fn write(&self, name: &AssertionFileName, content: Bytes) -> Result<(), BlobError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if *self.fail_writes.lock() {
            return Err(BlobError::from(injected()));
        }
        self.inner.write(name, content).await
    }

    async fn read(&self, name: &AssertionFileName) -> Result<Option<Bytes>, BlobError> {
        self.inner.read(name).await
    }
}
