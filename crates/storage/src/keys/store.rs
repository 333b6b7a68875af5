//! The versioned key store.
//!
//! Every identifier owns an append-only chain of versions. Each version is a
//! separate backend entry keyed `{prefix}{assertion_ref}/{version:020}`, so the
//! zero-padded version sorts lexicographically and the latest version is the
//! last entry of a prefix scan. Writes never touch an existing entry: a new
//! version is inserted with insert-if-absent, which makes the backend the
//! final arbiter of `(identifier, version)` uniqueness.
//!
//! # TTL bookkeeping
//!
//! | Previous version | New record | TTL |
//! |------------------|------------|-----|
//! | none | `PENDING` | `pending_ttl` |
//! | none | `VALID` / `REVOKED` | `activated_ttl` |
//! | `PENDING`, or TTL ≤ 0 | any | `activated_ttl` |
//! | otherwise | any | remaining lifetime of the previous version |
//!
//! A remaining lifetime that is no longer positive fails the write with
//! [`KeyStoreError::Decoding`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{
    assertion::AssertionRef,
    error::{KeyStoreError, KeyStoreResult},
    record::{PopKey, StoredPopKey},
};
use crate::{
    backend::{StorageBackend, prefix_end},
    config::KeyStoreConfig,
    error::{ConfigError, StorageError},
};

/// Versioned, TTL-governed persistence for key records.
#[async_trait]
pub trait PopKeyStore: Send + Sync {
    /// Writes version 0 of a new chain.
    ///
    /// # Errors
    ///
    /// - [`KeyStoreError::Conflict`] if any version exists for the identifier, including when a
    ///   concurrent writer wins the insert of version 0
    /// - [`KeyStoreError::Unavailable`] on transient backend failures
    async fn create(&self, key: PopKey) -> KeyStoreResult<StoredPopKey>;

    /// Appends a new version after whatever version is currently the latest.
    ///
    /// # Errors
    ///
    /// - [`KeyStoreError::VersionConflict`] if another writer appended the same version first
    /// - [`KeyStoreError::Decoding`] if the previous version is unreadable or its remaining TTL is
    ///   not positive
    /// - [`KeyStoreError::Unavailable`] on transient backend failures
    async fn upsert(&self, key: PopKey) -> KeyStoreResult<StoredPopKey>;

    /// Appends a new version only if the latest version is still `expected`
    /// (`None`: no version exists).
    ///
    /// # Errors
    ///
    /// As [`upsert`](Self::upsert); [`KeyStoreError::VersionConflict`] also
    /// when the latest version differs from `expected` before the write.
    async fn upsert_after(
        &self,
        key: PopKey,
        expected: Option<u64>,
    ) -> KeyStoreResult<StoredPopKey>;

    /// Returns the highest live version, or `None` if the chain is empty.
    ///
    /// # Errors
    ///
    /// - [`KeyStoreError::Decoding`] if the stored entry is malformed
    /// - [`KeyStoreError::Unavailable`] on transient backend failures
    async fn find_latest(&self, assertion_ref: &AssertionRef)
    -> KeyStoreResult<Option<StoredPopKey>>;

    /// In-place mutation of a version. Always fails: every change must be a
    /// new version.
    async fn update(&self, _key: PopKey) -> KeyStoreResult<StoredPopKey> {
        Err(KeyStoreError::Unsupported { operation: "update" })
    }

    /// Bulk TTL rewrite across a chain. Always fails for the same reason as
    /// [`update`](Self::update).
    async fn update_ttl_for_all_versions(
        &self,
        _assertion_ref: &AssertionRef,
        _ttl: Duration,
    ) -> KeyStoreResult<()> {
        Err(KeyStoreError::Unsupported { operation: "update_ttl_for_all_versions" })
    }
}

/// Computes the TTL, in seconds, of the version about to be written.
///
/// `now` is epoch seconds. See the module documentation for the rules.
///
/// # Errors
///
/// Returns [`KeyStoreError::Decoding`] when the previous version's remaining
/// lifetime is zero or negative.
pub fn next_ttl(
    previous: Option<&StoredPopKey>,
    next: &PopKey,
    now: i64,
    config: &KeyStoreConfig,
) -> KeyStoreResult<i64> {
    let Some(previous) = previous else {
        return Ok(if next.is_pending() {
            config.pending_ttl_secs()
        } else {
            config.activated_ttl_secs()
        });
    };

    if previous.key.is_pending() || previous.ttl <= 0 {
        return Ok(config.activated_ttl_secs());
    }

    let remaining = previous.expires_at_epoch().saturating_sub(now);
    if remaining <= 0 {
        return Err(KeyStoreError::decoding(format!(
            "version {} of {} has no remaining lifetime ({remaining}s)",
            previous.version,
            previous.key.assertion_ref()
        )));
    }
    Ok(remaining)
}

/// [`PopKeyStore`] over any [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct BackendPopKeyStore<B> {
    backend: B,
    config: KeyStoreConfig,
}

impl<B: StorageBackend> BackendPopKeyStore<B> {
    /// Creates a store over `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(backend: B, config: KeyStoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { backend, config })
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The store configuration.
    pub fn config(&self) -> &KeyStoreConfig {
        &self.config
    }

    fn chain_prefix(&self, assertion_ref: &AssertionRef) -> Vec<u8> {
        format!("{}{}/", self.config.key_prefix, assertion_ref).into_bytes()
    }

    /// Backend key of one version.
    #[must_use]
    pub fn version_key(&self, assertion_ref: &AssertionRef, version: u64) -> Vec<u8> {
        format!("{}{}/{version:020}", self.config.key_prefix, assertion_ref).into_bytes()
    }

    async fn write_version(
        &self,
        key: PopKey,
        previous: Option<&StoredPopKey>,
    ) -> KeyStoreResult<StoredPopKey> {
        let now = Utc::now().timestamp();
        let ttl = next_ttl(previous, &key, now, &self.config)?;
        let version = match previous {
            Some(previous) => previous.version.checked_add(1).ok_or_else(|| {
                KeyStoreError::decoding(format!("version overflow on {}", key.assertion_ref()))
            })?,
            None => 0,
        };

        let storage_key = self.version_key(key.assertion_ref(), version);
        let stored = StoredPopKey {
            key,
            version,
            ttl,
            created_at: now,
            etag: uuid::Uuid::new_v4().to_string(),
        };
        let value = serde_json::to_vec(&stored).map_err(|e| {
            StorageError::serialization_with_source("failed to encode key record", e)
        })?;
        let lifetime = Duration::from_secs(u64::try_from(ttl).unwrap_or_default());

        fail::fail_point!("key-store-write", |_| {
            Err(KeyStoreError::from(StorageError::unavailable("injected key store write failure")))
        });

        match self.backend.compare_and_set(&storage_key, None, value, Some(lifetime)).await {
            Ok(()) => {
                tracing::debug!(version, ttl, status = %stored.key.status(), "key version written");
                Ok(stored)
            },
            Err(StorageError::Conflict) => Err(KeyStoreError::VersionConflict {
                assertion_ref: stored.key.assertion_ref().to_string(),
                version,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<B: StorageBackend> PopKeyStore for BackendPopKeyStore<B> {
    #[tracing::instrument(skip(self, key), fields(assertion_ref = %key.assertion_ref(), status = %key.status()))]
    async fn create(&self, key: PopKey) -> KeyStoreResult<StoredPopKey> {
        let assertion_ref = key.assertion_ref().clone();
        if self.find_latest(&assertion_ref).await?.is_some() {
            return Err(KeyStoreError::Conflict { assertion_ref: assertion_ref.to_string() });
        }

        match self.write_version(key, None).await {
            Err(KeyStoreError::VersionConflict { assertion_ref, .. }) => {
                tracing::debug!("lost the race for version 0");
                Err(KeyStoreError::Conflict { assertion_ref })
            },
            result => result,
        }
    }

    #[tracing::instrument(skip(self, key), fields(assertion_ref = %key.assertion_ref(), status = %key.status()))]
    async fn upsert(&self, key: PopKey) -> KeyStoreResult<StoredPopKey> {
        let previous = self.find_latest(key.assertion_ref()).await?;
        self.write_version(key, previous.as_ref()).await
    }

    #[tracing::instrument(skip(self, key), fields(assertion_ref = %key.assertion_ref(), status = %key.status()))]
    async fn upsert_after(
        &self,
        key: PopKey,
        expected: Option<u64>,
    ) -> KeyStoreResult<StoredPopKey> {
        let previous = self.find_latest(key.assertion_ref()).await?;
        let latest = previous.as_ref().map(|p| p.version);
        if latest != expected {
            return Err(KeyStoreError::VersionConflict {
                assertion_ref: key.assertion_ref().to_string(),
                version: latest.unwrap_or_default(),
            });
        }
        self.write_version(key, previous.as_ref()).await
    }

    #[tracing::instrument(skip_all, fields(assertion_ref = %assertion_ref))]
    async fn find_latest(
        &self,
        assertion_ref: &AssertionRef,
    ) -> KeyStoreResult<Option<StoredPopKey>> {
        let start = self.chain_prefix(assertion_ref);
        let entries = match prefix_end(&start) {
            Some(end) => self.backend.get_range(start..end).await?,
            None => self.backend.get_range(start..).await?,
        };

        let Some(latest) = entries.last() else {
            return Ok(None);
        };

        let stored: StoredPopKey = serde_json::from_slice(&latest.value).map_err(|e| {
            tracing::warn!(error = %e, "stored key record is malformed");
            KeyStoreError::decoding(format!("malformed record for {assertion_ref}: {e}"))
        })?;

        if stored.key.assertion_ref() != assertion_ref
            || latest.key.as_ref() != self.version_key(assertion_ref, stored.version).as_slice()
        {
            return Err(KeyStoreError::decoding(format!(
                "record stored under {assertion_ref} does not match its key"
            )));
        }

        Ok(Some(stored))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        keys::{ActivatedPopKey, AssertionFileName, AssertionType, FiscalCode},
        memory::MemoryBackend,
    };

    fn assertion_ref() -> AssertionRef {
        AssertionRef::parse("sha256-LWmgzxnrIhywpNW0mctCFWfh2CptjGJJN_H2_FLN2fg").unwrap()
    }

    fn valid(assertion_ref: &AssertionRef) -> PopKey {
        let owner = FiscalCode::parse("RSSMRA85T10A562S").unwrap();
        PopKey::Valid(
            ActivatedPopKey::builder()
                .assertion_file_name(AssertionFileName::new(&owner, assertion_ref))
                .assertion_ref(assertion_ref.clone())
                .pub_key("pk")
                .login_fiscal_code(owner)
                .assertion_type(AssertionType::Saml)
                .expired_at(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
                .build(),
        )
    }

    fn stored(key: PopKey, version: u64, ttl: i64, created_at: i64) -> StoredPopKey {
        StoredPopKey { key, version, ttl, created_at, etag: String::new() }
    }

    fn store() -> BackendPopKeyStore<MemoryBackend> {
        BackendPopKeyStore::new(MemoryBackend::new(), KeyStoreConfig::default()).unwrap()
    }

    #[test]
    fn test_next_ttl_fresh_chain() {
        let config = KeyStoreConfig::default();
        let r = assertion_ref();
        assert_eq!(next_ttl(None, &PopKey::pending(r.clone(), "pk"), 0, &config).unwrap(), 900);
        assert_eq!(next_ttl(None, &valid(&r), 0, &config).unwrap(), 63_072_000);
    }

    #[test]
    fn test_next_ttl_after_pending_grants_long_ttl() {
        let config = KeyStoreConfig::default();
        let r = assertion_ref();
        let prev = stored(PopKey::pending(r.clone(), "pk"), 0, 900, 1_000);
        assert_eq!(next_ttl(Some(&prev), &valid(&r), 1_500, &config).unwrap(), 63_072_000);
    }

    #[test]
    fn test_next_ttl_non_positive_previous_ttl_is_fresh_grant() {
        let config = KeyStoreConfig::default();
        let r = assertion_ref();
        for ttl in [0, -1, i64::MIN] {
            let prev = stored(valid(&r), 1, ttl, 1_000);
            assert_eq!(next_ttl(Some(&prev), &valid(&r), 1_500, &config).unwrap(), 63_072_000);
        }
    }

    #[test]
    fn test_next_ttl_preserves_expiry_instant() {
        let config = KeyStoreConfig::default();
        let r = assertion_ref();
        let prev = stored(valid(&r), 1, 1_000, 10_000);
        let ttl = next_ttl(Some(&prev), &valid(&r), 10_400, &config).unwrap();
        assert_eq!(ttl, 600);
        assert_eq!(10_400 + ttl, prev.expires_at_epoch());
    }

    #[test]
    fn test_next_ttl_exhausted_lifetime_fails() {
        let config = KeyStoreConfig::default();
        let r = assertion_ref();
        let prev = stored(valid(&r), 1, 1_000, 10_000);
        for now in [11_000, 11_001, 20_000] {
            let result = next_ttl(Some(&prev), &valid(&r), now, &config);
            assert!(matches!(result, Err(KeyStoreError::Decoding { .. })));
        }
    }

    #[tokio::test]
    async fn test_create_then_find_latest() {
        let store = store();
        let r = assertion_ref();

        let created = store.create(PopKey::pending(r.clone(), "pk")).await.unwrap();
        assert_eq!(created.version, 0);
        assert_eq!(created.ttl, 900);

        let latest = store.find_latest(&r).await.unwrap().unwrap();
        assert_eq!(latest, created);
    }

    #[tokio::test]
    async fn test_find_latest_on_empty_chain() {
        assert!(store().find_latest(&assertion_ref()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_conflicts_on_existing_chain() {
        let store = store();
        let r = assertion_ref();

        store.create(PopKey::pending(r.clone(), "pk")).await.unwrap();
        let result = store.create(PopKey::pending(r.clone(), "pk")).await;
        assert!(matches!(result, Err(KeyStoreError::Conflict { .. })));

        let latest = store.find_latest(&r).await.unwrap().unwrap();
        assert_eq!(latest.version, 0);
    }

    #[tokio::test]
    async fn test_upsert_appends_version() {
        let store = store();
        let r = assertion_ref();

        store.create(PopKey::pending(r.clone(), "pk")).await.unwrap();
        let activated = store.upsert(valid(&r)).await.unwrap();
        assert_eq!(activated.version, 1);
        assert_eq!(activated.ttl, 63_072_000);

        let revoked = store.upsert(valid(&r).revoked().unwrap()).await.unwrap();
        assert_eq!(revoked.version, 2);
        assert!(revoked.ttl <= activated.ttl);
        assert!(revoked.ttl >= activated.ttl - 5);

        let latest = store.find_latest(&r).await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.key.status(), crate::keys::KeyStatus::Revoked);
    }

    #[tokio::test]
    async fn test_upsert_without_previous_starts_at_zero() {
        let store = store();
        let r = assertion_ref();

        let first = store.upsert(valid(&r)).await.unwrap();
        assert_eq!(first.version, 0);
        assert_eq!(first.ttl, 63_072_000);
    }

    #[tokio::test]
    async fn test_upsert_after_rejects_stale_expectation() {
        let store = store();
        let r = assertion_ref();

        store.create(PopKey::pending(r.clone(), "pk")).await.unwrap();
        store.upsert_after(valid(&r), Some(0)).await.unwrap();

        let result = store.upsert_after(valid(&r), Some(0)).await;
        assert!(matches!(result, Err(KeyStoreError::VersionConflict { version: 1, .. })));
        assert_eq!(store.find_latest(&r).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_upsert_over_backdated_version_keeps_expiry() {
        let store = store();
        let r = assertion_ref();
        let now = Utc::now().timestamp();

        let backdated = stored(valid(&r), 1, 3_600, now - 600);
        store
            .backend()
            .set_with_ttl(
                store.version_key(&r, 1),
                serde_json::to_vec(&backdated).unwrap(),
                Duration::from_secs(3_000),
            )
            .await
            .unwrap();

        let next = store.upsert(valid(&r).revoked().unwrap()).await.unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(next.expires_at_epoch(), backdated.expires_at_epoch());
    }

    #[tokio::test]
    async fn test_upsert_over_exhausted_version_fails() {
        let store = store();
        let r = assertion_ref();
        let now = Utc::now().timestamp();

        // Record TTL says expired; backend entry still alive.
        let exhausted = stored(valid(&r), 1, 60, now - 120);
        store
            .backend()
            .set_with_ttl(
                store.version_key(&r, 1),
                serde_json::to_vec(&exhausted).unwrap(),
                Duration::from_secs(3_600),
            )
            .await
            .unwrap();

        let result = store.upsert(valid(&r).revoked().unwrap()).await;
        assert!(matches!(result, Err(KeyStoreError::Decoding { .. })));
        assert_eq!(store.find_latest(&r).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_find_latest_rejects_malformed_record() {
        let store = store();
        let r = assertion_ref();

        store
            .backend()
            .set_with_ttl(store.version_key(&r, 0), b"{not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let result = store.find_latest(&r).await;
        assert!(matches!(result, Err(KeyStoreError::Decoding { .. })));
    }

    #[tokio::test]
    async fn test_find_latest_rejects_misfiled_record() {
        let store = store();
        let r = assertion_ref();
        let other = AssertionRef::parse("sha512-other").unwrap();

        let misfiled = stored(PopKey::pending(other, "pk"), 0, 900, Utc::now().timestamp());
        store
            .backend()
            .set_with_ttl(
                store.version_key(&r, 0),
                serde_json::to_vec(&misfiled).unwrap(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert!(matches!(store.find_latest(&r).await, Err(KeyStoreError::Decoding { .. })));
    }

    #[tokio::test]
    async fn test_chains_do_not_bleed_into_each_other() {
        let store = store();
        let short = AssertionRef::parse("sha256-abc").unwrap();
        let long = AssertionRef::parse("sha256-abcd").unwrap();

        store.create(PopKey::pending(long.clone(), "pk")).await.unwrap();
        assert!(store.find_latest(&short).await.unwrap().is_none());
        store.create(PopKey::pending(short.clone(), "pk")).await.unwrap();
    }

    #[tokio::test]
    async fn test_in_place_mutations_are_unsupported() {
        let store = store();
        let r = assertion_ref();

        assert!(matches!(
            store.update(valid(&r)).await,
            Err(KeyStoreError::Unsupported { operation: "update" })
        ));
        assert!(matches!(
            store.update_ttl_for_all_versions(&r, Duration::from_secs(1)).await,
            Err(KeyStoreError::Unsupported { operation: "update_ttl_for_all_versions" })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_create_single_winner() {
        let store = std::sync::Arc::new(store());
        let r = assertion_ref();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            let r = r.clone();
            handles.push(tokio::spawn(async move {
                store.create(PopKey::pending(r, "pk")).await
            }));
        }

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(KeyStoreError::Conflict { .. }) => {},
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(created, 1);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// An upsert at `T + d` keeps the expiry instant `T + S` of a
            /// version granted at `T` with TTL `S`, for every `0 <= d < S`.
            #[test]
            fn ttl_preserved_across_upsert(
                created_at in 0i64..4_000_000_000,
                ttl in 1i64..100_000_000,
                offset in 0.0f64..1.0,
            ) {
                let config = KeyStoreConfig::default();
                let r = assertion_ref();
                #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
                let d = ((ttl as f64) * offset) as i64;
                let d = d.min(ttl - 1);

                let prev = stored(valid(&r), 1, ttl, created_at);
                let now = created_at + d;
                let next = next_ttl(Some(&prev), &valid(&r).revoked().unwrap(), now, &config).unwrap();

                prop_assert!(next > 0);
                prop_assert_eq!(now + next, created_at + ttl);
            }

            /// Repeated upserts raise the version by exactly one each time.
            #[test]
            fn version_increases_by_one(writes in 1usize..12) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("runtime");

                rt.block_on(async {
                    let store = store();
                    let r = assertion_ref();
                    store.create(PopKey::pending(r.clone(), "pk")).await.unwrap();

                    let mut last = 0;
                    for _ in 0..writes {
                        let next = store.upsert(valid(&r)).await.unwrap();
                        prop_assert_eq!(next.version, last + 1);
                        last = next.version;
                    }
                    prop_assert_eq!(store.find_latest(&r).await.unwrap().unwrap().version, last);
                    Ok(())
                })?;
            }
        }
    }
}
