//! Write-once store for raw activation assertions.
//!
//! Assertions are addressed by their [`AssertionFileName`]. A name can be
//! written exactly once; a second write fails with [`BlobError::AlreadyExists`]
//! whatever its content, and the caller decides whether the existing content
//! makes the write redundant.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::{
    backend::StorageBackend,
    error::StorageError,
    keys::AssertionFileName,
};

/// Key namespace of stored assertions.
pub const ASSERTION_PREFIX: &str = "assertions/";

/// Errors surfaced by [`AssertionBlobStore`].
///
/// Messages never contain the file name, which embeds the owner identity.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlobError {
    /// A blob is already stored under the name.
    #[error("assertion blob already exists")]
    AlreadyExists,

    /// The backend is unreachable or throttling; the call may be retried.
    #[error("assertion blob store unavailable")]
    Unavailable {
        /// The underlying storage error.
        #[source]
        source: StorageError,
    },

    /// Any other backend failure.
    #[error("assertion blob store error")]
    Storage {
        /// The underlying storage error.
        #[source]
        source: StorageError,
    },
}

impl BlobError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<StorageError> for BlobError {
    fn from(source: StorageError) -> Self {
        match source {
            StorageError::Conflict => Self::AlreadyExists,
            source if source.is_transient() => Self::Unavailable { source },
            source => Self::Storage { source },
        }
    }
}

/// Content store for raw assertions, keyed by file name.
#[async_trait]
pub trait AssertionBlobStore: Send + Sync {
    /// Whether a blob is stored under `name`.
    async fn exists(&self, name: &AssertionFileName) -> Result<bool, BlobError>;

    /// Stores `content` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::AlreadyExists`] if the name is taken.
    async fn write(&self, name: &AssertionFileName, content: Bytes) -> Result<(), BlobError>;

    /// Reads the blob stored under `name`.
    async fn read(&self, name: &AssertionFileName) -> Result<Option<Bytes>, BlobError>;
}

/// [`AssertionBlobStore`] over any [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct BackendBlobStore<B> {
    backend: B,
    retention: Option<Duration>,
}

impl<B: StorageBackend> BackendBlobStore<B> {
    /// Creates a store that keeps blobs until the backend removes them.
    pub fn new(backend: B) -> Self {
        Self { backend, retention: None }
    }

    /// Expires every blob `retention` after it was written.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    fn blob_key(name: &AssertionFileName) -> Vec<u8> {
        format!("{ASSERTION_PREFIX}{}", name.expose()).into_bytes()
    }
}

#[async_trait]
impl<B: StorageBackend> AssertionBlobStore for BackendBlobStore<B> {
    #[tracing::instrument(skip_all, fields(assertion_ref = name.assertion_ref()))]
    async fn exists(&self, name: &AssertionFileName) -> Result<bool, BlobError> {
        Ok(self.backend.get(&Self::blob_key(name)).await?.is_some())
    }

    #[tracing::instrument(skip_all, fields(assertion_ref = name.assertion_ref(), size = content.len()))]
    async fn write(&self, name: &AssertionFileName, content: Bytes) -> Result<(), BlobError> {
        self.backend
            .compare_and_set(&Self::blob_key(name), None, content.to_vec(), self.retention)
            .await?;
        tracing::debug!("assertion stored");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(assertion_ref = name.assertion_ref()))]
    async fn read(&self, name: &AssertionFileName) -> Result<Option<Bytes>, BlobError> {
        Ok(self.backend.get(&Self::blob_key(name)).await?)
    }
}
