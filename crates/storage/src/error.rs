//! Errors raised by [`StorageBackend`](crate::StorageBackend) implementations.
//!
//! Backends map their native failures onto [`StorageError`]; the key store
//! and the blob store then translate it into [`KeyStoreError`](crate::KeyStoreError)
//! and [`BlobError`](crate::BlobError). Only [`StorageError::Unavailable`] and
//! [`StorageError::Timeout`] are worth retrying.
//!
//! ```
//! use lollipop_storage::{StorageError, StorageResult};
//!
//! fn connect(endpoint: &str) -> StorageResult<()> {
//!     Err(StorageError::unavailable(format!("{endpoint} refused the connection")))
//! }
//!
//! assert!(connect("db:443").unwrap_err().is_transient());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// Shared, cloneable error source.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result of a backend call.
pub type StorageResult<T> = Result<T, StorageError>;

/// A failed backend call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A conditional write found a different current value.
    ///
    /// Insert-if-absent writes return this when the key exists; it is how
    /// `(identifier, version)` uniqueness is enforced.
    #[error("conditional write conflict")]
    Conflict,

    /// The backend could not be reached or refused the call.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What failed.
        message: String,
        /// Native backend error.
        #[source]
        source: Option<BoxError>,
    },

    /// A stored value could not be encoded or decoded.
    #[error("serialization failed: {message}")]
    Serialization {
        /// What failed.
        message: String,
        /// Encoder or decoder error.
        #[source]
        source: Option<BoxError>,
    },

    /// Any other backend failure.
    #[error("storage failure: {message}")]
    Internal {
        /// What failed.
        message: String,
        /// Native backend error.
        #[source]
        source: Option<BoxError>,
    },

    /// The backend did not answer in time.
    #[error("storage operation timed out")]
    Timeout,
}

impl StorageError {
    /// An [`Unavailable`](Self::Unavailable) error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    /// An [`Unavailable`](Self::Unavailable) error caused by `source`.
    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// A [`Serialization`](Self::Serialization) error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// A [`Serialization`](Self::Serialization) error caused by `source`.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// An [`Internal`](Self::Internal) error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// A lost conditional write is not transient: the caller must re-read.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout)
    }
}

/// Errors raised when validating configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric or duration field is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// Smallest accepted value.
        min: String,
        /// The value that was supplied.
        value: String,
    },

    /// A field holds a value that cannot be used.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
