//! Failure taxonomy of the versioned key store.

use thiserror::Error;

use crate::error::StorageError;

/// Result type alias for key store operations.
pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

/// Errors surfaced by [`PopKeyStore`](super::PopKeyStore).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyStoreError {
    /// `create` found an existing version chain for the identifier.
    #[error("a record already exists for {assertion_ref}")]
    Conflict {
        /// The identifier that is already taken.
        assertion_ref: String,
    },

    /// A new version was based on a version that is no longer the latest.
    #[error("version {version} of {assertion_ref} was written concurrently")]
    VersionConflict {
        /// The identifier being written.
        assertion_ref: String,
        /// The version that was already present.
        version: u64,
    },

    /// Stored data could not be decoded, or a computed TTL was not positive.
    #[error("decoding error: {message}")]
    Decoding {
        /// Description of the failure.
        message: String,
    },

    /// The backend is unreachable or throttling; the call may be retried.
    #[error("key store unavailable")]
    Unavailable {
        /// The underlying storage error.
        #[source]
        source: StorageError,
    },

    /// The operation is not part of the store contract.
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// Any other backend failure.
    #[error("key store error")]
    Storage {
        /// The underlying storage error.
        #[source]
        source: StorageError,
    },
}

impl KeyStoreError {
    /// Creates a new `Decoding` error.
    #[must_use]
    pub fn decoding(message: impl Into<String>) -> Self {
        Self::Decoding { message: message.into() }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<StorageError> for KeyStoreError {
    fn from(source: StorageError) -> Self {
        if source.is_transient() {
            Self::Unavailable { source }
        } else {
            match source {
                StorageError::Serialization { message, .. } => Self::Decoding { message },
                source => Self::Storage { source },
            }
        }
    }
}
