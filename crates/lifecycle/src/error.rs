//! Lifecycle error taxonomy.
//!
//! Every engine operation returns a [`LifecycleError`] for expected business
//! failures. The variants tell the caller what to do next:
//!
//! | Variant | Caller action |
//! |---------|---------------|
//! | [`Validation`](LifecycleError::Validation) | fix the input |
//! | [`AlreadyReserved`](LifecycleError::AlreadyReserved) | report a conflict |
//! | [`Forbidden`](LifecycleError::Forbidden) | report an authorization failure, never retry |
//! | [`NotFound`](LifecycleError::NotFound) | report a missing key |
//! | [`Transient`](LifecycleError::Transient) | retry with backoff |
//! | [`Permanent`](LifecycleError::Permanent) / [`Internal`](LifecycleError::Internal) | alert |
//!
//! Messages carry assertion references only, never an owner fiscal code.

use std::sync::Arc;

use lollipop_authn::AuthError;
use lollipop_storage::{BlobError, BoxError, KeyStoreError};
use thiserror::Error;

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Errors surfaced by [`LifecycleEngine`](crate::LifecycleEngine).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    /// Malformed input.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// A reservation found an existing record for one of the key's identifiers.
    #[error("key {assertion_ref} is already reserved")]
    AlreadyReserved {
        /// The identifier that was taken.
        assertion_ref: String,
    },

    /// The key's state does not allow the operation.
    #[error("forbidden: {reason}")]
    Forbidden {
        /// Which precondition failed.
        reason: String,
    },

    /// No record exists for the identifier.
    #[error("no key record for {assertion_ref}")]
    NotFound {
        /// The identifier looked up.
        assertion_ref: String,
    },

    /// A collaborator was unavailable or timed out; the call may be retried.
    #[error("transient failure during {operation}")]
    Transient {
        /// The step that failed.
        operation: &'static str,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Stored data is corrupt or violates an invariant; retrying will not help.
    #[error("permanent failure: {message}")]
    Permanent {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// An unexpected collaborator failure.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },
}

impl LifecycleError {
    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden { reason: reason.into() }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(assertion_ref: impl ToString) -> Self {
        Self::NotFound { assertion_ref: assertion_ref.to_string() }
    }

    /// Creates a new `Transient` error without a source.
    #[must_use]
    pub fn transient(operation: &'static str) -> Self {
        Self::Transient { operation, source: None }
    }

    /// Creates a new `Permanent` error without a source.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error without a source.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Maps a key store failure during `operation`.
    pub(crate) fn from_store(operation: &'static str, err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::Conflict { assertion_ref } => Self::AlreadyReserved { assertion_ref },
            err if err.is_transient() => Self::Transient { operation, source: Some(Arc::new(err)) },
            err @ KeyStoreError::VersionConflict { .. } => {
                Self::Transient { operation, source: Some(Arc::new(err)) }
            },
            err @ KeyStoreError::Decoding { .. } => Self::Permanent {
                message: format!("{operation}: stored key record is unusable"),
                source: Some(Arc::new(err)),
            },
            err => Self::Internal {
                message: format!("{operation}: key store failure"),
                source: Some(Arc::new(err)),
            },
        }
    }

    /// Maps a blob store failure during `operation`.
    pub(crate) fn from_blob(operation: &'static str, err: BlobError) -> Self {
        if err.is_transient() {
            Self::Transient { operation, source: Some(Arc::new(err)) }
        } else {
            Self::Internal {
                message: format!("{operation}: assertion store failure"),
                source: Some(Arc::new(err)),
            }
        }
    }

    /// Maps a failure to derive identifiers from a stored or supplied key.
    pub(crate) fn from_identity(err: AuthError) -> Self {
        match err {
            AuthError::InvalidKey(message) => Self::validation(message),
            err => Self::Permanent {
                message: "key identity could not be derived".into(),
                source: Some(Arc::new(err)),
            },
        }
    }
}
