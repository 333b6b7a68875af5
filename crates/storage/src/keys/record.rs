//! The proof-of-possession key record and its stored envelope.
//!
//! [`PopKey`] is a tagged variant: a `PENDING` record only carries the
//! identifier and the public key, while `VALID` and `REVOKED` records always
//! carry the full activation payload ([`ActivatedPopKey`]). The shapes are
//! enforced by the type, not by optional fields.
//!
//! On the wire the status is the `status` discriminant of a flat JSON object:
//!
//! ```json
//! {
//!   "status": "VALID",
//!   "assertionRef": "sha256-…",
//!   "pubKey": "eyJrdHkiOi…",
//!   "loginFiscalCode": "RSSMRA85T10A562S",
//!   "assertionType": "SAML",
//!   "assertionFileName": "RSSMRA85T10A562S-sha256-…",
//!   "expiredAt": "2026-01-01T00:00:00Z",
//!   "version": 1,
//!   "ttl": 63072000,
//!   "createdAt": 1767225600,
//!   "etag": "…"
//! }
//! ```

use std::fmt;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::assertion::{AssertionFileName, AssertionRef, AssertionType, FiscalCode};

/// Lifecycle status of a key record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyStatus {
    /// Reserved, not yet bound to an owner.
    Pending,
    /// Bound to an owner and usable.
    Valid,
    /// Terminal.
    Revoked,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Valid => "VALID",
            Self::Revoked => "REVOKED",
        })
    }
}

/// A reserved key that has not been activated yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPopKey {
    /// Identifier of the key under one algorithm.
    pub assertion_ref: AssertionRef,
    /// Base64url-encoded JWK of the public key.
    pub pub_key: String,
}

/// Activation payload shared by `VALID` and `REVOKED` records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct ActivatedPopKey {
    /// Identifier of the key under one algorithm.
    pub assertion_ref: AssertionRef,
    /// Base64url-encoded JWK of the public key.
    #[builder(into)]
    pub pub_key: String,
    /// Owner the key is bound to.
    pub login_fiscal_code: FiscalCode,
    /// Kind of the assertion presented at activation.
    pub assertion_type: AssertionType,
    /// Where the raw assertion is stored.
    pub assertion_file_name: AssertionFileName,
    /// Business expiry, independent of the storage TTL.
    pub expired_at: DateTime<Utc>,
}

/// A key record as seen by the lifecycle engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum PopKey {
    /// See [`KeyStatus::Pending`].
    Pending(PendingPopKey),
    /// See [`KeyStatus::Valid`].
    Valid(ActivatedPopKey),
    /// See [`KeyStatus::Revoked`].
    Revoked(ActivatedPopKey),
}

impl PopKey {
    /// Creates a `PENDING` record.
    #[must_use]
    pub fn pending(assertion_ref: AssertionRef, pub_key: impl Into<String>) -> Self {
        Self::Pending(PendingPopKey { assertion_ref, pub_key: pub_key.into() })
    }

    /// The status discriminant.
    #[must_use]
    pub fn status(&self) -> KeyStatus {
        match self {
            Self::Pending(_) => KeyStatus::Pending,
            Self::Valid(_) => KeyStatus::Valid,
            Self::Revoked(_) => KeyStatus::Revoked,
        }
    }

    /// The identifier this record is stored under.
    #[must_use]
    pub fn assertion_ref(&self) -> &AssertionRef {
        match self {
            Self::Pending(key) => &key.assertion_ref,
            Self::Valid(key) | Self::Revoked(key) => &key.assertion_ref,
        }
    }

    /// The encoded public key.
    #[must_use]
    pub fn pub_key(&self) -> &str {
        match self {
            Self::Pending(key) => &key.pub_key,
            Self::Valid(key) | Self::Revoked(key) => &key.pub_key,
        }
    }

    /// The activation payload, if the record has left `PENDING`.
    #[must_use]
    pub fn activation(&self) -> Option<&ActivatedPopKey> {
        match self {
            Self::Pending(_) => None,
            Self::Valid(key) | Self::Revoked(key) => Some(key),
        }
    }

    /// Whether the record is still `PENDING`.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The `REVOKED` form of this record with every other field unchanged.
    ///
    /// Returns `None` for a `PENDING` record, which has no activation payload
    /// to carry into the terminal state.
    #[must_use]
    pub fn revoked(&self) -> Option<Self> {
        self.activation().cloned().map(Self::Revoked)
    }

    /// The same record re-addressed to another identifier of the same key.
    #[must_use]
    pub fn with_assertion_ref(&self, assertion_ref: AssertionRef) -> Self {
        match self {
            Self::Pending(key) => Self::pending(assertion_ref, key.pub_key.clone()),
            Self::Valid(key) => Self::Valid(ActivatedPopKey { assertion_ref, ..key.clone() }),
            Self::Revoked(key) => Self::Revoked(ActivatedPopKey { assertion_ref, ..key.clone() }),
        }
    }
}

/// A [`PopKey`] with the metadata the store assigns to every version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPopKey {
    /// The record itself.
    #[serde(flatten)]
    pub key: PopKey,
    /// Position in the per-identifier version chain, starting at 0.
    pub version: u64,
    /// Storage lifetime in seconds, counted from `created_at`.
    pub ttl: i64,
    /// Write time, epoch seconds.
    pub created_at: i64,
    /// Opaque per-version tag.
    pub etag: String,
}

impl StoredPopKey {
    /// Epoch second at which this version expires from the store.
    #[must_use]
    pub fn expires_at_epoch(&self) -> i64 {
        self.created_at.saturating_add(self.ttl)
    }
}
