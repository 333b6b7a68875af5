//! Configuration for the versioned key store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Storage lifetime of a reservation (15 minutes).
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(900);

/// Storage lifetime of an activated key (two years).
pub const DEFAULT_ACTIVATED_TTL: Duration = Duration::from_secs(63_072_000);

/// Key namespace of the version chains.
pub const DEFAULT_KEY_PREFIX: &str = "lollipop-keys/";

/// Configuration for [`BackendPopKeyStore`](crate::keys::BackendPopKeyStore).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use lollipop_storage::KeyStoreConfig;
///
/// let config = KeyStoreConfig::builder()
///     .pending_ttl(Duration::from_secs(300))
///     .build();
/// assert!(config.validate().is_ok());
///
/// let from_file: KeyStoreConfig = serde_json::from_str(r#"{ "activated_ttl": "1year" }"#).unwrap();
/// assert_eq!(from_file.pending_ttl, Duration::from_secs(900));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyStoreConfig {
    /// TTL of a version chain started by a `PENDING` record.
    #[serde(with = "humantime_serde", default = "default_pending_ttl")]
    #[builder(default = default_pending_ttl())]
    pub pending_ttl: Duration,

    /// TTL granted when a key leaves `PENDING`.
    #[serde(with = "humantime_serde", default = "default_activated_ttl")]
    #[builder(default = default_activated_ttl())]
    pub activated_ttl: Duration,

    /// Prefix of every version-chain key in the backend.
    #[serde(default = "default_key_prefix")]
    #[builder(into, default = default_key_prefix())]
    pub key_prefix: String,
}

fn default_pending_ttl() -> Duration {
    DEFAULT_PENDING_TTL
}

fn default_activated_ttl() -> Duration {
    DEFAULT_ACTIVATED_TTL
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_owned()
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            pending_ttl: default_pending_ttl(),
            activated_ttl: default_activated_ttl(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl KeyStoreConfig {
    /// Checks that both TTLs are at least one second and the prefix is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, ttl) in [("pending_ttl", self.pending_ttl), ("activated_ttl", self.activated_ttl)]
        {
            if ttl.as_secs() == 0 {
                return Err(ConfigError::BelowMinimum {
                    field,
                    min: "1s".into(),
                    value: format!("{ttl:?}"),
                });
            }
        }
        if self.key_prefix.is_empty() || !self.key_prefix.ends_with('/') {
            return Err(ConfigError::Invalid {
                field: "key_prefix",
                reason: "must be non-empty and end with '/'".into(),
            });
        }
        Ok(())
    }

    /// Pending TTL in whole seconds, as stored on records.
    #[must_use]
    pub fn pending_ttl_secs(&self) -> i64 {
        i64::try_from(self.pending_ttl.as_secs()).unwrap_or(i64::MAX)
    }

    /// Activated TTL in whole seconds, as stored on records.
    #[must_use]
    pub fn activated_ttl_secs(&self) -> i64 {
        i64::try_from(self.activated_ttl.as_secs()).unwrap_or(i64::MAX)
    }
}
