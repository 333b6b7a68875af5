//! Configuration for the lifecycle engine.

use std::time::Duration;

use lollipop_storage::{ConfigError, keys::HashAlgorithm};
use serde::{Deserialize, Serialize};

/// Default upper bound on a single store or blob call.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default lifetime of minted access tokens.
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Backoff policy for the master record lookup during revocation.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicyConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    #[builder(default = default_initial_backoff())]
    pub initial_backoff: Duration,

    /// Upper bound of a single delay, before jitter.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    #[builder(default = default_max_backoff())]
    pub max_backoff: Duration,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(2)
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

/// Configuration for [`LifecycleEngine`](crate::LifecycleEngine).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use lollipop_lifecycle::LifecycleConfig;
///
/// let config: LifecycleConfig = serde_json::from_str(
///     r#"{ "expiration_grace_period": "1h", "operation_timeout": "5s" }"#,
/// ).unwrap();
/// assert_eq!(config.expiration_grace_period, Duration::from_secs(3600));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    /// Algorithm of the canonical identifier of every key.
    #[serde(default = "default_master_algorithm")]
    #[builder(default = default_master_algorithm())]
    pub master_algorithm: HashAlgorithm,

    /// How long past `expired_at` a key may still mint access tokens.
    #[serde(with = "humantime_serde", default)]
    #[builder(default)]
    pub expiration_grace_period: Duration,

    /// Upper bound on each store and blob call; elapsed calls are transient.
    #[serde(with = "humantime_serde", default = "default_operation_timeout")]
    #[builder(default = default_operation_timeout())]
    pub operation_timeout: Duration,

    /// Backoff for a master lookup that fails transiently during revocation.
    #[serde(default)]
    #[builder(default)]
    pub master_lookup_retry: RetryPolicyConfig,

    /// Lifetime of minted access tokens.
    #[serde(with = "humantime_serde", default = "default_access_token_ttl")]
    #[builder(default = default_access_token_ttl())]
    pub access_token_ttl: Duration,
}

fn default_master_algorithm() -> HashAlgorithm {
    HashAlgorithm::Sha512
}

fn default_operation_timeout() -> Duration {
    DEFAULT_OPERATION_TIMEOUT
}

fn default_access_token_ttl() -> Duration {
    DEFAULT_ACCESS_TOKEN_TTL
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl LifecycleConfig {
    /// Checks timeouts and backoff bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "operation_timeout",
                min: "1ms".into(),
                value: format!("{:?}", self.operation_timeout),
            });
        }
        if self.access_token_ttl.as_secs() == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "access_token_ttl",
                min: "1s".into(),
                value: format!("{:?}", self.access_token_ttl),
            });
        }
        let retry = &self.master_lookup_retry;
        if retry.initial_backoff > retry.max_backoff {
            return Err(ConfigError::Invalid {
                field: "master_lookup_retry.initial_backoff",
                reason: format!(
                    "{:?} exceeds max_backoff {:?}",
                    retry.initial_backoff, retry.max_backoff
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LifecycleConfig::default();
        assert_eq!(config.master_algorithm, HashAlgorithm::Sha512);
        assert_eq!(config.expiration_grace_period, Duration::ZERO);
        assert_eq!(config.operation_timeout, Duration::from_secs(10));
        assert_eq!(config.master_lookup_retry.max_retries, 3);
        assert_eq!(config.master_lookup_retry.initial_backoff, Duration::from_millis(100));
        assert_eq!(config.master_lookup_retry.max_backoff, Duration::from_secs(2));
        assert_eq!(config.access_token_ttl, Duration::from_secs(900));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: LifecycleConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LifecycleConfig::default());
    }

    #[test]
    fn test_deserialize_nested_retry() {
        let config: LifecycleConfig = serde_json::from_str(
            r#"{ "master_algorithm": "sha384", "master_lookup_retry": { "max_retries": 5 } }"#,
        )
        .unwrap();
        assert_eq!(config.master_algorithm, HashAlgorithm::Sha384);
        assert_eq!(config.master_lookup_retry.max_retries, 5);
        assert_eq!(config.master_lookup_retry.max_backoff, Duration::from_secs(2));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(serde_json::from_str::<LifecycleConfig>(r#"{ "master": "sha256" }"#).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = LifecycleConfig::builder().operation_timeout(Duration::ZERO).build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BelowMinimum { field: "operation_timeout", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let config = LifecycleConfig::builder()
            .master_lookup_retry(
                RetryPolicyConfig::builder()
                    .initial_backoff(Duration::from_secs(5))
                    .max_backoff(Duration::from_secs(1))
                    .build(),
            )
            .build();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }
}
