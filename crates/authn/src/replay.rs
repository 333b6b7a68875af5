//! Signature nonce replay prevention.
//!
//! When enabled, the replay detector keeps the nonces of recently accepted
//! request signatures. A signature whose nonce was already accepted inside
//! its validity window is rejected, so a captured request cannot be sent a
//! second time.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use lollipop_authn::{replay::InMemoryReplayDetector, signature::{PopVerifier, VerifierConfig}};
//!
//! let detector = Arc::new(InMemoryReplayDetector::new(10_000));
//! let verifier = PopVerifier::new(VerifierConfig::default()).with_replay_detector(detector);
//! ```
//!
//! - **Opt-in**: the verifier only consults a detector when one is attached.
//! - **Per-entry expiry**: each nonce is forgotten when its window closes.
//! - **Capacity-bounded**: LRU eviction caps memory beyond per-entry expiry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::{future::Cache, policy::EvictionPolicy};

use crate::error::AuthError;

/// Tracks seen nonces and rejects duplicates.
#[async_trait]
pub trait ReplayDetector: Send + Sync {
    /// Marks `nonce` as seen for `window`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NonceReplayed`] if the nonce was already recorded.
    async fn check_and_mark(&self, nonce: &str, window: Duration) -> Result<(), AuthError>;
}

/// Expiry policy reading the absolute deadline stored as the entry value.
struct NonceExpiry;

impl moka::Expiry<String, Instant> for NonceExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Instant,
        created_at: Instant,
    ) -> Option<Duration> {
        Some(value.saturating_duration_since(created_at))
    }
}

/// In-memory replay detector backed by a [`moka::future::Cache`].
pub struct InMemoryReplayDetector {
    /// Nonce to the instant its window closes.
    seen: Cache<String, Instant>,
}

impl InMemoryReplayDetector {
    /// Creates a detector tracking at most `max_capacity` nonces.
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        let seen = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(NonceExpiry)
            .build();
        Self { seen }
    }
}

#[async_trait]
impl ReplayDetector for InMemoryReplayDetector {
    async fn check_and_mark(&self, nonce: &str, window: Duration) -> Result<(), AuthError> {
        let deadline = Instant::now() + window;
        // A single entry call decides the race between concurrent presentations.
        let entry = self.seen.entry(nonce.to_owned()).or_insert(deadline).await;
        if entry.is_fresh() {
            Ok(())
        } else {
            tracing::warn!(nonce = %nonce, "signature nonce replayed");
            Err(AuthError::nonce_replayed(nonce))
        }
    }
}
