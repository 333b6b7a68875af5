//! Shared test utilities for lifecycle engine testing.
//!
//! [`Harness`] wires an engine to in-memory stores wrapped in fault-injecting
//! decorators, so tests can fail individual writes and observe what was left
//! behind. Feature-gated behind `testutil`.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use lollipop_authn::{
    signature::PopVerifier,
    testutil::{TestKeyPair, test_token_service},
    token::JwtTokenService,
};
use lollipop_storage::{
    keys::{AssertionRef, AssertionType, StoredPopKey},
    testutil::{FailingBlobStore, FailingKeyStore, TEST_FISCAL_CODE, memory_stores},
};

use crate::{ActivationRequest, LifecycleConfig, LifecycleEngine};

/// Raw assertion stored by [`activation_for`].
pub const TEST_ASSERTION: &[u8] = b"<saml2:Assertion ID=\"_test\">signed</saml2:Assertion>";

/// An engine over fault-injecting in-memory stores.
pub struct Harness {
    /// The engine under test.
    pub engine: LifecycleEngine,
    /// The key store the engine writes to.
    pub keys: FailingKeyStore,
    /// The assertion store the engine writes to.
    pub blobs: FailingBlobStore,
    /// The token service the engine mints with.
    pub tokens: Arc<JwtTokenService>,
}

impl Harness {
    /// An engine with default configuration.
    pub fn new() -> Self {
        Self::build(LifecycleConfig::default(), None)
    }

    /// An engine with `config`.
    pub fn with_config(config: LifecycleConfig) -> Self {
        Self::build(config, None)
    }

    /// An engine verifying requests with `verifier`.
    pub fn with_verifier(verifier: PopVerifier) -> Self {
        Self::build(LifecycleConfig::default(), Some(verifier))
    }

    fn build(config: LifecycleConfig, verifier: Option<PopVerifier>) -> Self {
        let (keys, blobs) = memory_stores();
        let keys = FailingKeyStore::new(Arc::new(keys));
        let blobs = FailingBlobStore::new(Arc::new(blobs));
        let tokens = Arc::new(test_token_service());
        let engine = LifecycleEngine::builder()
            .keys(Arc::new(keys.clone()))
            .assertions(Arc::new(blobs.clone()))
            .tokens(tokens.clone())
            .maybe_verifier(verifier)
            .config(config)
            .build()
            .expect("valid test configuration");
        Self { engine, keys, blobs, tokens }
    }

    /// The latest record of `assertion_ref`, read past any injected failure.
    pub async fn latest(&self, assertion_ref: &AssertionRef) -> Option<StoredPopKey> {
        use lollipop_storage::PopKeyStore;
        self.keys.find_latest(assertion_ref).await.expect("readable test store")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// The base64url JWK of a deterministic Ed25519 key.
pub fn seeded_jwk(seed: u8) -> String {
    TestKeyPair::ed25519_from_seed([seed; 32]).jwk()
}

/// An activation of `assertion_ref` by [`TEST_FISCAL_CODE`], expiring in a year.
pub fn activation_for(assertion_ref: &AssertionRef) -> ActivationRequest {
    ActivationRequest::builder()
        .assertion_ref(assertion_ref.clone())
        .login_fiscal_code(TEST_FISCAL_CODE)
        .assertion_type(AssertionType::Saml)
        .expired_at(Utc::now() + ChronoDuration::days(365))
        .assertion(Bytes::from_static(TEST_ASSERTION))
        .build()
}
