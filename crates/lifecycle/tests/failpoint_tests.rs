#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p lollipop-lifecycle --features failpoints --test failpoint_tests
//! ```

use lollipop_authn::identity::derive_assertion_ref;
use lollipop_lifecycle::{
    LifecycleError,
    testutil::{Harness, activation_for, seeded_jwk},
};
use lollipop_storage::keys::{HashAlgorithm, KeyStatus};

#[tokio::test]
async fn crash_between_master_and_used_writes_is_resumable() {
    let scenario = fail::FailScenario::setup();
    let h = Harness::new();
    let jwk = seeded_jwk(1);
    let used = derive_assertion_ref(&jwk, HashAlgorithm::Sha256).unwrap();
    let master = derive_assertion_ref(&jwk, HashAlgorithm::Sha512).unwrap();
    h.engine.reserve(&jwk, HashAlgorithm::Sha256).await.unwrap();

    fail::cfg("activate-before-used-upsert", "return").expect("failed to configure fail point");
    let err = h.engine.activate(activation_for(&used)).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Internal { .. }), "got {err:?}");

    let master_record = h.latest(&master).await.expect("master present");
    let used_record = h.latest(&used).await.expect("used present");
    assert_eq!((master_record.key.status(), master_record.version), (KeyStatus::Valid, 1));
    assert_eq!((used_record.key.status(), used_record.version), (KeyStatus::Pending, 0));

    fail::remove("activate-before-used-upsert");
    let activated = h.engine.activate(activation_for(&used)).await.unwrap();
    assert_eq!((activated.key.status(), activated.version), (KeyStatus::Valid, 1));
    assert_eq!(h.latest(&master).await.expect("master present").version, 1);

    scenario.teardown();
}

#[tokio::test]
async fn master_only_activation_never_reaches_the_fail_point() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("activate-before-used-upsert", "return").expect("failed to configure fail point");

    let h = Harness::new();
    let jwk = seeded_jwk(2);
    let master = derive_assertion_ref(&jwk, HashAlgorithm::Sha512).unwrap();
    h.engine.reserve(&jwk, HashAlgorithm::Sha512).await.unwrap();

    let activated = h.engine.activate(activation_for(&master)).await.unwrap();
    assert_eq!(activated.key.status(), KeyStatus::Valid);

    fail::remove("activate-before-used-upsert");
    scenario.teardown();
}
