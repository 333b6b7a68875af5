//! Security-focused authentication tests.
//!
//! These tests exercise the token and request-signature pipelines against
//! common attacks: algorithm substitution, header and payload tampering,
//! key identifier swaps, stripped or mismatched signature headers, and
//! replayed nonces.
#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use bytes::Bytes;
use chrono::Utc;
use lollipop_authn::{
    assert_auth_error,
    error::AuthError,
    identity::derive_assertion_ref,
    replay::InMemoryReplayDetector,
    signature::{
        AlgorithmRegistry, DigestPolicy, Ed25519, PopVerifier, SignedRequest, VerifierConfig,
        digest,
    },
    testutil::{
        RequestSigner, TestKeyPair, craft_raw_jwt, signer_with_keyid, test_request,
        test_token_service,
    },
    token::{TokenScope, TokenService},
};
use lollipop_storage::keys::{AssertionRef, HashAlgorithm};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn signer(pair: TestKeyPair) -> RequestSigner {
    let keyid = derive_assertion_ref(&pair.jwk(), HashAlgorithm::Sha256).expect("derivable");
    RequestSigner::new(pair, keyid)
}

fn scope(assertion_ref: &AssertionRef) -> TokenScope {
    TokenScope {
        assertion_ref: assertion_ref.clone(),
        operation_id: "op-1".into(),
        ttl: Duration::from_secs(60),
    }
}

fn rewrite_header(request: &mut SignedRequest, name: &str, f: impl Fn(&str) -> String) {
    for (header, value) in &mut request.headers {
        if header.eq_ignore_ascii_case(name) {
            *value = f(value);
        }
    }
}

fn strip_header(request: &mut SignedRequest, name: &str) {
    request.headers.retain(|(header, _)| !header.eq_ignore_ascii_case(name));
}

async fn verify(
    verifier: &PopVerifier,
    request: &SignedRequest,
    signer: &RequestSigner,
) -> Result<(), AuthError> {
    verifier.verify(request, &signer.pair().jwk(), signer.keyid()).await.map(|_| ())
}

fn default_verifier() -> PopVerifier {
    PopVerifier::new(VerifierConfig::default())
}

// ===========================================================================
// Access token attacks
// ===========================================================================

#[tokio::test]
async fn test_hs256_substitution_rejected() {
    let service = test_token_service();
    let now = Utc::now().timestamp();
    let token = craft_raw_jwt(
        &json!({"alg": "HS256", "typ": "JWT", "kid": "primary"}),
        &json!({"iss": "iss", "aud": "aud", "sub": "sha256-x", "operation_id": "op",
                "iat": now, "exp": now + 60, "jti": "j"}),
    );
    assert_auth_error!(service.validate(&token).await, UnsupportedAlgorithm);
}

#[tokio::test]
async fn test_rs256_confusion_rejected() {
    let service = test_token_service();
    let token = craft_raw_jwt(&json!({"alg": "RS256", "kid": "primary"}), &json!({"sub": "x"}));
    assert_auth_error!(service.validate(&token).await, UnsupportedAlgorithm);
}

#[tokio::test]
async fn test_alg_none_rejected() {
    let service = test_token_service();
    let token = craft_raw_jwt(&json!({"alg": "none"}), &json!({"sub": "x"}));
    assert!(service.validate(&token).await.is_err());
}

#[tokio::test]
async fn test_kid_injection_rejected() {
    let service = test_token_service();
    let token =
        craft_raw_jwt(&json!({"alg": "EdDSA", "kid": "../../keys/primary"}), &json!({"sub": "x"}));
    assert_auth_error!(service.validate(&token).await, InvalidTokenFormat);
}

#[tokio::test]
async fn test_tampered_payload_rejected() {
    let service = test_token_service();
    let victim = AssertionRef::parse("sha256-victim").unwrap();
    let attacker = AssertionRef::parse("sha256-attacker").unwrap();
    let minted = service.mint(&scope(&attacker)).await.unwrap();

    let mut claims = minted.claims.clone();
    claims.sub = victim.to_string();
    let parts: Vec<&str> = minted.token.split('.').collect();
    let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

    assert_auth_error!(service.validate(&forged).await, InvalidSignature);
}

#[tokio::test]
async fn test_token_from_other_service_rejected() {
    let ours = test_token_service();
    let theirs = test_token_service();
    let minted = theirs.mint(&scope(&AssertionRef::parse("sha256-k").unwrap())).await.unwrap();
    // Both services name their key `primary`, but the keys differ.
    assert_auth_error!(ours.validate(&minted.token).await, InvalidSignature);
}

#[tokio::test]
async fn test_malformed_tokens_rejected() {
    let service = test_token_service();
    for token in ["", "abc", "a.b", "a.b.c.d", "...."] {
        assert!(service.validate(token).await.is_err(), "accepted {token:?}");
    }
}

// ===========================================================================
// Request signature attacks
// ===========================================================================

#[tokio::test]
async fn test_every_key_type_verifies() {
    for pair in [TestKeyPair::p256(), TestKeyPair::rsa(), TestKeyPair::ed25519()] {
        let signer = signer(pair);
        let request = signer.sign(test_request(), "sig1");
        verify(&default_verifier(), &request, &signer).await.expect("valid signature");
    }
}

#[tokio::test]
async fn test_tampered_method_rejected() {
    let signer = signer(TestKeyPair::p256());
    let mut request = signer.sign(test_request(), "sig1");
    request.method = "DELETE".into();
    assert_auth_error!(verify(&default_verifier(), &request, &signer).await, SignatureValidation);
}

#[tokio::test]
async fn test_tampered_path_rejected() {
    let signer = signer(TestKeyPair::ed25519());
    let mut request = signer.sign(test_request(), "sig1");
    request.path = "/api/v1/admin".into();
    assert_auth_error!(verify(&default_verifier(), &request, &signer).await, SignatureValidation);
}

#[tokio::test]
async fn test_tampered_digest_rejected() {
    let signer = signer(TestKeyPair::ed25519());
    let mut request = signer.sign(test_request(), "sig1");
    let body = b"{\"operation_id\":\"op-2\"}";
    request.body = Bytes::from_static(body);
    rewrite_header(&mut request, "content-digest", |_| {
        format!("sha-256=:{}:", STANDARD.encode(digest::compute("sha-256", body).unwrap()))
    });
    // The body matches its digest, but the signature covers the old digest.
    assert_auth_error!(verify(&default_verifier(), &request, &signer).await, SignatureValidation);
}

#[tokio::test]
async fn test_unsupported_digest_only_rejected() {
    let signer = signer(TestKeyPair::ed25519());
    let request = test_request().with_header("Content-Digest", "md5=:AAAAAAAAAAAAAAAAAAAAAA==:");
    let request = signer.sign(request, "sig1");
    assert!(verify(&default_verifier(), &request, &signer).await.is_err());
}

#[tokio::test]
async fn test_algorithm_relabel_rejected() {
    let signer = signer(TestKeyPair::ed25519());
    let mut request = signer.sign(test_request(), "sig1");
    rewrite_header(&mut request, "signature-input", |v| {
        v.replace("alg=\"ed25519\"", "alg=\"ecdsa-p256-sha256\"")
    });
    assert!(verify(&default_verifier(), &request, &signer).await.is_err());
}

#[tokio::test]
async fn test_unregistered_algorithm_rejected() {
    let signer = signer(TestKeyPair::p256());
    let request = signer.sign(test_request(), "sig1");
    let verifier = PopVerifier::new(VerifierConfig::default())
        .with_registry(AlgorithmRegistry::empty().with(Ed25519));
    assert!(verify(&verifier, &request, &signer).await.is_err());
}

#[tokio::test]
async fn test_keyid_swap_rejected() {
    let victim = signer(TestKeyPair::ed25519());
    let attacker = signer_with_keyid(TestKeyPair::ed25519(), victim.keyid().clone());
    let request = attacker.sign(test_request(), "sig1");

    // The attacker names the victim's key; verification uses the victim's JWK.
    assert!(verify(&default_verifier(), &request, &victim).await.is_err());
}

#[tokio::test]
async fn test_stripped_signature_rejected() {
    let signer = signer(TestKeyPair::ed25519());
    let mut request = signer.sign(test_request(), "sig1");
    strip_header(&mut request, "signature");
    assert!(verify(&default_verifier(), &request, &signer).await.is_err());
}

#[tokio::test]
async fn test_mismatched_labels_rejected() {
    let signer = signer(TestKeyPair::ed25519());
    let mut request = signer.sign(test_request(), "sig1");
    rewrite_header(&mut request, "signature", |v| v.replacen("sig1=", "sig2=", 1));
    assert!(verify(&default_verifier(), &request, &signer).await.is_err());
}

#[tokio::test]
async fn test_uncovered_digest_rejected_when_required() {
    let signer = signer(TestKeyPair::ed25519());
    let request = signer.sign_covering(test_request(), "sig1", &["@method", "@path"], true);

    assert!(verify(&default_verifier(), &request, &signer).await.is_err());
    let lenient = PopVerifier::new(
        VerifierConfig::builder().digest_policy(DigestPolicy::IfPresent).build(),
    );
    assert!(verify(&lenient, &request, &signer).await.is_ok());
}

#[tokio::test]
async fn test_concurrent_replay_single_winner() {
    let signer = signer(TestKeyPair::ed25519()).nonce("n-concurrent");
    let request = signer.sign(test_request(), "sig1");
    let verifier = Arc::new(
        PopVerifier::new(VerifierConfig::builder().require_nonce(true).build())
            .with_replay_detector(Arc::new(InMemoryReplayDetector::new(1_000))),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let (verifier, request, signer) = (Arc::clone(&verifier), request.clone(), signer.clone());
        handles.push(tokio::spawn(
            async move { verify(&verifier, &request, &signer).await.is_ok() },
        ));
    }
    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
}

#[tokio::test]
async fn test_failed_signature_does_not_burn_nonce() {
    let signer = signer(TestKeyPair::ed25519()).nonce("n-burn");
    let verifier = PopVerifier::new(VerifierConfig::builder().require_nonce(true).build())
        .with_replay_detector(Arc::new(InMemoryReplayDetector::new(1_000)));

    let mut forged = signer.sign(test_request(), "sig1");
    forged.path = "/elsewhere".into();
    assert!(verify(&verifier, &forged, &signer).await.is_err());

    let genuine = signer.sign(test_request(), "sig1");
    assert!(verify(&verifier, &genuine, &signer).await.is_ok());
}
