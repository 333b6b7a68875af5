//! Shared test utilities for identity, token and signature testing.
//!
//! This module provides key pairs for every supported signature algorithm
//! (with their JWK form), a request signer that produces RFC 9421 headers,
//! token service fixtures and raw JWT crafting for attack tests. It is
//! feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! lollipop-authn = { path = "../authn", features = ["testutil"] }
//! ```

use std::sync::OnceLock;

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use bytes::Bytes;
use chrono::Utc;
use lollipop_storage::keys::AssertionRef;
use rand_core::OsRng;
use rsa::{
    RsaPrivateKey,
    signature::{RandomizedSigner, SignatureEncoding, Signer},
    traits::PublicKeyParts,
};
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

use crate::{
    jwk::PublicJwk,
    signature::{
        CONTENT_DIGEST, SIGNATURE, SIGNATURE_INPUT, SignedRequest,
        digest,
        fields::{BareItem, Item, Member, Parameters},
        signature_base,
    },
    token::{JwtTokenService, TokenConfig, TokenSigningKey},
};

/// Components covered by [`RequestSigner::sign`].
pub const DEFAULT_COVERED: &[&str] = &["@method", "@authority", "@path", "content-digest"];

/// Generates a test Ed25519 key pair.
///
/// Returns `(pkcs8_der, public_key_base64url)`, the private key wrapped in
/// [`Zeroizing`] so it is scrubbed on drop.
pub fn generate_test_keypair() -> (Zeroizing<Vec<u8>>, String) {
    let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
    let public_key_b64 = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());

    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    (pkcs8_der, public_key_b64)
}

/// A token service with issuer `iss`, audience `aud` and a fresh key `primary`.
pub fn test_token_service() -> JwtTokenService {
    let (der, _) = generate_test_keypair();
    JwtTokenService::new(
        TokenConfig::builder().issuer("iss").audience("aud").build(),
        TokenSigningKey::from_pkcs8_der("primary", &der).expect("valid test key"),
    )
}

/// Creates a raw JWT string from arbitrary header and payload JSON, with an
/// empty signature.
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// A private key of one of the supported signature algorithms.
#[derive(Clone)]
pub enum TestKeyPair {
    /// ECDSA on P-256.
    P256(p256::ecdsa::SigningKey),
    /// RSA, 2048 bits.
    Rsa(Box<RsaPrivateKey>),
    /// Ed25519.
    Ed25519(ed25519_dalek::SigningKey),
}

impl std::fmt::Debug for TestKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TestKeyPair").field(&self.algorithm()).finish()
    }
}

impl TestKeyPair {
    /// A fresh P-256 key.
    pub fn p256() -> Self {
        Self::P256(p256::ecdsa::SigningKey::random(&mut OsRng))
    }

    /// A 2048-bit RSA key, generated once per test binary.
    pub fn rsa() -> Self {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        let key = KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).expect("RSA keygen"));
        Self::Rsa(Box::new(key.clone()))
    }

    /// A fresh Ed25519 key.
    pub fn ed25519() -> Self {
        Self::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }

    /// A deterministic Ed25519 key.
    pub fn ed25519_from_seed(seed: [u8; 32]) -> Self {
        Self::Ed25519(ed25519_dalek::SigningKey::from_bytes(&seed))
    }

    /// The signature algorithm this key signs with by default.
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::P256(_) => "ecdsa-p256-sha256",
            Self::Rsa(_) => "rsa-pss-sha512",
            Self::Ed25519(_) => "ed25519",
        }
    }

    /// The public half as a JWK.
    pub fn public_jwk(&self) -> PublicJwk {
        match self {
            Self::P256(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                PublicJwk::Ec {
                    crv: "P-256".into(),
                    x: URL_SAFE_NO_PAD.encode(point.x().expect("uncompressed point")),
                    y: URL_SAFE_NO_PAD.encode(point.y().expect("uncompressed point")),
                }
            },
            Self::Rsa(key) => PublicJwk::Rsa {
                n: URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
                e: URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
            },
            Self::Ed25519(key) => PublicJwk::Okp {
                crv: "Ed25519".into(),
                x: URL_SAFE_NO_PAD.encode(key.verifying_key().to_bytes()),
            },
        }
    }

    /// The public half as the base64url JWK clients send.
    pub fn jwk(&self) -> String {
        self.public_jwk().encode().expect("encodable JWK")
    }

    /// Signs `message` with algorithm `alg`.
    ///
    /// # Panics
    ///
    /// Panics if `alg` does not fit the key type.
    pub fn sign(&self, alg: &str, message: &[u8]) -> Vec<u8> {
        match (self, alg) {
            (Self::P256(key), "ecdsa-p256-sha256") => {
                let signature: p256::ecdsa::Signature = key.sign(message);
                signature.to_bytes().to_vec()
            },
            (Self::Rsa(key), "rsa-pss-sha256") => {
                rsa::pss::BlindedSigningKey::<Sha256>::new((**key).clone())
                    .sign_with_rng(&mut OsRng, message)
                    .to_vec()
            },
            (Self::Rsa(key), "rsa-pss-sha512") => {
                rsa::pss::BlindedSigningKey::<Sha512>::new((**key).clone())
                    .sign_with_rng(&mut OsRng, message)
                    .to_vec()
            },
            (Self::Ed25519(key), "ed25519") => key.sign(message).to_bytes().to_vec(),
            (pair, alg) => panic!("{pair:?} cannot sign with {alg}"),
        }
    }
}

/// Signs requests the way a client holding a key would.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    pair: TestKeyPair,
    keyid: AssertionRef,
    created: Option<i64>,
    nonce: Option<String>,
}

impl RequestSigner {
    /// A signer for `pair`, naming `keyid` in every signature.
    pub fn new(pair: TestKeyPair, keyid: AssertionRef) -> Self {
        Self { pair, keyid, created: None, nonce: None }
    }

    /// Uses a fixed `created` timestamp instead of the current time.
    #[must_use]
    pub fn created_at(mut self, created: i64) -> Self {
        self.created = Some(created);
        self
    }

    /// Adds a `nonce` parameter.
    #[must_use]
    pub fn nonce(mut self, nonce: &str) -> Self {
        self.nonce = Some(nonce.to_owned());
        self
    }

    /// The key pair.
    pub fn pair(&self) -> &TestKeyPair {
        &self.pair
    }

    /// The identifier named as `keyid`.
    pub fn keyid(&self) -> &AssertionRef {
        &self.keyid
    }

    /// Adds a `Content-Digest` and a signature labelled `label` covering
    /// [`DEFAULT_COVERED`].
    pub fn sign(&self, request: SignedRequest, label: &str) -> SignedRequest {
        self.sign_covering(request, label, DEFAULT_COVERED, true)
    }

    /// Adds a signature labelled `label` covering `components`, and a
    /// `Content-Digest` first when `with_digest` is set and none exists.
    pub fn sign_covering(
        &self,
        mut request: SignedRequest,
        label: &str,
        components: &[&str],
        with_digest: bool,
    ) -> SignedRequest {
        if with_digest && request.header(CONTENT_DIGEST).is_none() {
            let sha256 = digest::compute("sha-256", &request.body).expect("supported digest");
            request = request
                .with_header("Content-Digest", format!("sha-256=:{}:", STANDARD.encode(sha256)));
        }

        let covered: Vec<Item> = components
            .iter()
            .map(|c| Item {
                value: BareItem::String((*c).to_owned()),
                params: Parameters::default(),
            })
            .collect();
        let mut params = vec![
            (
                "created".to_owned(),
                BareItem::Integer(self.created.unwrap_or_else(|| Utc::now().timestamp())),
            ),
            ("keyid".to_owned(), BareItem::String(self.keyid.to_string())),
            ("alg".to_owned(), BareItem::String(self.pair.algorithm().to_owned())),
        ];
        if let Some(nonce) = &self.nonce {
            params.push(("nonce".to_owned(), BareItem::String(nonce.clone())));
        }
        let params = Parameters(params);

        let base =
            signature_base(&request, &covered, &params).expect("covered components present");
        let signature = self.pair.sign(self.pair.algorithm(), base.as_bytes());

        let input = Member::InnerList(covered, params);
        request
            .with_header("Signature-Input", format!("{label}={input}"))
            .with_header("Signature", format!("{label}=:{}:", STANDARD.encode(signature)))
    }
}

/// A signer for `pair` claiming an identifier it may not own.
pub fn signer_with_keyid(pair: TestKeyPair, keyid: AssertionRef) -> RequestSigner {
    RequestSigner::new(pair, keyid)
}

/// A `POST` with a JSON body to `https://api.example.com/api/v1/assertions`.
pub fn test_request() -> SignedRequest {
    SignedRequest::builder()
        .method("POST")
        .authority("api.example.com")
        .path("/api/v1/assertions")
        .body(Bytes::from_static(b"{\"operation_id\":\"op-1\"}"))
        .build()
        .with_header("Content-Type", "application/json")
}

/// Asserts that a `Result<T, AuthError>` is an `Err` of the given variant.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use lollipop_authn::assert_auth_error;
/// use lollipop_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::TokenExpired);
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            result,
        );
    }};
}
