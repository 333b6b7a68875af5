//! # Lollipop Authentication
//!
//! Key identity, access tokens and request proof of possession.
//!
//! This crate provides:
//! - **Identity derivation**: RFC 7638 JWK thumbprints as assertion references
//! - **Access tokens**: short-lived EdDSA JWTs scoped to one signing operation
//! - **PoP verification**: RFC 9421 HTTP message signatures with `Content-Digest`
//! - **Replay protection**: optional nonce tracking for signed requests
//!
//! ## Security
//!
//! - Only asymmetric algorithms are accepted, for tokens and for requests
//! - Every signature on a request must verify, and must name the claimed key
//! - Verification failures collapse into one opaque error
//!
//! ## Example
//!
//! ```no_run
//! use lollipop_authn::{identity::derive_assertion_ref, signature::{PopVerifier, SignedRequest, VerifierConfig}};
//! use lollipop_storage::keys::HashAlgorithm;
//!
//! # async fn example(request: SignedRequest, jwk: &str) -> Result<(), lollipop_authn::AuthError> {
//! let assertion_ref = derive_assertion_ref(jwk, HashAlgorithm::Sha256)?;
//! let verifier = PopVerifier::new(VerifierConfig::default());
//! let verified = verifier.verify(&request, jwk, &assertion_ref).await?;
//! println!("verified signatures: {:?}", verified.labels);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Authentication error types.
pub mod error;
/// Assertion reference derivation from public keys.
pub mod identity;
/// Public JSON Web Keys.
pub mod jwk;
/// Signature nonce replay prevention.
pub mod replay;
pub mod signature;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
/// Access token minting and validation.
pub mod token;
/// Token header checks.
pub mod validation;

pub use error::{AuthError, Result};
pub use identity::{MasterAndUsed, derive_assertion_ref, resolve_master_and_used};
pub use jwk::PublicJwk;
pub use replay::{InMemoryReplayDetector, ReplayDetector};
pub use signature::{PopVerifier, SignedRequest, VerifiedRequest, VerifierConfig};
pub use token::{AccessToken, AccessTokenClaims, JwtTokenService, TokenConfig, TokenService};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
