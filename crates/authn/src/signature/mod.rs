//! HTTP message signatures (RFC 9421) as proof of possession.
//!
//! A client proves it holds the private key of an activated record by
//! signing its request. The verifier checks the body against
//! `Content-Digest`, rebuilds the signature base of every signature named in
//! `Signature-Input`, and verifies each one with the stored public key.
//!
//! ```text
//! Content-Digest: sha-256=:RK/0qy18MlBSVnWgjwz6lZEWjP/lF5HF9bvEF8FabDg=:
//! Signature-Input: sig1=("@method" "@path" "content-digest");created=1618884473;keyid="sha256-…";alg="ed25519"
//! Signature: sig1=:Base64Signature==:
//! ```

pub mod algorithm;
pub mod digest;
pub mod fields;
pub mod request;
pub mod verifier;

pub use algorithm::{AlgorithmRegistry, EcdsaP256Sha256, Ed25519, RsaPss, SignatureAlgorithm};
pub use digest::{CONTENT_DIGEST, DigestPolicy};
pub use request::{SignedRequest, signature_base};
pub use verifier::{
    PopVerifier, SIGNATURE, SIGNATURE_INPUT, VerifiedRequest, VerifierConfig,
    claimed_assertion_ref,
};
