//! Signature algorithms and the registry the verifier dispatches through.
//!
//! Algorithms are looked up by their HTTP Signature Algorithms registry name.
//! Adding one means implementing [`SignatureAlgorithm`] and registering it;
//! the verifier itself does not change.

use std::{collections::HashMap, fmt, sync::Arc};

use rsa::signature::Verifier as _;
use sha2::{Sha256, Sha512};

use crate::jwk::PublicJwk;

/// A signature algorithm usable in HTTP message signatures.
pub trait SignatureAlgorithm: Send + Sync {
    /// Registry name, e.g. `ed25519`.
    fn id(&self) -> &'static str;

    /// Whether `signature` over `message` verifies under `key`.
    ///
    /// Returns `false` for keys of the wrong type.
    fn verify(&self, key: &PublicJwk, message: &[u8], signature: &[u8]) -> bool;
}

/// `ecdsa-p256-sha256`: raw `r || s`, with DER accepted as a fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct EcdsaP256Sha256;

impl SignatureAlgorithm for EcdsaP256Sha256 {
    fn id(&self) -> &'static str {
        "ecdsa-p256-sha256"
    }

    fn verify(&self, key: &PublicJwk, message: &[u8], signature: &[u8]) -> bool {
        let Ok(key) = key.to_p256() else {
            return false;
        };
        let signature = if signature.len() == 64 {
            p256::ecdsa::Signature::from_slice(signature)
        } else {
            p256::ecdsa::Signature::from_der(signature)
        };
        signature.is_ok_and(|sig| key.verify(message, &sig).is_ok())
    }
}

/// `rsa-pss-sha256` and `rsa-pss-sha512`, salt length equal to the digest size.
#[derive(Debug, Clone, Copy)]
pub enum RsaPss {
    /// SHA-256 digest.
    Sha256,
    /// SHA-512 digest.
    Sha512,
}

impl SignatureAlgorithm for RsaPss {
    fn id(&self) -> &'static str {
        match self {
            Self::Sha256 => "rsa-pss-sha256",
            Self::Sha512 => "rsa-pss-sha512",
        }
    }

    fn verify(&self, key: &PublicJwk, message: &[u8], signature: &[u8]) -> bool {
        let Ok(key) = key.to_rsa() else {
            return false;
        };
        let Ok(signature) = rsa::pss::Signature::try_from(signature) else {
            return false;
        };
        match self {
            Self::Sha256 => {
                rsa::pss::VerifyingKey::<Sha256>::new(key).verify(message, &signature).is_ok()
            },
            Self::Sha512 => {
                rsa::pss::VerifyingKey::<Sha512>::new(key).verify(message, &signature).is_ok()
            },
        }
    }
}

/// `ed25519`, verified strictly.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519;

impl SignatureAlgorithm for Ed25519 {
    fn id(&self) -> &'static str {
        "ed25519"
    }

    fn verify(&self, key: &PublicJwk, message: &[u8], signature: &[u8]) -> bool {
        let Ok(key) = key.to_ed25519() else {
            return false;
        };
        ed25519_dalek::Signature::from_slice(signature)
            .is_ok_and(|sig| key.verify_strict(message, &sig).is_ok())
    }
}

/// Algorithms by registry name.
#[derive(Clone)]
pub struct AlgorithmRegistry {
    algorithms: HashMap<&'static str, Arc<dyn SignatureAlgorithm>>,
}

impl AlgorithmRegistry {
    /// A registry with no algorithms.
    #[must_use]
    pub fn empty() -> Self {
        Self { algorithms: HashMap::new() }
    }

    /// Adds or replaces an algorithm.
    #[must_use]
    pub fn with(mut self, algorithm: impl SignatureAlgorithm + 'static) -> Self {
        self.algorithms.insert(algorithm.id(), Arc::new(algorithm));
        self
    }

    /// The algorithm registered as `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<dyn SignatureAlgorithm>> {
        self.algorithms.get(id)
    }

    /// The algorithm implied by the key when a signature names none.
    ///
    /// RSA keys are ambiguous between the PSS digests and must be named.
    #[must_use]
    pub fn for_key(&self, key: &PublicJwk) -> Option<&Arc<dyn SignatureAlgorithm>> {
        match key {
            PublicJwk::Ec { .. } => self.get("ecdsa-p256-sha256"),
            PublicJwk::Okp { .. } => self.get("ed25519"),
            PublicJwk::Rsa { .. } => None,
        }
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::empty().with(EcdsaP256Sha256).with(RsaPss::Sha256).with(RsaPss::Sha512).with(Ed25519)
    }
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.algorithms.keys().collect();
        ids.sort_unstable();
        f.debug_struct("AlgorithmRegistry").field("algorithms", &ids).finish()
    }
}
