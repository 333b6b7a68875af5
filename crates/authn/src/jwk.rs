//! Public keys in JSON Web Key form.
//!
//! Clients hand their public key over as a base64url-encoded JWK. Three key
//! types are understood: `EC` on the P-256 curve, `RSA`, and `OKP` on
//! Ed25519. Thumbprints follow RFC 7638: the required members of the key,
//! in lexicographic order, serialized without whitespace and hashed.

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use lollipop_storage::keys::HashAlgorithm;
use rsa::{BigUint, RsaPublicKey, traits::PublicKeyParts};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::AuthError;

/// Smallest RSA modulus accepted, in bytes.
pub const MIN_RSA_MODULUS_BYTES: usize = 256;

/// A public key as carried in a JWK.
///
/// Members other than the ones needed to rebuild the key (`kid`, `use`,
/// `alg`, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum PublicJwk {
    /// Elliptic curve key.
    #[serde(rename = "EC")]
    Ec {
        /// Curve name; only `P-256` is supported.
        crv: String,
        /// Base64url x coordinate.
        x: String,
        /// Base64url y coordinate.
        y: String,
    },
    /// RSA key.
    #[serde(rename = "RSA")]
    Rsa {
        /// Base64url modulus.
        n: String,
        /// Base64url public exponent.
        e: String,
    },
    /// Octet key pair.
    #[serde(rename = "OKP")]
    Okp {
        /// Curve name; only `Ed25519` is supported.
        crv: String,
        /// Base64url public key.
        x: String,
    },
}

#[derive(Serialize)]
struct EcMembers<'a> {
    crv: &'a str,
    kty: &'a str,
    x: &'a str,
    y: &'a str,
}

#[derive(Serialize)]
struct RsaMembers<'a> {
    e: &'a str,
    kty: &'a str,
    n: &'a str,
}

#[derive(Serialize)]
struct OkpMembers<'a> {
    crv: &'a str,
    kty: &'a str,
    x: &'a str,
}

fn decode_member(name: &str, value: &str) -> Result<Vec<u8>, AuthError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| AuthError::invalid_key(format!("member '{name}' is not base64url: {e}")))
}

impl PublicJwk {
    /// Decodes a base64-encoded JWK.
    ///
    /// The encoding is expected to be base64url; standard base64 is accepted
    /// as a fallback since some clients pad or use the standard alphabet.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] if the value is not base64, not a
    /// JWK, or describes an unsupported key type or curve.
    pub fn decode(encoded: &str) -> Result<Self, AuthError> {
        let trimmed = encoded.trim();
        let json = URL_SAFE_NO_PAD
            .decode(trimmed.trim_end_matches('='))
            .or_else(|_| STANDARD.decode(trimmed))
            .map_err(|e| AuthError::invalid_key(format!("not base64: {e}")))?;
        let jwk: Self = serde_json::from_slice(&json)
            .map_err(|e| AuthError::invalid_key(format!("not a supported JWK: {e}")))?;
        jwk.validate()?;
        Ok(jwk)
    }

    /// Encodes the JWK as base64url JSON, the form clients send it in.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] if serialization fails.
    pub fn encode(&self) -> Result<String, AuthError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AuthError::invalid_key(format!("cannot serialize JWK: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    fn validate(&self) -> Result<(), AuthError> {
        match self {
            Self::Ec { crv, x, y } => {
                if crv != "P-256" {
                    return Err(AuthError::invalid_key(format!("unsupported curve '{crv}'")));
                }
                let (x, y) = (decode_member("x", x)?, decode_member("y", y)?);
                if x.len() != 32 || y.len() != 32 {
                    return Err(AuthError::invalid_key("P-256 coordinates must be 32 bytes"));
                }
            },
            Self::Rsa { n, e } => {
                let (n, e) = (decode_member("n", n)?, decode_member("e", e)?);
                if n.is_empty() || e.is_empty() {
                    return Err(AuthError::invalid_key("empty RSA member"));
                }
            },
            Self::Okp { crv, x } => {
                if crv != "Ed25519" {
                    return Err(AuthError::invalid_key(format!("unsupported curve '{crv}'")));
                }
                if decode_member("x", x)?.len() != ed25519_dalek::PUBLIC_KEY_LENGTH {
                    return Err(AuthError::invalid_key("Ed25519 key must be 32 bytes"));
                }
            },
        }
        Ok(())
    }

    /// The `kty` member.
    #[must_use]
    pub fn key_type(&self) -> &'static str {
        match self {
            Self::Ec { .. } => "EC",
            Self::Rsa { .. } => "RSA",
            Self::Okp { .. } => "OKP",
        }
    }

    /// The RFC 7638 thumbprint input: required members only, sorted, compact.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Thumbprint`] if serialization fails.
    pub fn thumbprint_input(&self) -> Result<String, AuthError> {
        let kty = self.key_type();
        let json = match self {
            Self::Ec { crv, x, y } => serde_json::to_string(&EcMembers { crv, kty, x, y }),
            Self::Rsa { n, e } => serde_json::to_string(&RsaMembers { e, kty, n }),
            Self::Okp { crv, x } => serde_json::to_string(&OkpMembers { crv, kty, x }),
        };
        json.map_err(|e| AuthError::thumbprint(e.to_string()))
    }

    /// Base64url (unpadded) thumbprint under `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Thumbprint`] if the thumbprint input cannot be built.
    pub fn thumbprint(&self, algorithm: HashAlgorithm) -> Result<String, AuthError> {
        let input = self.thumbprint_input()?;
        let digest = match algorithm {
            HashAlgorithm::Sha256 => Sha256::digest(input.as_bytes()).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(input.as_bytes()).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(input.as_bytes()).to_vec(),
        };
        Ok(URL_SAFE_NO_PAD.encode(digest))
    }

    /// The key as a P-256 ECDSA verifying key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] for a non-EC key or a point off the curve.
    pub fn to_p256(&self) -> Result<p256::ecdsa::VerifyingKey, AuthError> {
        let Self::Ec { x, y, .. } = self else {
            return Err(AuthError::invalid_key(format!("expected EC key, got {}", self.key_type())));
        };
        let mut sec1 = Vec::with_capacity(65);
        sec1.push(0x04);
        sec1.extend_from_slice(&decode_member("x", x)?);
        sec1.extend_from_slice(&decode_member("y", y)?);
        p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
            .map_err(|e| AuthError::invalid_key(format!("invalid P-256 point: {e}")))
    }

    /// The key as an RSA public key of at least 2048 bits.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] for a non-RSA key, an invalid
    /// exponent, or a modulus below [`MIN_RSA_MODULUS_BYTES`].
    pub fn to_rsa(&self) -> Result<RsaPublicKey, AuthError> {
        let Self::Rsa { n, e } = self else {
            return Err(AuthError::invalid_key(format!(
                "expected RSA key, got {}",
                self.key_type()
            )));
        };
        let key = RsaPublicKey::new(
            BigUint::from_bytes_be(&decode_member("n", n)?),
            BigUint::from_bytes_be(&decode_member("e", e)?),
        )
        .map_err(|e| AuthError::invalid_key(format!("invalid RSA key: {e}")))?;
        if key.size() < MIN_RSA_MODULUS_BYTES {
            return Err(AuthError::invalid_key(format!(
                "RSA modulus of {} bits is too small",
                key.size() * 8
            )));
        }
        Ok(key)
    }

    /// The key as an Ed25519 verifying key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] for a non-OKP key or invalid point.
    pub fn to_ed25519(&self) -> Result<ed25519_dalek::VerifyingKey, AuthError> {
        let Self::Okp { x, .. } = self else {
            return Err(AuthError::invalid_key(format!(
                "expected OKP key, got {}",
                self.key_type()
            )));
        };
        let bytes: [u8; ed25519_dalek::PUBLIC_KEY_LENGTH] = decode_member("x", x)?
            .try_into()
            .map_err(|_| AuthError::invalid_key("Ed25519 key must be 32 bytes"))?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|e| AuthError::invalid_key(format!("invalid Ed25519 key: {e}")))
    }
}
