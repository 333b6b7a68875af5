//! Authentication error types.
//!
//! This module defines errors that can occur while deriving key identities,
//! minting and validating access tokens, and verifying signed requests.

use thiserror::Error;

/// Authentication and key identity errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The public key could not be decoded or normalized.
    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    /// The thumbprint of a decoded key could not be turned into an identifier.
    #[error("Thumbprint computation failed: {0}")]
    Thumbprint(String),

    /// Malformed access token.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Access token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Access token not yet valid.
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// Access token signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Issuer doesn't match the configured value.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    /// Audience doesn't match the configured value.
    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    /// Required claim is missing.
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// Algorithm not in allowed list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The token names a signing key this service does not hold.
    #[error("Unknown signing key: {kid}")]
    UnknownSigningKey {
        /// Key ID from the token header.
        kid: String,
    },

    /// A signed request failed proof-of-possession verification.
    ///
    /// Carries no detail on purpose: callers must not learn which component
    /// of the request was rejected.
    #[error("Request signature validation failed")]
    SignatureValidation,

    /// A signature nonce was presented twice inside its validity window.
    #[error("Nonce replayed: {nonce}")]
    NonceReplayed {
        /// The nonce that was already seen.
        nonce: String,
    },
}

impl AuthError {
    /// Creates an [`AuthError::InvalidKey`].
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }

    /// Creates an [`AuthError::Thumbprint`].
    #[must_use]
    pub fn thumbprint(message: impl Into<String>) -> Self {
        Self::Thumbprint(message.into())
    }

    /// Creates an [`AuthError::InvalidTokenFormat`].
    #[must_use]
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat(message.into())
    }

    /// Creates an [`AuthError::MissingClaim`].
    #[must_use]
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim(claim.into())
    }

    /// Creates an [`AuthError::UnsupportedAlgorithm`].
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(message.into())
    }

    /// Creates an [`AuthError::UnknownSigningKey`].
    #[must_use]
    pub fn unknown_signing_key(kid: impl Into<String>) -> Self {
        Self::UnknownSigningKey { kid: kid.into() }
    }

    /// Creates an [`AuthError::NonceReplayed`].
    #[must_use]
    pub fn nonce_replayed(nonce: impl Into<String>) -> Self {
        Self::NonceReplayed { nonce: nonce.into() }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => {
                AuthError::InvalidTokenFormat("Invalid JWT structure".into())
            },
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::InvalidAudience => {
                AuthError::InvalidAudience("Audience validation failed".into())
            },
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer("Issuer validation failed".into()),
            ErrorKind::InvalidAlgorithm => {
                AuthError::UnsupportedAlgorithm("Algorithm not supported".into())
            },
            ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
            _ => AuthError::InvalidTokenFormat(format!("JWT error: {err}")),
        }
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
