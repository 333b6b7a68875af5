//! Access token header checks.
//!
//! Tokens are only ever signed with Ed25519. These checks run on the
//! unverified header, before any key is selected, so that a forged header
//! cannot steer verification towards a weaker algorithm or an arbitrary key.

use crate::error::AuthError;

/// Algorithms that are never accepted: `none` and the symmetric HMAC family.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Algorithms access tokens may be signed with.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["EdDSA"];

/// Longest accepted `kid` header value.
pub const MAX_KID_LEN: usize = 128;

/// Checks a token header algorithm against [`ACCEPTED_ALGORITHMS`].
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] for forbidden or unlisted
/// algorithms.
///
/// # Examples
///
/// ```
/// use lollipop_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("RS256").is_err());
/// assert!(validate_algorithm("HS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not in accepted list (only EdDSA is supported)"
        )));
    }

    Ok(())
}

/// Checks the shape of a `kid` header value.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if the value is empty, longer
/// than [`MAX_KID_LEN`], or contains characters outside `[A-Za-z0-9._-]`.
pub fn validate_kid(kid: &str) -> Result<(), AuthError> {
    if kid.is_empty() || kid.len() > MAX_KID_LEN {
        return Err(AuthError::invalid_token_format(format!(
            "kid must be 1 to {MAX_KID_LEN} characters"
        )));
    }
    if !kid.bytes().all(|c| c.is_ascii_alphanumeric() || matches!(c, b'.' | b'_' | b'-')) {
        return Err(AuthError::invalid_token_format("kid contains invalid characters"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_eddsa_accepted() {
        assert!(validate_algorithm("EdDSA").is_ok());
    }

    #[test]
    fn test_forbidden_algorithms_rejected_with_security_message() {
        for alg in FORBIDDEN_ALGORITHMS {
            let result = validate_algorithm(alg);
            assert!(
                matches!(result, Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("not allowed for security reasons")),
                "expected security rejection for '{alg}'"
            );
        }
    }

    #[rstest]
    #[case("RS256")]
    #[case("ES256")]
    #[case("PS512")]
    fn test_unlisted_algorithms_rejected(#[case] alg: &str) {
        assert!(
            matches!(validate_algorithm(alg), Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("not in accepted list"))
        );
    }

    #[rstest]
    #[case("primary")]
    #[case("key-2026.01_a")]
    fn test_valid_kids(#[case] kid: &str) {
        assert!(validate_kid(kid).is_ok());
    }

    #[rstest]
    #[case::empty("")]
    #[case::path("../etc/passwd")]
    #[case::space("a b")]
    #[case::too_long(&"k".repeat(MAX_KID_LEN + 1))]
    fn test_invalid_kids(#[case] kid: &str) {
        assert!(matches!(validate_kid(kid), Err(AuthError::InvalidTokenFormat(_))));
    }
}
