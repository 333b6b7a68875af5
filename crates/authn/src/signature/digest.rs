//! `Content-Digest` checks (RFC 9530).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use super::fields::{BareItem, Member, parse_dictionary};

/// Header carrying the body digest.
pub const CONTENT_DIGEST: &str = "content-digest";

/// When a request body digest must be present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestPolicy {
    /// A `Content-Digest` header must be present and covered by every signature.
    #[default]
    Required,
    /// A `Content-Digest` header is checked when present.
    IfPresent,
}

/// Why a digest was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestMismatch {
    /// The header is not a dictionary of byte sequences.
    Malformed,
    /// No member uses a supported algorithm.
    NoSupportedAlgorithm,
    /// A supported member does not match the body.
    Mismatch,
}

/// Computes the digest of `body` under a supported algorithm name.
#[must_use]
pub fn compute(algorithm: &str, body: &[u8]) -> Option<Vec<u8>> {
    match algorithm {
        "sha-256" => Some(Sha256::digest(body).to_vec()),
        "sha-512" => Some(Sha512::digest(body).to_vec()),
        _ => None,
    }
}

/// Checks a `Content-Digest` header value against `body`.
///
/// Every member with a supported algorithm must match; members with
/// unknown algorithms are ignored, but at least one must be supported.
///
/// # Errors
///
/// Returns the [`DigestMismatch`] reason.
pub fn verify(header: &str, body: &[u8]) -> Result<(), DigestMismatch> {
    let members = parse_dictionary(header).map_err(|_| DigestMismatch::Malformed)?;
    let mut checked = 0usize;
    for (algorithm, member) in members {
        let Member::Item(item) = member else {
            return Err(DigestMismatch::Malformed);
        };
        let BareItem::ByteSeq(claimed) = item.value else {
            return Err(DigestMismatch::Malformed);
        };
        let Some(actual) = compute(&algorithm, body) else {
            continue;
        };
        if actual != claimed {
            return Err(DigestMismatch::Mismatch);
        }
        checked += 1;
    }
    if checked == 0 {
        return Err(DigestMismatch::NoSupportedAlgorithm);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use rstest::rstest;

    use super::*;

    const BODY: &[u8] = b"{\"hello\": \"world\"}\n";

    /// Digests of `BODY`.
    const SHA256: &str = "sha-256=:RK/0qy18MlBSVnWgjwz6lZEWjP/lF5HF9bvEF8FabDg=:";
    const SHA512: &str = "sha-512=:YMAam51Jz/jOATT6/zvHrLVgOYTGFy1d6GJiOHTohq4yP+pgk4vf2aCsyRZOtw8MjkM7iw7yZ/WkppmM44T3qg==:";

    #[rstest]
    #[case::sha256(SHA256)]
    #[case::sha512(SHA512)]
    #[case::both(&format!("{SHA256}, {SHA512}"))]
    #[case::unknown_ignored(&format!("md5=:AAAA:, {SHA256}"))]
    fn test_matching_digests(#[case] header: &str) {
        assert_eq!(verify(header, BODY), Ok(()));
    }

    #[test]
    fn test_tampered_body() {
        assert_eq!(verify(SHA256, b"{\"hello\": \"there\"}\n"), Err(DigestMismatch::Mismatch));
    }

    #[test]
    fn test_one_bad_member_fails_all() {
        let header = format!("{SHA256}, sha-512=:{}:", STANDARD.encode([0u8; 64]));
        assert_eq!(verify(&header, BODY), Err(DigestMismatch::Mismatch));
    }

    #[rstest]
    #[case::only_unknown("md5=:AAAA:", DigestMismatch::NoSupportedAlgorithm)]
    #[case::not_bytes("sha-256=\"abc\"", DigestMismatch::Malformed)]
    #[case::garbage("%%%", DigestMismatch::Malformed)]
    fn test_rejected(#[case] header: &str, #[case] reason: DigestMismatch) {
        assert_eq!(verify(header, BODY), Err(reason));
    }

    #[test]
    fn test_compute_matches_header_encoding() {
        let digest = compute("sha-256", BODY).unwrap();
        assert_eq!(format!("sha-256=:{}:", STANDARD.encode(digest)), SHA256);
    }
}
