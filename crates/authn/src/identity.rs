//! Identity derivation for public keys.
//!
//! A public key is known under one identifier per hash algorithm
//! (`<algorithm>-<thumbprint>`). One algorithm is the master: its identifier
//! is the canonical one, and every key is reachable through it even when the
//! client only ever uses another algorithm.

use lollipop_storage::keys::{AssertionRef, HashAlgorithm};

use crate::{error::AuthError, jwk::PublicJwk};

/// Computes the identifier of `pub_key` under `algorithm`.
///
/// # Errors
///
/// Returns [`AuthError::InvalidKey`] if the key cannot be decoded and
/// [`AuthError::Thumbprint`] if the thumbprint does not form a valid
/// identifier.
pub fn derive_assertion_ref(
    pub_key: &str,
    algorithm: HashAlgorithm,
) -> Result<AssertionRef, AuthError> {
    let jwk = PublicJwk::decode(pub_key)?;
    thumbprint_ref(&jwk, algorithm)
}

fn thumbprint_ref(jwk: &PublicJwk, algorithm: HashAlgorithm) -> Result<AssertionRef, AuthError> {
    let thumbprint = jwk.thumbprint(algorithm)?;
    AssertionRef::from_parts(algorithm, &thumbprint)
        .map_err(|e| AuthError::thumbprint(format!("{algorithm} thumbprint rejected: {e}")))
}

/// Whether `assertion_ref` is an identifier under the `master` algorithm.
///
/// The three algorithms have disjoint prefixes and thumbprint lengths, so a
/// parsed identifier is classified by its grammar alone.
#[must_use]
pub fn is_master(assertion_ref: &AssertionRef, master: HashAlgorithm) -> bool {
    assertion_ref.uses(master)
}

/// Every identifier a reservation for `pub_key` must create.
///
/// The master identifier always comes first; the `requested` one follows
/// when it differs.
///
/// # Errors
///
/// Same as [`derive_assertion_ref`].
pub fn all_assertion_refs_for(
    pub_key: &str,
    requested: HashAlgorithm,
    master: HashAlgorithm,
) -> Result<Vec<AssertionRef>, AuthError> {
    let jwk = PublicJwk::decode(pub_key)?;
    let mut refs = vec![thumbprint_ref(&jwk, master)?];
    if requested != master {
        refs.push(thumbprint_ref(&jwk, requested)?);
    }
    Ok(refs)
}

/// The canonical identifier of a key, paired with the non-master identifier
/// the client used, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterAndUsed {
    /// Identifier under the master algorithm.
    pub master: AssertionRef,
    /// Identifier under another algorithm, when that is what the client used.
    pub used: Option<AssertionRef>,
}

impl MasterAndUsed {
    /// Identifiers in write order: master first.
    pub fn iter(&self) -> impl Iterator<Item = &AssertionRef> {
        std::iter::once(&self.master).chain(self.used.as_ref())
    }
}

/// Resolves the master identifier for a key known by `used`.
///
/// When `used` already is a master identifier it is returned as the master
/// and no separate used identifier exists.
///
/// # Errors
///
/// Returns [`AuthError::InvalidKey`] if `pub_key` cannot be decoded and
/// [`AuthError::Thumbprint`] if the master thumbprint cannot be computed.
pub fn resolve_master_and_used(
    master: HashAlgorithm,
    used: &AssertionRef,
    pub_key: &str,
) -> Result<MasterAndUsed, AuthError> {
    if is_master(used, master) {
        return Ok(MasterAndUsed { master: used.clone(), used: None });
    }
    let jwk = PublicJwk::decode(pub_key)
        .map_err(|e| AuthError::invalid_key(format!("cannot decode key of {used}: {e}")))?;
    let master_ref = thumbprint_ref(&jwk, master)?;
    Ok(MasterAndUsed { master: master_ref, used: Some(used.clone()) })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::testutil::TestKeyPair;

    fn ed25519_pub_key() -> String {
        TestKeyPair::ed25519().jwk()
    }

    #[test]
    fn test_derive_is_deterministic() {
        let pk = ed25519_pub_key();
        let a = derive_assertion_ref(&pk, HashAlgorithm::Sha256).unwrap();
        let b = derive_assertion_ref(&pk, HashAlgorithm::Sha256).unwrap();
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("sha256-"));
    }

    #[test]
    fn test_derive_rejects_garbage() {
        assert!(matches!(
            derive_assertion_ref("not-a-key", HashAlgorithm::Sha512),
            Err(AuthError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_all_refs_for_master_request() {
        let refs =
            all_assertion_refs_for(&ed25519_pub_key(), HashAlgorithm::Sha512, HashAlgorithm::Sha512)
                .unwrap();
        assert_eq!(refs.len(), 1);
        assert!(is_master(&refs[0], HashAlgorithm::Sha512));
    }

    #[test]
    fn test_all_refs_for_non_master_request_puts_master_first() {
        let refs =
            all_assertion_refs_for(&ed25519_pub_key(), HashAlgorithm::Sha256, HashAlgorithm::Sha512)
                .unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].algorithm(), HashAlgorithm::Sha512);
        assert_eq!(refs[1].algorithm(), HashAlgorithm::Sha256);
    }

    #[test]
    fn test_resolve_master_input_has_no_used() {
        let pk = ed25519_pub_key();
        let master = derive_assertion_ref(&pk, HashAlgorithm::Sha512).unwrap();
        let resolved = resolve_master_and_used(HashAlgorithm::Sha512, &master, &pk).unwrap();
        assert_eq!(resolved.master, master);
        assert!(resolved.used.is_none());
        assert_eq!(resolved.iter().count(), 1);
    }

    #[test]
    fn test_resolve_reports_undecodable_key() {
        let used = AssertionRef::parse("sha256-abc").unwrap();
        let err = resolve_master_and_used(HashAlgorithm::Sha512, &used, "%%%").unwrap_err();
        assert!(matches!(err, AuthError::InvalidKey(ref msg) if msg.contains("sha256-abc")));
    }

    mod proptests {
        use super::*;

        fn non_master() -> impl Strategy<Value = HashAlgorithm> {
            prop_oneof![Just(HashAlgorithm::Sha256), Just(HashAlgorithm::Sha384)]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn used_is_input_and_master_differs(seed in any::<[u8; 32]>(), alg in non_master()) {
                let pk = TestKeyPair::ed25519_from_seed(seed).jwk();
                let used = derive_assertion_ref(&pk, alg).unwrap();

                let resolved = resolve_master_and_used(HashAlgorithm::Sha512, &used, &pk).unwrap();

                prop_assert_eq!(resolved.used.as_ref(), Some(&used));
                prop_assert_ne!(&resolved.master, &used);
                prop_assert_eq!(
                    resolved.master,
                    derive_assertion_ref(&pk, HashAlgorithm::Sha512).unwrap()
                );
            }

            #[test]
            fn classification_matches_algorithm(seed in any::<[u8; 32]>()) {
                let pk = TestKeyPair::ed25519_from_seed(seed).jwk();
                for alg in HashAlgorithm::ALL {
                    let r = derive_assertion_ref(&pk, alg).unwrap();
                    prop_assert_eq!(is_master(&r, HashAlgorithm::Sha512), alg == HashAlgorithm::Sha512);
                    let reparsed = AssertionRef::parse(r.as_str()).unwrap();
                    prop_assert_eq!(reparsed.algorithm(), alg);
                }
            }
        }
    }
}
