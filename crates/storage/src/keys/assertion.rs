//! Identifier grammars for proof-of-possession keys.
//!
//! Every value that reaches the key store passes through one of the validated
//! newtypes in this module:
//!
//! | Type | Grammar |
//! |------|---------|
//! | [`AssertionRef`] | `sha256-[A-Za-z0-9_=-]{1,44}`, `sha384-…{1,66}`, `sha512-…{1,88}` |
//! | [`FiscalCode`] | `[A-Z]{6}[0-9LMNPQRSTUV]{2}[ABCDEHLMPRST][0-9LMNPQRSTUV]{2}[A-Z][0-9LMNPQRSTUV]{3}[A-Z]` |
//! | [`AssertionFileName`] | `<fiscal code>-<assertion ref>` |
//!
//! The three thumbprint length ranges are the base64url lengths of the
//! respective digests, so the algorithm prefix and the length agree for any
//! identifier produced by the identity deriver.
//!
//! [`FiscalCode`] and [`AssertionFileName`] identify a citizen. Neither
//! implements `Display`, and their `Debug` output is redacted, so they cannot
//! end up in a log line by accident.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a value does not match its grammar.
///
/// Messages never echo the rejected input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum GrammarError {
    /// Unknown hash algorithm name.
    #[error("unsupported hash algorithm")]
    Algorithm,

    /// Malformed assertion reference.
    #[error("malformed assertion reference")]
    AssertionRef,

    /// Malformed fiscal code.
    #[error("malformed fiscal code")]
    FiscalCode,

    /// Malformed assertion file name.
    #[error("malformed assertion file name")]
    AssertionFileName,
}

/// Hash algorithms a key thumbprint can be computed with.
///
/// Ordered weakest to strongest; the ordering is used when listing the
/// identifiers of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256, 32-byte digest.
    Sha256,
    /// SHA-384, 48-byte digest.
    Sha384,
    /// SHA-512, 64-byte digest.
    Sha512,
}

impl HashAlgorithm {
    /// All supported algorithms, in order.
    pub const ALL: [HashAlgorithm; 3] = [Self::Sha256, Self::Sha384, Self::Sha512];

    /// The lowercase name used as identifier prefix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Maximum thumbprint length accepted after the `<algorithm>-` prefix.
    #[must_use]
    pub const fn max_thumbprint_len(self) -> usize {
        match self {
            Self::Sha256 => 44,
            Self::Sha384 => 66,
            Self::Sha512 => 88,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = GrammarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|alg| alg.as_str() == s).ok_or(GrammarError::Algorithm)
    }
}

fn is_thumbprint_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '-')
}

/// Canonical identifier of a public key under one hash algorithm:
/// `"<algorithm>-<base64url thumbprint>"`.
///
/// Safe to log; it is a hash of public material.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssertionRef {
    value: String,
    algorithm: HashAlgorithm,
}

impl AssertionRef {
    /// Validates and wraps an identifier string.
    ///
    /// # Errors
    ///
    /// Returns [`GrammarError::AssertionRef`] when the string does not match
    /// any of the three identifier grammars.
    pub fn parse(value: impl Into<String>) -> Result<Self, GrammarError> {
        let value = value.into();
        let (prefix, thumbprint) = value.split_once('-').ok_or(GrammarError::AssertionRef)?;
        let algorithm: HashAlgorithm = prefix.parse().map_err(|_| GrammarError::AssertionRef)?;

        let len = thumbprint.chars().count();
        if len == 0
            || len > algorithm.max_thumbprint_len()
            || !thumbprint.chars().all(is_thumbprint_char)
        {
            return Err(GrammarError::AssertionRef);
        }

        Ok(Self { value, algorithm })
    }

    /// Builds an identifier from an algorithm and an encoded thumbprint.
    ///
    /// # Errors
    ///
    /// Returns [`GrammarError::AssertionRef`] when the thumbprint violates the
    /// algorithm's grammar.
    pub fn from_parts(algorithm: HashAlgorithm, thumbprint: &str) -> Result<Self, GrammarError> {
        Self::parse(format!("{algorithm}-{thumbprint}"))
    }

    /// The algorithm named by the identifier prefix.
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The thumbprint part, without the algorithm prefix.
    #[must_use]
    pub fn thumbprint(&self) -> &str {
        &self.value[self.algorithm.as_str().len() + 1..]
    }

    /// Whether this identifier uses `master`.
    #[must_use]
    pub fn uses(&self, master: HashAlgorithm) -> bool {
        self.algorithm == master
    }

    /// The full identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for AssertionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AssertionRef").field(&self.value).finish()
    }
}

impl fmt::Display for AssertionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl FromStr for AssertionRef {
    type Err = GrammarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AssertionRef {
    type Error = GrammarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AssertionRef> for String {
    fn from(value: AssertionRef) -> Self {
        value.value
    }
}

const OMOCODE_DIGITS: &str = "0123456789LMNPQRSTUV";
const MONTH_LETTERS: &str = "ABCDEHLMPRST";

/// Italian fiscal code of the key owner.
///
/// Debug output is redacted and there is no `Display`; use
/// [`expose`](Self::expose) where the raw value is genuinely needed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FiscalCode(String);

impl FiscalCode {
    /// Length of every fiscal code.
    pub const LEN: usize = 16;

    /// Validates and wraps a fiscal code.
    ///
    /// # Errors
    ///
    /// Returns [`GrammarError::FiscalCode`] on any grammar violation.
    pub fn parse(value: impl Into<String>) -> Result<Self, GrammarError> {
        let value = value.into();
        let bytes = value.as_bytes();
        if bytes.len() != Self::LEN {
            return Err(GrammarError::FiscalCode);
        }

        let upper = |b: u8| b.is_ascii_uppercase();
        let digit = |b: u8| OMOCODE_DIGITS.as_bytes().contains(&b);
        let month = |b: u8| MONTH_LETTERS.as_bytes().contains(&b);

        let valid = bytes[..6].iter().all(|b| upper(*b))
            && bytes[6..8].iter().all(|b| digit(*b))
            && month(bytes[8])
            && bytes[9..11].iter().all(|b| digit(*b))
            && upper(bytes[11])
            && bytes[12..15].iter().all(|b| digit(*b))
            && upper(bytes[15]);

        if valid { Ok(Self(value)) } else { Err(GrammarError::FiscalCode) }
    }

    /// The raw fiscal code.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FiscalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FiscalCode(<redacted>)")
    }
}

impl TryFrom<String> for FiscalCode {
    type Error = GrammarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<FiscalCode> for String {
    fn from(value: FiscalCode) -> Self {
        value.0
    }
}

/// Name under which the raw assertion of an activated key is stored:
/// `"<fiscal code>-<assertion ref>"`.
///
/// Embeds the fiscal code, so it is redacted like [`FiscalCode`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssertionFileName(String);

impl AssertionFileName {
    /// Joins an owner and an identifier. Both halves are already validated.
    #[must_use]
    pub fn new(owner: &FiscalCode, assertion_ref: &AssertionRef) -> Self {
        Self(format!("{}-{}", owner.expose(), assertion_ref))
    }

    /// Validates a raw file name.
    ///
    /// # Errors
    ///
    /// Returns [`GrammarError::AssertionFileName`] when either half is malformed.
    pub fn parse(value: impl Into<String>) -> Result<Self, GrammarError> {
        let value = value.into();
        let (owner, assertion_ref) = value
            .split_at_checked(FiscalCode::LEN)
            .ok_or(GrammarError::AssertionFileName)?;
        let assertion_ref =
            assertion_ref.strip_prefix('-').ok_or(GrammarError::AssertionFileName)?;

        FiscalCode::parse(owner).map_err(|_| GrammarError::AssertionFileName)?;
        AssertionRef::parse(assertion_ref).map_err(|_| GrammarError::AssertionFileName)?;

        Ok(Self(value))
    }

    /// The identifier half of the name.
    #[must_use]
    pub fn assertion_ref(&self) -> &str {
        &self.0[FiscalCode::LEN + 1..]
    }

    /// The raw file name.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AssertionFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssertionFileName(<redacted>-{})", self.assertion_ref())
    }
}

impl TryFrom<String> for AssertionFileName {
    type Error = GrammarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AssertionFileName> for String {
    fn from(value: AssertionFileName) -> Self {
        value.0
    }
}

/// Kind of identity assertion presented at activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssertionType {
    /// SAML 2.0 assertion.
    Saml,
    /// OpenID Connect ID token.
    Oidc,
}
