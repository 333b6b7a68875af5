//! Proof-of-possession verification of signed requests.

use std::{sync::Arc, time::Duration};

use bon::Builder;
use chrono::Utc;
use lollipop_storage::keys::AssertionRef;
use serde::{Deserialize, Serialize};

use super::{
    algorithm::AlgorithmRegistry,
    digest::{self, CONTENT_DIGEST, DigestMismatch, DigestPolicy},
    fields::{BareItem, Item, Member, Parameters, parse_dictionary},
    request::{SignedRequest, signature_base},
};
use crate::{error::AuthError, jwk::PublicJwk, replay::ReplayDetector};

/// Header listing covered components and parameters per signature.
pub const SIGNATURE_INPUT: &str = "signature-input";

/// Header carrying the signature bytes per label.
pub const SIGNATURE: &str = "signature";

/// Default tolerance for `created` timestamps ahead of the local clock.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Replay window used when no maximum signature age is configured.
pub const DEFAULT_NONCE_WINDOW: Duration = Duration::from_secs(300);

fn default_clock_skew() -> Duration {
    DEFAULT_CLOCK_SKEW
}

/// Verification policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(deny_unknown_fields)]
pub struct VerifierConfig {
    /// Whether the body digest is mandatory.
    #[serde(default)]
    #[builder(default)]
    pub digest_policy: DigestPolicy,

    /// Oldest acceptable `created` timestamp, relative to now. When set,
    /// signatures without `created` are rejected.
    #[serde(default, with = "humantime_serde::option")]
    pub max_signature_age: Option<Duration>,

    /// How far in the future a `created` timestamp may lie.
    #[serde(default = "default_clock_skew", with = "humantime_serde")]
    #[builder(default = DEFAULT_CLOCK_SKEW)]
    pub clock_skew: Duration,

    /// Whether every signature must carry a `nonce`.
    #[serde(default)]
    #[builder(default)]
    pub require_nonce: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Why a request was rejected. Only ever logged, never returned.
#[derive(Debug)]
enum Rejection {
    Digest(DigestMismatch),
    MissingDigest,
    DigestNotCovered,
    MissingHeader(&'static str),
    MalformedHeader(&'static str),
    LabelMismatch,
    NoSignatures,
    Key,
    KeyIdMismatch,
    UnknownAlgorithm,
    AlgorithmRequired,
    CreatedInFuture,
    Stale,
    Expired,
    MissingNonce,
    MissingComponent,
    BadSignature,
    Replayed,
}

#[derive(Debug)]
struct ParsedSignature {
    label: String,
    covered: Vec<Item>,
    params: Parameters,
    signature: Vec<u8>,
}

impl ParsedSignature {
    fn string_param(&self, key: &str) -> Result<Option<&str>, Rejection> {
        match self.params.get(key) {
            None => Ok(None),
            Some(BareItem::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(Rejection::MalformedHeader(SIGNATURE_INPUT)),
        }
    }

    fn integer_param(&self, key: &str) -> Result<Option<i64>, Rejection> {
        match self.params.get(key) {
            None => Ok(None),
            Some(BareItem::Integer(i)) => Ok(Some(*i)),
            Some(_) => Err(Rejection::MalformedHeader(SIGNATURE_INPUT)),
        }
    }

    fn covers(&self, name: &str) -> bool {
        self.covered.iter().any(|c| matches!(&c.value, BareItem::String(s) if s == name))
    }
}

type SignatureInput = (String, Vec<Item>, Parameters);

fn signature_inputs(request: &SignedRequest) -> Result<Vec<SignatureInput>, Rejection> {
    let header =
        request.header(SIGNATURE_INPUT).ok_or(Rejection::MissingHeader(SIGNATURE_INPUT))?;
    parse_dictionary(&header)
        .map_err(|_| Rejection::MalformedHeader(SIGNATURE_INPUT))?
        .into_iter()
        .map(|(label, member)| match member {
            Member::InnerList(covered, params) => Ok((label, covered, params)),
            Member::Item(_) => Err(Rejection::MalformedHeader(SIGNATURE_INPUT)),
        })
        .collect()
}

fn parse_signatures(request: &SignedRequest) -> Result<Vec<ParsedSignature>, Rejection> {
    let inputs = signature_inputs(request)?;
    let header = request.header(SIGNATURE).ok_or(Rejection::MissingHeader(SIGNATURE))?;
    let mut signatures =
        parse_dictionary(&header).map_err(|_| Rejection::MalformedHeader(SIGNATURE))?;

    if inputs.is_empty() {
        return Err(Rejection::NoSignatures);
    }
    if inputs.len() != signatures.len() {
        return Err(Rejection::LabelMismatch);
    }

    let mut parsed = Vec::with_capacity(inputs.len());
    for (label, covered, params) in inputs {
        let index =
            signatures.iter().position(|(l, _)| *l == label).ok_or(Rejection::LabelMismatch)?;
        let (_, member) = signatures.swap_remove(index);
        let Member::Item(Item { value: BareItem::ByteSeq(signature), .. }) = member else {
            return Err(Rejection::MalformedHeader(SIGNATURE));
        };
        parsed.push(ParsedSignature { label, covered, params, signature });
    }
    Ok(parsed)
}

/// The identifier a signed request claims to be signed with.
///
/// Every signature that names a `keyid` must name the same one, and at
/// least one must name it.
///
/// # Errors
///
/// Returns [`AuthError::SignatureValidation`] if no usable `keyid` is present.
pub fn claimed_assertion_ref(request: &SignedRequest) -> Result<AssertionRef, AuthError> {
    let reject = |reason: Rejection| {
        tracing::debug!(reason = ?reason, "cannot read claimed key id");
        AuthError::SignatureValidation
    };
    let mut claimed: Option<String> = None;
    for (_, _, params) in signature_inputs(request).map_err(reject)? {
        match params.get("keyid") {
            Some(BareItem::String(keyid)) => match &claimed {
                Some(previous) if previous != keyid => {
                    return Err(reject(Rejection::KeyIdMismatch));
                },
                Some(_) => {},
                None => claimed = Some(keyid.clone()),
            },
            Some(_) => return Err(reject(Rejection::MalformedHeader(SIGNATURE_INPUT))),
            None => {},
        }
    }
    let keyid = claimed.ok_or_else(|| reject(Rejection::KeyIdMismatch))?;
    AssertionRef::parse(keyid).map_err(|_| reject(Rejection::KeyIdMismatch))
}

/// Labels of the signatures that verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRequest {
    /// Signature labels, in `Signature-Input` order.
    pub labels: Vec<String>,
}

/// Verifies that a request was signed by the holder of a given key.
#[derive(Clone)]
pub struct PopVerifier {
    config: VerifierConfig,
    registry: AlgorithmRegistry,
    replay: Option<Arc<dyn ReplayDetector>>,
}

impl std::fmt::Debug for PopVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopVerifier")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("replay", &self.replay.is_some())
            .finish()
    }
}

impl PopVerifier {
    /// Creates a verifier with every built-in algorithm and no replay detection.
    #[must_use]
    pub fn new(config: VerifierConfig) -> Self {
        Self { config, registry: AlgorithmRegistry::default(), replay: None }
    }

    /// Replaces the algorithm registry.
    #[must_use]
    pub fn with_registry(mut self, registry: AlgorithmRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Rejects signatures whose nonce was already accepted.
    #[must_use]
    pub fn with_replay_detector(mut self, detector: Arc<dyn ReplayDetector>) -> Self {
        self.replay = Some(detector);
        self
    }

    /// The active policy.
    #[must_use]
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verifies `request` against `pub_key`, the key stored for `assertion_ref`.
    ///
    /// Every signature on the request must verify; a single failure fails
    /// the request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SignatureValidation`] for every kind of failure.
    #[tracing::instrument(skip_all, fields(assertion_ref = %assertion_ref))]
    pub async fn verify(
        &self,
        request: &SignedRequest,
        pub_key: &str,
        assertion_ref: &AssertionRef,
    ) -> Result<VerifiedRequest, AuthError> {
        match self.check(request, pub_key, assertion_ref).await {
            Ok(verified) => {
                tracing::debug!(signatures = verified.labels.len(), "request signature verified");
                Ok(verified)
            },
            Err(reason) => {
                tracing::debug!(reason = ?reason, "request signature rejected");
                Err(AuthError::SignatureValidation)
            },
        }
    }

    async fn check(
        &self,
        request: &SignedRequest,
        pub_key: &str,
        assertion_ref: &AssertionRef,
    ) -> Result<VerifiedRequest, Rejection> {
        match (self.config.digest_policy, request.header(CONTENT_DIGEST)) {
            (_, Some(header)) => digest::verify(&header, &request.body).map_err(Rejection::Digest)?,
            (DigestPolicy::Required, None) => return Err(Rejection::MissingDigest),
            (DigestPolicy::IfPresent, None) => {},
        }

        let signatures = parse_signatures(request)?;
        let key = PublicJwk::decode(pub_key).map_err(|_| Rejection::Key)?;
        let now = Utc::now().timestamp();

        let mut nonces = Vec::new();
        for signature in &signatures {
            self.check_params(signature, assertion_ref, now)?;
            if let Some(nonce) = signature.string_param("nonce")?
                && !nonces.iter().any(|seen| seen == nonce)
            {
                nonces.push(nonce.to_owned());
            }

            let algorithm = match signature.string_param("alg")? {
                Some(alg) => self.registry.get(alg).ok_or(Rejection::UnknownAlgorithm)?,
                None => self.registry.for_key(&key).ok_or(Rejection::AlgorithmRequired)?,
            };
            let base = signature_base(request, &signature.covered, &signature.params)
                .ok_or(Rejection::MissingComponent)?;
            if !algorithm.verify(&key, base.as_bytes(), &signature.signature) {
                return Err(Rejection::BadSignature);
            }
        }

        if let Some(replay) = &self.replay {
            let window = self.config.max_signature_age.unwrap_or(DEFAULT_NONCE_WINDOW);
            for nonce in &nonces {
                replay.check_and_mark(nonce, window).await.map_err(|_| Rejection::Replayed)?;
            }
        }

        Ok(VerifiedRequest { labels: signatures.into_iter().map(|s| s.label).collect() })
    }

    fn check_params(
        &self,
        signature: &ParsedSignature,
        assertion_ref: &AssertionRef,
        now: i64,
    ) -> Result<(), Rejection> {
        if let Some(keyid) = signature.string_param("keyid")?
            && keyid != assertion_ref.as_str()
        {
            return Err(Rejection::KeyIdMismatch);
        }

        if self.config.digest_policy == DigestPolicy::Required && !signature.covers(CONTENT_DIGEST)
        {
            return Err(Rejection::DigestNotCovered);
        }

        let skew = i64::try_from(self.config.clock_skew.as_secs()).unwrap_or(i64::MAX);
        let created = signature.integer_param("created")?;
        if let Some(created) = created
            && created > now.saturating_add(skew)
        {
            return Err(Rejection::CreatedInFuture);
        }
        if let Some(max_age) = self.config.max_signature_age {
            let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
            match created {
                Some(created) if now.saturating_sub(created) <= max_age => {},
                _ => return Err(Rejection::Stale),
            }
        }
        if let Some(expires) = signature.integer_param("expires")?
            && expires < now
        {
            return Err(Rejection::Expired);
        }

        if self.config.require_nonce && signature.string_param("nonce")?.is_none() {
            return Err(Rejection::MissingNonce);
        }
        Ok(())
    }
}
