//! The key lifecycle engine.
//!
//! A logical key is known by its master identifier and, when the client uses
//! another hash algorithm, by a used identifier as well. The engine keeps the
//! two records in step through every transition:
//!
//! ```text
//!   reserve ──► PENDING ──activate──► VALID ──revoke──► REVOKED
//! ```
//!
//! Both activation and revocation write the master record first. A failure
//! between the two writes therefore leaves the master in the more advanced
//! state, never the used record.
//!
//! Every new version is written against the version it was derived from
//! ([`PopKeyStore::upsert_after`]), so two activations racing on the same
//! pending record cannot both succeed: the loser gets
//! [`LifecycleError::Forbidden`].

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use lollipop_authn::{
    identity::{MasterAndUsed, all_assertion_refs_for, derive_assertion_ref, resolve_master_and_used},
    signature::{PopVerifier, SignedRequest, VerifierConfig, claimed_assertion_ref},
    token::{AccessToken, TokenScope, TokenService},
};
use lollipop_storage::{
    AssertionBlobStore, BlobError, ConfigError, KeyStoreError, PopKeyStore,
    keys::{
        ActivatedPopKey, AssertionFileName, AssertionRef, AssertionType, FiscalCode,
        HashAlgorithm, KeyStatus, PopKey, StoredPopKey,
    },
};

use crate::{
    config::LifecycleConfig,
    error::{LifecycleError, Result},
    retry::{with_retry, with_timeout},
};

/// The records created by a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// The `PENDING` record at the master identifier.
    pub master: StoredPopKey,
    /// The `PENDING` record at the requested identifier, when it is not the master.
    pub used: Option<StoredPopKey>,
}

impl Reservation {
    /// The record for the identifier the client asked for.
    #[must_use]
    pub fn requested(&self) -> &StoredPopKey {
        self.used.as_ref().unwrap_or(&self.master)
    }

    /// All records, master first.
    pub fn records(&self) -> impl Iterator<Item = &StoredPopKey> {
        std::iter::once(&self.master).chain(self.used.as_ref())
    }
}

/// Input of [`LifecycleEngine::activate`].
#[derive(Clone, bon::Builder)]
pub struct ActivationRequest {
    /// The pending identifier to activate.
    pub assertion_ref: AssertionRef,
    /// Fiscal code of the owner, as found in the assertion.
    #[builder(into)]
    pub login_fiscal_code: String,
    /// Kind of assertion presented.
    pub assertion_type: AssertionType,
    /// When the key stops being usable for new sessions.
    pub expired_at: DateTime<Utc>,
    /// The raw assertion, stored verbatim.
    #[builder(into)]
    pub assertion: Bytes,
}

impl std::fmt::Debug for ActivationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationRequest")
            .field("assertion_ref", &self.assertion_ref)
            .field("login_fiscal_code", &"<redacted>")
            .field("assertion_type", &self.assertion_type)
            .field("expired_at", &self.expired_at)
            .field("assertion_len", &self.assertion.len())
            .finish()
    }
}

/// Result of [`LifecycleEngine::generate_access_params`].
#[derive(Debug, Clone)]
pub struct AccessParams {
    /// The `VALID` record the token is bound to.
    pub key: StoredPopKey,
    /// The minted token.
    pub access_token: AccessToken,
}

/// Orchestrates reserve, activate and revoke over the key and assertion stores.
pub struct LifecycleEngine {
    keys: Arc<dyn PopKeyStore>,
    assertions: Arc<dyn AssertionBlobStore>,
    tokens: Arc<dyn TokenService>,
    verifier: PopVerifier,
    config: LifecycleConfig,
}

impl std::fmt::Debug for LifecycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEngine")
            .field("verifier", &self.verifier)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl LifecycleEngine {
    /// Creates an engine over its collaborators.
    ///
    /// `verifier` defaults to [`PopVerifier`] with [`VerifierConfig::default`],
    /// `config` to [`LifecycleConfig::default`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    #[builder]
    pub fn new(
        keys: Arc<dyn PopKeyStore>,
        assertions: Arc<dyn AssertionBlobStore>,
        tokens: Arc<dyn TokenService>,
        verifier: Option<PopVerifier>,
        #[builder(default)] config: LifecycleConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let verifier = verifier.unwrap_or_else(|| PopVerifier::new(VerifierConfig::default()));
        Ok(Self { keys, assertions, tokens, verifier, config })
    }
}

impl LifecycleEngine {
    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    fn master(&self) -> HashAlgorithm {
        self.config.master_algorithm
    }

    // -----------------------------------------------------------------------
    // Reserve
    // -----------------------------------------------------------------------

    /// Creates `PENDING` records for `pub_key` under the master algorithm and,
    /// when it differs, under `algorithm`.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::Validation`] if the key cannot be decoded
    /// - [`LifecycleError::AlreadyReserved`] if either identifier already has a record; the
    ///   reservation as a whole has then failed even if the other record was written
    /// - [`LifecycleError::Transient`] on store unavailability or timeout
    #[tracing::instrument(skip(self, pub_key), fields(master = %self.master()))]
    pub async fn reserve(&self, pub_key: &str, algorithm: HashAlgorithm) -> Result<Reservation> {
        let refs = all_assertion_refs_for(pub_key, algorithm, self.master())
            .map_err(LifecycleError::from_identity)?;

        let mut created = Vec::with_capacity(refs.len());
        for assertion_ref in refs {
            let record = self.create(PopKey::pending(assertion_ref.clone(), pub_key)).await;
            match record {
                Ok(record) => created.push(record),
                Err(err) => {
                    if !created.is_empty() {
                        tracing::warn!(
                            assertion_ref = %assertion_ref,
                            "reservation failed after master record was created",
                        );
                    }
                    return Err(err);
                },
            }
        }

        let mut created = created.into_iter();
        let master = created
            .next()
            .ok_or_else(|| LifecycleError::internal("reservation produced no records"))?;
        let reservation = Reservation { master, used: created.next() };
        tracing::info!(
            assertion_ref = %reservation.requested().key.assertion_ref(),
            records = reservation.records().count(),
            "key reserved",
        );
        Ok(reservation)
    }

    // -----------------------------------------------------------------------
    // Activate
    // -----------------------------------------------------------------------

    /// Activates a pending key: stores the assertion, then writes `VALID`
    /// records at the master identifier and at the used identifier, in that
    /// order. Returns the record of the requested identifier.
    ///
    /// Re-running an activation that failed after storing the assertion, or
    /// after writing the master record, completes it.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotFound`] if the identifier has no record
    /// - [`LifecycleError::Forbidden`] if it is not `PENDING`, or another activation won the race
    /// - [`LifecycleError::Validation`] if the fiscal code or file name is malformed
    /// - [`LifecycleError::Permanent`] if a different assertion is already stored under the name
    /// - [`LifecycleError::Transient`] on store unavailability or timeout
    #[tracing::instrument(skip_all, fields(assertion_ref = %request.assertion_ref))]
    pub async fn activate(&self, request: ActivationRequest) -> Result<StoredPopKey> {
        let requested = &request.assertion_ref;
        let pending = self
            .find_latest("activate", requested)
            .await?
            .ok_or_else(|| LifecycleError::not_found(requested))?;
        if !pending.key.is_pending() {
            tracing::warn!(status = %pending.key.status(), "activation of a non-pending key");
            return Err(LifecycleError::forbidden(format!(
                "{requested} is {}, only PENDING keys can be activated",
                pending.key.status()
            )));
        }

        let owner = FiscalCode::parse(request.login_fiscal_code.as_str())
            .map_err(|e| LifecycleError::validation(e.to_string()))?;
        let file_name = AssertionFileName::new(&owner, requested);
        AssertionFileName::parse(file_name.expose())
            .map_err(|e| LifecycleError::validation(e.to_string()))?;

        self.store_assertion(&file_name, request.assertion.clone()).await?;

        let pair = resolve_master_and_used(
            self.master(),
            pending.key.assertion_ref(),
            pending.key.pub_key(),
        )
        .map_err(LifecycleError::from_identity)?;
        let activated = ActivatedPopKey::builder()
            .assertion_ref(pair.master.clone())
            .pub_key(pending.key.pub_key())
            .login_fiscal_code(owner)
            .assertion_type(request.assertion_type)
            .assertion_file_name(file_name)
            .expired_at(request.expired_at)
            .build();
        let valid = PopKey::Valid(activated);

        let Some(used) = pair.used else {
            let record =
                self.append("activate", valid, Some(pending.version), lost_activation).await?;
            tracing::info!(version = record.version, "key activated");
            return Ok(record);
        };

        let master_record = self.activate_master(&pair.master, &valid).await?;

        fail::fail_point!("activate-before-used-upsert", |_| {
            Err(LifecycleError::internal("injected failure before used record"))
        });

        let used_key = master_record.key.with_assertion_ref(used);
        let record =
            self.append("activate", used_key, Some(pending.version), lost_activation).await?;
        tracing::info!(
            master = %pair.master,
            master_version = master_record.version,
            version = record.version,
            "key activated",
        );
        Ok(record)
    }

    /// Writes the assertion, accepting an identical one left by an earlier run.
    async fn store_assertion(&self, name: &AssertionFileName, content: Bytes) -> Result<()> {
        let timeout = self.config.operation_timeout;
        let written = with_timeout(timeout, "store_assertion", async {
            self.assertions.write(name, content.clone()).await.map(|()| true).or_else(|e| match e {
                BlobError::AlreadyExists => Ok(false),
                e => Err(LifecycleError::from_blob("store_assertion", e)),
            })
        })
        .await?;
        if written {
            return Ok(());
        }

        let existing = with_timeout(timeout, "store_assertion", async {
            self.assertions
                .read(name)
                .await
                .map_err(|e| LifecycleError::from_blob("store_assertion", e))
        })
        .await?;
        if existing.as_ref() == Some(&content) {
            tracing::debug!("assertion already stored by an earlier attempt");
            Ok(())
        } else {
            tracing::error!("a different assertion is stored under the same file name");
            Err(LifecycleError::permanent("a different assertion is already stored for this key"))
        }
    }

    /// Moves the master record to `valid`, or confirms an earlier run already did.
    ///
    /// The returned record is the payload the used record must mirror: on a
    /// resumed activation that is the stored master, not the new request.
    async fn activate_master(&self, master: &AssertionRef, valid: &PopKey) -> Result<StoredPopKey> {
        let current = self.find_latest("activate", master).await?;
        let expected = match &current {
            None => None,
            Some(record) if record.key.is_pending() => Some(record.version),
            Some(record) => {
                let resumed = record.key.status() == KeyStatus::Valid
                    && record.key.activation().map(|a| &a.assertion_file_name)
                        == valid.activation().map(|a| &a.assertion_file_name);
                if resumed {
                    tracing::info!(master = %master, "master already active, resuming activation");
                    return Ok(record.clone());
                }
                return Err(LifecycleError::forbidden(format!(
                    "master {master} is {}",
                    record.key.status()
                )));
            },
        };
        if current.is_none() {
            tracing::warn!(master = %master, "master record missing, writing it first");
        }
        self.append("activate", valid.clone(), expected, lost_activation).await
    }

    // -----------------------------------------------------------------------
    // Revoke
    // -----------------------------------------------------------------------

    /// Revokes a key at its master identifier and at every used identifier
    /// of the same key, master first. Returns the versions written.
    ///
    /// Revoking an identifier with no record, a pending key, or an already
    /// revoked key writes nothing.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::Transient`] if the master record of a used identifier cannot be read
    ///   after retries, on store unavailability, or when a concurrent writer appended first
    /// - [`LifecycleError::Permanent`] if the stored key or a computed TTL is unusable
    #[tracing::instrument(skip_all, fields(assertion_ref = %assertion_ref))]
    pub async fn revoke(&self, assertion_ref: &AssertionRef) -> Result<Vec<StoredPopKey>> {
        let Some(latest) = self.find_latest("revoke", assertion_ref).await? else {
            tracing::debug!("nothing to revoke");
            return Ok(Vec::new());
        };
        if latest.key.is_pending() {
            tracing::debug!("pending key has nothing to revoke");
            return Ok(Vec::new());
        }

        let pair =
            resolve_master_and_used(self.master(), latest.key.assertion_ref(), latest.key.pub_key())
                .map_err(LifecycleError::from_identity)?;
        let records = self.current_records(&pair, latest).await?;

        let mut revoked = Vec::new();
        for record in records {
            if record.key.status() == KeyStatus::Revoked {
                continue;
            }
            let Some(next) = record.key.revoked() else {
                tracing::warn!(
                    assertion_ref = %record.key.assertion_ref(),
                    "paired record is still pending, skipping",
                );
                continue;
            };
            let written = self.append("revoke", next, Some(record.version), lost_revocation).await?;
            tracing::info!(
                assertion_ref = %written.key.assertion_ref(),
                version = written.version,
                "key revoked",
            );
            revoked.push(written);
        }
        Ok(revoked)
    }

    /// The latest records of `pair`, master first. `latest` is the record
    /// the revocation started from.
    ///
    /// For a master, the records of the same key under every other algorithm.
    async fn current_records(
        &self,
        pair: &MasterAndUsed,
        latest: StoredPopKey,
    ) -> Result<Vec<StoredPopKey>> {
        if pair.used.is_some() {
            let master = with_retry(&self.config.master_lookup_retry, "find_master", || async move {
                self.find_latest("find_master", &pair.master)
                    .await?
                    .ok_or_else(|| LifecycleError::transient("find_master"))
            })
            .await?;
            return Ok(vec![master, latest]);
        }

        let mut records = Vec::new();
        for algorithm in HashAlgorithm::ALL.into_iter().filter(|a| *a != self.master()) {
            let sibling = derive_assertion_ref(latest.key.pub_key(), algorithm)
                .map_err(LifecycleError::from_identity)?;
            if let Some(record) = self.find_latest("revoke", &sibling).await? {
                records.push(record);
            }
        }
        records.insert(0, latest);
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Access
    // -----------------------------------------------------------------------

    /// Mints an access token for `operation_id` on a valid, unexpired key.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::Validation`] if `operation_id` is empty
    /// - [`LifecycleError::Forbidden`] if the identifier has no record, or the key is not `VALID`
    ///   or expired beyond the grace period
    /// - [`LifecycleError::Transient`] on store unavailability or timeout
    #[tracing::instrument(skip_all, fields(assertion_ref = %assertion_ref, operation_id = %operation_id))]
    pub async fn generate_access_params(
        &self,
        assertion_ref: &AssertionRef,
        operation_id: &str,
    ) -> Result<AccessParams> {
        if operation_id.is_empty() {
            return Err(LifecycleError::validation("operation_id must not be empty"));
        }
        let key = self.require_usable(assertion_ref).await?;

        let scope = TokenScope {
            assertion_ref: assertion_ref.clone(),
            operation_id: operation_id.to_owned(),
            ttl: self.config.access_token_ttl,
        };
        let access_token = with_timeout(self.config.operation_timeout, "mint_token", async {
            self.tokens.mint(&scope).await.map_err(|e| LifecycleError::Internal {
                message: "access token could not be minted".into(),
                source: Some(Arc::new(e)),
            })
        })
        .await?;
        tracing::debug!(jti = %access_token.claims.jti, "access token minted");
        Ok(AccessParams { key, access_token })
    }

    /// Returns the stored assertion of a valid key to the bearer of an access
    /// token minted for it.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::Forbidden`] if the token is invalid, bound to another key, or the key
    ///   is missing or no longer usable
    /// - [`LifecycleError::NotFound`] if the key's assertion is missing
    /// - [`LifecycleError::Transient`] on store unavailability or timeout
    #[tracing::instrument(skip_all, fields(assertion_ref = %assertion_ref))]
    pub async fn get_assertion(&self, token: &str, assertion_ref: &AssertionRef) -> Result<Bytes> {
        let claims = with_timeout(self.config.operation_timeout, "validate_token", async {
            self.tokens.validate(token).await.map_err(|e| {
                tracing::debug!(error = %e, "access token rejected");
                LifecycleError::forbidden("invalid access token")
            })
        })
        .await?;
        let bound = claims
            .assertion_ref()
            .map_err(|_| LifecycleError::forbidden("invalid access token"))?;
        if &bound != assertion_ref {
            tracing::warn!(token_subject = %bound, "access token bound to another key");
            return Err(LifecycleError::forbidden("access token is bound to another key"));
        }

        let key = self.require_usable(assertion_ref).await?;
        let name = key
            .key
            .activation()
            .map(|a| a.assertion_file_name.clone())
            .ok_or_else(|| LifecycleError::internal("valid record without activation"))?;
        with_timeout(self.config.operation_timeout, "read_assertion", async {
            self.assertions
                .read(&name)
                .await
                .map_err(|e| LifecycleError::from_blob("read_assertion", e))
        })
        .await?
        .ok_or_else(|| LifecycleError::not_found(assertion_ref))
    }

    /// Verifies that `request` is signed by the key named in its signature
    /// `keyid`, and that the key is valid. Returns the key's record.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::Forbidden`] if the signature is missing or invalid, or the named key
    ///   is missing or not usable
    /// - [`LifecycleError::Transient`] on store unavailability or timeout
    #[tracing::instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn authenticate_request(&self, request: &SignedRequest) -> Result<StoredPopKey> {
        let assertion_ref = claimed_assertion_ref(request)
            .map_err(|_| LifecycleError::forbidden("request signature rejected"))?;
        let key = self.require_usable(&assertion_ref).await?;
        self.verifier
            .verify(request, key.key.pub_key(), &assertion_ref)
            .await
            .map_err(|_| LifecycleError::forbidden("request signature rejected"))?;
        tracing::debug!(assertion_ref = %assertion_ref, "request authenticated");
        Ok(key)
    }

    /// The latest record, required to be `VALID` and within its grace period.
    async fn require_usable(&self, assertion_ref: &AssertionRef) -> Result<StoredPopKey> {
        let record = self
            .find_latest("find_latest", assertion_ref)
            .await?
            .ok_or_else(|| LifecycleError::forbidden(format!("{assertion_ref} has no key")))?;
        let PopKey::Valid(activation) = &record.key else {
            return Err(LifecycleError::forbidden(format!(
                "{assertion_ref} is {}",
                record.key.status()
            )));
        };
        if !within_grace(activation.expired_at, self.config.expiration_grace_period, Utc::now()) {
            return Err(LifecycleError::forbidden(format!("{assertion_ref} has expired")));
        }
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Store calls
    // -----------------------------------------------------------------------

    async fn find_latest(
        &self,
        operation: &'static str,
        assertion_ref: &AssertionRef,
    ) -> Result<Option<StoredPopKey>> {
        with_timeout(self.config.operation_timeout, operation, async {
            self.keys
                .find_latest(assertion_ref)
                .await
                .map_err(|e| LifecycleError::from_store(operation, e))
        })
        .await
    }

    async fn create(&self, key: PopKey) -> Result<StoredPopKey> {
        with_timeout(self.config.operation_timeout, "reserve", async {
            self.keys.create(key).await.map_err(|e| LifecycleError::from_store("reserve", e))
        })
        .await
    }

    /// Appends `key` after version `expected`; a lost race maps through `lost_race`.
    async fn append(
        &self,
        operation: &'static str,
        key: PopKey,
        expected: Option<u64>,
        lost_race: fn(&AssertionRef) -> LifecycleError,
    ) -> Result<StoredPopKey> {
        let assertion_ref = key.assertion_ref().clone();
        with_timeout(self.config.operation_timeout, operation, async {
            match self.keys.upsert_after(key, expected).await {
                Ok(record) => Ok(record),
                Err(KeyStoreError::VersionConflict { .. }) => Err(lost_race(&assertion_ref)),
                Err(e) => Err(LifecycleError::from_store(operation, e)),
            }
        })
        .await
    }
}

fn lost_activation(assertion_ref: &AssertionRef) -> LifecycleError {
    tracing::warn!(assertion_ref = %assertion_ref, "concurrent activation won the race");
    LifecycleError::forbidden(format!("{assertion_ref} was activated concurrently"))
}

fn lost_revocation(_assertion_ref: &AssertionRef) -> LifecycleError {
    LifecycleError::transient("revoke")
}

/// Whether a key expiring at `expired_at` is still usable at `now`.
fn within_grace(expired_at: DateTime<Utc>, grace: std::time::Duration, now: DateTime<Utc>) -> bool {
    let grace = TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX);
    expired_at.checked_add_signed(grace).is_none_or(|deadline| deadline >= now)
}
