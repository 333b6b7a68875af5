//! Short-lived access tokens scoped to one key and one operation.
//!
//! The lifecycle engine hands a token out with the access parameters of a
//! `VALID` key; holders present it back to fetch the assertion bound to that
//! key. [`JwtTokenService`] signs EdDSA JWTs with a primary key and accepts
//! tokens from an optional secondary key, so the signing key can be replaced
//! without invalidating tokens already handed out.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bon::Builder;
use chrono::{DateTime, Utc};
use ed25519_dalek::pkcs8::DecodePrivateKey;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode_header};
use lollipop_storage::keys::AssertionRef;
use serde::{Deserialize, Serialize};

use crate::{
    error::AuthError,
    validation::{validate_algorithm, validate_kid},
};

/// Default clock leeway applied to `exp`.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(30);

fn default_leeway() -> Duration {
    DEFAULT_LEEWAY
}

/// Token issuance settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    /// `iss` of minted tokens, required on validation.
    #[builder(into)]
    pub issuer: String,
    /// `aud` of minted tokens, required on validation.
    #[builder(into)]
    pub audience: String,
    /// Clock leeway on validation.
    #[serde(default = "default_leeway", with = "humantime_serde")]
    #[builder(default = DEFAULT_LEEWAY)]
    pub leeway: Duration,
}

/// What a token grants: one operation on one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenScope {
    /// The key the token is bound to.
    pub assertion_ref: AssertionRef,
    /// Caller-supplied operation identifier.
    pub operation_id: String,
    /// Token lifetime.
    pub ttl: Duration,
}

/// Claims of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
    /// The assertion reference of the key.
    pub sub: String,
    /// Operation the token was minted for.
    pub operation_id: String,
    /// Issued at, epoch seconds.
    pub iat: i64,
    /// Expiry, epoch seconds.
    pub exp: i64,
    /// Unique token ID.
    pub jti: String,
}

impl AccessTokenClaims {
    /// The key the token is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidTokenFormat`] if `sub` is not an identifier.
    pub fn assertion_ref(&self) -> Result<AssertionRef, AuthError> {
        AssertionRef::parse(self.sub.as_str())
            .map_err(|e| AuthError::invalid_token_format(format!("sub is not an identifier: {e}")))
    }
}

/// A minted token and what it says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// The compact JWT.
    pub token: String,
    /// Its claims.
    pub claims: AccessTokenClaims,
}

impl AccessToken {
    /// When the token stops being accepted.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.claims.exp, 0)
    }
}

/// Mints and validates access tokens.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Mints a token for `scope`.
    async fn mint(&self, scope: &TokenScope) -> Result<AccessToken, AuthError>;

    /// Validates `token` and returns its claims.
    async fn validate(&self, token: &str) -> Result<AccessTokenClaims, AuthError>;
}

/// An Ed25519 signing key with its `kid`.
pub struct TokenSigningKey {
    kid: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenSigningKey {
    /// Loads a PKCS#8 DER Ed25519 private key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidTokenFormat`] for a malformed `kid` and
    /// [`AuthError::InvalidKey`] if the key cannot be decoded.
    pub fn from_pkcs8_der(kid: impl Into<String>, der: &[u8]) -> Result<Self, AuthError> {
        let kid = kid.into();
        validate_kid(&kid)?;
        let signing = ed25519_dalek::SigningKey::from_pkcs8_der(der)
            .map_err(|e| AuthError::invalid_key(format!("signing key {kid}: {e}")))?;
        let public = URL_SAFE_NO_PAD.encode(signing.verifying_key().to_bytes());
        let decoding = DecodingKey::from_ed_components(&public)
            .map_err(|e| AuthError::invalid_key(format!("signing key {kid}: {e}")))?;
        Ok(Self { kid, encoding: EncodingKey::from_ed_der(der), decoding })
    }

    /// The key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }
}

impl fmt::Debug for TokenSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigningKey").field("kid", &self.kid).finish_non_exhaustive()
    }
}

/// [`TokenService`] issuing EdDSA JWTs.
#[derive(Debug)]
pub struct JwtTokenService {
    config: TokenConfig,
    primary: TokenSigningKey,
    secondary: Option<TokenSigningKey>,
}

impl JwtTokenService {
    /// Signs with `primary`; validates tokens from `primary` only.
    #[must_use]
    pub fn new(config: TokenConfig, primary: TokenSigningKey) -> Self {
        Self { config, primary, secondary: None }
    }

    /// Also accepts tokens signed by `secondary`, typically the previous
    /// primary during a key rollover.
    #[must_use]
    pub fn with_secondary(mut self, secondary: TokenSigningKey) -> Self {
        self.secondary = Some(secondary);
        self
    }

    fn keys(&self) -> impl Iterator<Item = &TokenSigningKey> {
        std::iter::once(&self.primary).chain(self.secondary.as_ref())
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = self.config.leeway.as_secs();
        validation
    }

    fn decode_with(
        &self,
        token: &str,
        key: &TokenSigningKey,
    ) -> Result<AccessTokenClaims, AuthError> {
        let validation = self.validation();
        Ok(jsonwebtoken::decode::<AccessTokenClaims>(token, &key.decoding, &validation)?.claims)
    }
}

#[async_trait]
impl TokenService for JwtTokenService {
    #[tracing::instrument(skip_all, fields(assertion_ref = %scope.assertion_ref, kid = %self.primary.kid))]
    async fn mint(&self, scope: &TokenScope) -> Result<AccessToken, AuthError> {
        let iat = Utc::now().timestamp();
        let ttl = i64::try_from(scope.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = AccessTokenClaims {
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            sub: scope.assertion_ref.to_string(),
            operation_id: scope.operation_id.clone(),
            iat,
            exp: iat.saturating_add(ttl),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.primary.kid.clone());
        let token = jsonwebtoken::encode(&header, &claims, &self.primary.encoding)?;
        Ok(AccessToken { token, claims })
    }

    #[tracing::instrument(skip_all)]
    async fn validate(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        let header = decode_header(token).map_err(|e| {
            AuthError::invalid_token_format(format!("Failed to decode JWT header: {e}"))
        })?;
        validate_algorithm(&format!("{:?}", header.alg))?;

        let claims = match header.kid {
            Some(kid) => {
                validate_kid(&kid)?;
                let key = self
                    .keys()
                    .find(|k| k.kid == kid)
                    .ok_or_else(|| AuthError::unknown_signing_key(&kid))?;
                self.decode_with(token, key)?
            },
            None => {
                let mut last = AuthError::InvalidSignature;
                let mut found = None;
                for key in self.keys() {
                    match self.decode_with(token, key) {
                        Ok(claims) => {
                            found = Some(claims);
                            break;
                        },
                        Err(e) => last = e,
                    }
                }
                found.ok_or(last)?
            },
        };

        if claims.operation_id.is_empty() {
            return Err(AuthError::missing_claim("operation_id"));
        }
        tracing::debug!(sub = %claims.sub, "access token validated");
        Ok(claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testutil::{craft_raw_jwt, generate_test_keypair, test_token_service};

    fn scope() -> TokenScope {
        TokenScope {
            assertion_ref: AssertionRef::parse("sha512-abc").unwrap(),
            operation_id: "op-1".into(),
            ttl: Duration::from_secs(900),
        }
    }

    fn signing_key(kid: &str) -> TokenSigningKey {
        let (der, _) = generate_test_keypair();
        TokenSigningKey::from_pkcs8_der(kid, &der).unwrap()
    }

    #[tokio::test]
    async fn test_mint_then_validate() {
        let service = test_token_service();
        let minted = service.mint(&scope()).await.unwrap();
        assert_eq!(minted.token.split('.').count(), 3);
        assert_eq!(minted.claims.exp - minted.claims.iat, 900);

        let claims = service.validate(&minted.token).await.unwrap();
        assert_eq!(claims, minted.claims);
        assert_eq!(claims.assertion_ref().unwrap(), scope().assertion_ref);
    }

    #[tokio::test]
    async fn test_tokens_have_unique_ids() {
        let service = test_token_service();
        let a = service.mint(&scope()).await.unwrap();
        let b = service.mint(&scope()).await.unwrap();
        assert_ne!(a.claims.jti, b.claims.jti);
    }

    #[tokio::test]
    async fn test_rollover_accepts_tokens_from_previous_key() {
        let config = TokenConfig::builder().issuer("iss").audience("aud").build();
        let (old_der, _) = generate_test_keypair();
        let old = JwtTokenService::new(
            config.clone(),
            TokenSigningKey::from_pkcs8_der("old", &old_der).unwrap(),
        );
        let token = old.mint(&scope()).await.unwrap().token;

        let rolled = JwtTokenService::new(config.clone(), signing_key("new"))
            .with_secondary(TokenSigningKey::from_pkcs8_der("old", &old_der).unwrap());
        assert!(rolled.validate(&token).await.is_ok());

        let fresh = rolled.mint(&scope()).await.unwrap().token;
        assert!(matches!(old.validate(&fresh).await, Err(AuthError::UnknownSigningKey { .. })));
    }

    #[tokio::test]
    async fn test_same_kid_different_key_rejected() {
        let config = TokenConfig::builder().issuer("iss").audience("aud").build();
        let token = JwtTokenService::new(config.clone(), signing_key("k"))
            .mint(&scope())
            .await
            .unwrap()
            .token;
        let service = JwtTokenService::new(config, signing_key("k"));
        assert!(matches!(service.validate(&token).await, Err(AuthError::InvalidSignature)));
    }

    #[tokio::test]
    async fn test_unknown_kid_rejected() {
        let config = TokenConfig::builder().issuer("iss").audience("aud").build();
        let token = JwtTokenService::new(config.clone(), signing_key("other"))
            .mint(&scope())
            .await
            .unwrap()
            .token;
        let service = JwtTokenService::new(config, signing_key("primary"));
        assert!(matches!(
            service.validate(&token).await,
            Err(AuthError::UnknownSigningKey { kid }) if kid == "other"
        ));
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let (der, _) = generate_test_keypair();
        let minting = JwtTokenService::new(
            TokenConfig::builder().issuer("iss").audience("other-aud").build(),
            TokenSigningKey::from_pkcs8_der("k", &der).unwrap(),
        );
        let token = minting.mint(&scope()).await.unwrap().token;
        let validating = JwtTokenService::new(
            TokenConfig::builder().issuer("iss").audience("aud").build(),
            TokenSigningKey::from_pkcs8_der("k", &der).unwrap(),
        );
        assert!(matches!(validating.validate(&token).await, Err(AuthError::InvalidAudience(_))));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (der, _) = generate_test_keypair();
        let now = Utc::now().timestamp();
        let claims = json!({
            "iss": "iss", "aud": "aud", "sub": "sha512-abc", "operation_id": "op",
            "iat": now - 600, "exp": now - 300, "jti": "j",
        });
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some("k".into());
        let token =
            jsonwebtoken::encode(&header, &claims, &EncodingKey::from_ed_der(&der)).unwrap();

        let service = JwtTokenService::new(
            TokenConfig::builder().issuer("iss").audience("aud").build(),
            TokenSigningKey::from_pkcs8_der("k", &der).unwrap(),
        );
        assert!(matches!(service.validate(&token).await, Err(AuthError::TokenExpired)));
    }

    #[tokio::test]
    async fn test_alg_none_rejected() {
        let token = craft_raw_jwt(
            &json!({"alg": "none", "typ": "JWT"}),
            &json!({"sub": "sha512-abc", "operation_id": "op"}),
        );
        assert!(matches!(
            test_token_service().validate(&token).await,
            Err(AuthError::InvalidTokenFormat(_) | AuthError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_signing_key_debug_hides_material() {
        let key = signing_key("k1");
        assert_eq!(format!("{key:?}"), "TokenSigningKey { kid: \"k1\", .. }");
    }

    #[test]
    fn test_config_from_json() {
        let config: TokenConfig =
            serde_json::from_str(r#"{"issuer":"i","audience":"a","leeway":"5s"}"#).unwrap();
        assert_eq!(config.leeway, Duration::from_secs(5));
        assert!(serde_json::from_str::<TokenConfig>(r#"{"issuer":"i"}"#).is_err());
    }
}
