//! Authentication: Google sign-in verification, internal RS256 token
//! issuance, and refresh token rotation.
//!
//! Access tokens are short-lived RS256 JWTs verified locally. Refresh
//! tokens are opaque random strings stored server-side as SHA-256 hashes
//! and rotated on every use.

pub mod keys;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgConnection;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::store::users::ExternalProfile;
use crate::store::{refresh_tokens, StoreError};

use keys::SigningKeys;

/// Accepted issuers for Google id tokens.
const GOOGLE_ISSUERS: &[&str] = &["https://accounts.google.com", "accounts.google.com"];

/// Google JWKS endpoint.
const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

// ── Errors ──────────────────────────────────────────────────────

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token malformed, signature invalid, or claims rejected.
    #[error("invalid token")]
    InvalidToken,

    /// Token signature fine but past its expiry. Signals the client to
    /// use its refresh token.
    #[error("token expired")]
    TokenExpired,

    /// Refresh token unknown, revoked, or expired.
    #[error("refresh token rejected")]
    RefreshRejected,

    /// Google id-token verification failed.
    #[error("identity verification failed: {0}")]
    Identity(String),

    /// Google account email not verified.
    #[error("email not verified")]
    EmailNotVerified,

    /// JWKS fetch failed.
    #[error("identity provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ── Claims ──────────────────────────────────────────────────────

/// Claims carried by our access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User id.
    pub sub: Uuid,
    /// User email at issuance time.
    pub email: String,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// Issued-at (unix seconds).
    pub iat: i64,
}

/// The token pair returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    /// RS256 access token.
    pub access_token: String,
    /// Opaque refresh token (shown once).
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: String,
    email: String,
    email_verified: Option<serde_json::Value>,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

// ── Service ─────────────────────────────────────────────────────

/// Authentication service: token issuance, verification, and refresh.
pub struct AuthService {
    keys: SigningKeys,
    config: AuthConfig,
    http: reqwest::Client,
    google_jwks: Mutex<Option<(Instant, JwkSet)>>,
}

impl AuthService {
    /// Build the service, loading or generating the signing keypair.
    pub fn new(config: AuthConfig) -> anyhow::Result<Self> {
        let keys = SigningKeys::load_or_generate(std::path::Path::new(&config.keys_dir))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Ok(Self {
            keys,
            config,
            http,
            google_jwks: Mutex::new(None),
        })
    }

    /// The JWKS document for our own tokens.
    pub fn jwks_document(&self) -> &serde_json::Value {
        self.keys.jwks_document()
    }

    // ── Internal tokens ─────────────────────────────────────────

    /// Issue an access token for a user.
    pub fn issue_access_token(&self, user_id: Uuid, email: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: user_id,
            email: email.to_owned(),
            iat: now,
            exp: now + self.config.access_token_minutes * 60,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.keys.kid.clone());
        jsonwebtoken::encode(&header, &claims, &self.keys.encoding)
            .map_err(|_| AuthError::InvalidToken)
    }

    /// Verify one of our access tokens, distinguishing expiry from other
    /// failures so the client knows to refresh.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        match jsonwebtoken::decode::<AccessClaims>(token, &self.keys.decoding, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AuthError::TokenExpired),
                _ => Err(AuthError::InvalidToken),
            },
        }
    }

    /// Issue a fresh token pair, storing the refresh token's hash.
    pub async fn issue_pair(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        email: &str,
    ) -> Result<TokenPair, AuthError> {
        let access_token = self.issue_access_token(user_id, email)?;
        let refresh_token = random_token();
        refresh_tokens::insert(
            conn,
            user_id,
            &hash_token(&refresh_token),
            self.config.refresh_token_days,
        )
        .await?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.config.access_token_minutes * 60,
        })
    }

    /// Exchange a refresh token for a new pair, rotating the old token.
    ///
    /// The presented token's row is revoked in the same transaction that
    /// stores the replacement, so a reused old token always fails.
    pub async fn refresh(
        &self,
        conn: &mut PgConnection,
        presented: &str,
        email_lookup: impl FnOnce(Uuid) -> String,
    ) -> Result<(Uuid, TokenPair), AuthError> {
        let record = refresh_tokens::find_by_hash(conn, &hash_token(presented))
            .await?
            .ok_or(AuthError::RefreshRejected)?;
        if !record.is_usable(Utc::now()) {
            warn!(user_id = %record.user_id, "rejected stale refresh token");
            return Err(AuthError::RefreshRejected);
        }

        refresh_tokens::revoke(conn, record.id).await?;
        let email = email_lookup(record.user_id);
        let pair = self.issue_pair(conn, record.user_id, &email).await?;
        info!(user_id = %record.user_id, "refresh token rotated");
        Ok((record.user_id, pair))
    }

    /// Revoke a presented refresh token (logout).
    pub async fn logout(
        &self,
        conn: &mut PgConnection,
        presented: &str,
    ) -> Result<(), AuthError> {
        if let Some(record) = refresh_tokens::find_by_hash(conn, &hash_token(presented)).await? {
            refresh_tokens::revoke(conn, record.id).await?;
        }
        Ok(())
    }

    // ── Google sign-in ──────────────────────────────────────────

    /// Verify a Google id token and extract the canonical profile.
    ///
    /// Validates the RS256 signature against Google's JWKS (cached),
    /// the audience (our client id), the issuer, and a verified email.
    pub async fn verify_google_id_token(
        &self,
        id_token: &str,
    ) -> Result<ExternalProfile, AuthError> {
        let header = jsonwebtoken::decode_header(id_token)
            .map_err(|e| AuthError::Identity(format!("bad token header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Identity("token missing kid".to_owned()))?;

        let jwk = self.google_jwk(&kid).await?;
        let decoding = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| AuthError::Identity(format!("bad provider key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.config.google_client_id]);
        validation.set_issuer(GOOGLE_ISSUERS);

        let data = jsonwebtoken::decode::<GoogleClaims>(id_token, &decoding, &validation)
            .map_err(|e| AuthError::Identity(format!("token rejected: {e}")))?;
        let claims = data.claims;

        // Google sends email_verified as bool or "true".
        let verified = match &claims.email_verified {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s == "true",
            _ => false,
        };
        if !verified {
            return Err(AuthError::EmailNotVerified);
        }

        Ok(ExternalProfile {
            sub: claims.sub,
            email: claims.email,
            name: claims.name.unwrap_or_else(|| "there".to_owned()),
            picture: claims.picture,
        })
    }

    /// Fetch (or reuse the cached) Google JWKS and pick the key for `kid`.
    async fn google_jwk(&self, kid: &str) -> Result<Jwk, AuthError> {
        let ttl = Duration::from_secs(self.config.jwks_cache_seconds);

        if let Ok(guard) = self.google_jwks.lock() {
            if let Some((fetched_at, set)) = guard.as_ref() {
                if fetched_at.elapsed() < ttl {
                    if let Some(jwk) = set.keys.iter().find(|k| k.kid == kid) {
                        return Ok(jwk.clone());
                    }
                }
            }
        }

        let set: JwkSet = self
            .http
            .get(GOOGLE_JWKS_URL)
            .send()
            .await
            .map_err(|e| AuthError::ProviderUnreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::ProviderUnreachable(e.to_string()))?;

        let jwk = set
            .keys
            .iter()
            .find(|k| k.kid == kid)
            .cloned()
            .ok_or_else(|| AuthError::Identity(format!("no provider key with kid {kid}")))?;

        if let Ok(mut guard) = self.google_jwks.lock() {
            *guard = Some((Instant::now(), set));
        }
        Ok(jwk)
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("kid", &self.keys.kid)
            .finish_non_exhaustive()
    }
}

/// 32 random bytes, hex encoded.
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 hex digest of an opaque token.
fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AuthConfig {
            keys_dir: dir.path().to_string_lossy().into_owned(),
            ..AuthConfig::default()
        };
        // Leak the tempdir so the keys survive for the test duration.
        std::mem::forget(dir);
        AuthService::new(config).expect("auth service")
    }

    #[test]
    fn test_access_token_roundtrip() {
        let service = service();
        let user_id = Uuid::new_v4();
        let token = service
            .issue_access_token(user_id, "u@example.com")
            .expect("issue");
        let claims = service.verify_access_token(&token).expect("verify");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "u@example.com");
    }

    #[test]
    fn test_garbage_token_is_invalid_not_expired() {
        let service = service();
        assert!(matches!(
            service.verify_access_token("not.a.jwt"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_tokens_from_other_keys_rejected() {
        let a = service();
        let b = service();
        let token = a
            .issue_access_token(Uuid::new_v4(), "u@example.com")
            .expect("issue");
        assert!(matches!(
            b.verify_access_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_random_tokens_are_unique_and_hashed() {
        let t1 = random_token();
        let t2 = random_token();
        assert_ne!(t1, t2);
        assert_eq!(t1.len(), 64);
        assert_ne!(hash_token(&t1), t1);
        assert_eq!(hash_token(&t1), hash_token(&t1));
    }
}
