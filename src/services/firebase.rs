//! Firebase app context and ID token verification.
//!
//! DESIGN
//! ======
//! `FirebaseApp` is built from a mounted service-account file and only knows
//! the project. `FirebaseAuth` is derived from it and checks ID tokens
//! against Google's published signing keys: RS256 signature, `exp`/`iat`,
//! `aud` equal to the project id, `iss` equal to the project's securetoken
//! issuer, an `auth_time` that is present and not in the future, and a
//! non-empty `sub` of at most 128 bytes.
//!
//! TRADE-OFFS
//! ==========
//! Signing keys are cached for the `max-age` Google sends, capped at one
//! day. A token whose `kid` is absent from a still-fresh key set is rejected
//! rather than triggering a refetch, so a forged `kid` cannot be used to
//! force network traffic. Each verification makes at most one key fetch and
//! never retries. The key fetch has no timeout and runs under the cache write
//! lock, so a stalled fetch holds up every verification waiting on the keys.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::identity::{IdentityVerifier, VerifiedPrincipal, VerifyError};

/// Where deployments mount the service-account secret.
pub const DEFAULT_CREDENTIALS_PATH: &str = "/firebase/service-account.json";

pub const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const ISSUER_PREFIX: &str = "https://securetoken.google.com/";
const CLOCK_SKEW_SECS: i64 = 300;
/// Longest `sub` accepted, in bytes.
const MAX_UID_LEN: usize = 128;
/// Upper bound on how long fetched keys are trusted, whatever `max-age` says.
const MAX_KEY_CACHE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("invalid credentials file {path}: {reason}")]
    Credentials { path: PathBuf, reason: String },
    #[error("project id is required; set it in the credentials or via GOOGLE_CLOUD_PROJECT")]
    MissingProjectId,
    #[error("http client build failed: {0}")]
    HttpClient(String),
}

// =============================================================================
// APP
// =============================================================================

#[derive(Deserialize)]
struct ServiceAccount {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    project_id: Option<String>,
    client_email: String,
}

/// Provider application context derived from a credentials file.
#[derive(Debug, Clone)]
pub struct FirebaseApp {
    project_id: String,
    client_email: String,
    credentials_path: PathBuf,
}

impl FirebaseApp {
    /// Read and parse a service-account JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::Credentials`] if the file is unreadable or is not
    /// a service account, [`InitError::MissingProjectId`] if no project id
    /// can be determined.
    pub async fn from_credentials_file(path: &Path) -> Result<Self, InitError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| InitError::Credentials { path: path.to_owned(), reason: e.to_string() })?;
        Self::from_credentials_json(&raw, path, project_from_env())
    }

    /// Parse credentials already in memory. `fallback_project` is used when
    /// the credentials carry no `project_id`.
    ///
    /// # Errors
    ///
    /// See [`FirebaseApp::from_credentials_file`].
    pub fn from_credentials_json(
        raw: &str,
        path: &Path,
        fallback_project: Option<String>,
    ) -> Result<Self, InitError> {
        let invalid = |reason: String| InitError::Credentials { path: path.to_owned(), reason };

        let account: ServiceAccount = serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;
        if account.kind != "service_account" {
            return Err(invalid(format!("unsupported credentials type {:?}", account.kind)));
        }
        if account.client_email.is_empty() {
            return Err(invalid("client_email is empty".into()));
        }

        let project_id = account
            .project_id
            .filter(|p| !p.is_empty())
            .or(fallback_project.filter(|p| !p.is_empty()))
            .ok_or(InitError::MissingProjectId)?;

        Ok(Self { project_id, client_email: account.client_email, credentials_path: path.to_owned() })
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    #[must_use]
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    #[must_use]
    pub fn credentials_path(&self) -> &Path {
        &self.credentials_path
    }

    /// Derive the ID token verifier for this app's project.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::HttpClient`] if the key-fetching client cannot be
    /// built.
    pub fn auth(&self) -> Result<FirebaseAuth, InitError> {
        let keys = GoogleKeys::new(GOOGLE_JWKS_URL)?;
        Ok(FirebaseAuth::with_keys(&self.project_id, Arc::new(keys)))
    }
}

fn project_from_env() -> Option<String> {
    std::env::var("GOOGLE_CLOUD_PROJECT")
        .or_else(|_| std::env::var("GCLOUD_PROJECT"))
        .ok()
}

// =============================================================================
// SIGNING KEYS
// =============================================================================

/// Resolves a token's `kid` to a verification key.
#[async_trait::async_trait]
pub trait KeySource: Send + Sync {
    async fn key(&self, kid: &str) -> Result<DecodingKey, VerifyError>;
}

struct CachedKeys {
    set: JwkSet,
    expires_at: Instant,
}

/// Google's securetoken JWKS, cached per `Cache-Control: max-age`.
pub struct GoogleKeys {
    http: reqwest::Client,
    url: String,
    cache: RwLock<Option<CachedKeys>>,
}

impl GoogleKeys {
    /// # Errors
    ///
    /// Returns [`InitError::HttpClient`] if the HTTP client fails to build.
    pub fn new(url: &str) -> Result<Self, InitError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| InitError::HttpClient(e.to_string()))?;
        Ok(Self { http, url: url.to_owned(), cache: RwLock::new(None) })
    }

    async fn fetch(&self) -> Result<CachedKeys, VerifyError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| VerifyError::KeyFetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(VerifyError::KeyFetch(format!("status {}", resp.status())));
        }

        let max_age = resp
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .unwrap_or(Duration::ZERO)
            .min(MAX_KEY_CACHE_AGE);

        let set = resp
            .json::<JwkSet>()
            .await
            .map_err(|e| VerifyError::KeyFetch(e.to_string()))?;

        tracing::debug!(keys = set.keys.len(), max_age_secs = max_age.as_secs(), "fetched signing keys");
        let now = Instant::now();
        Ok(CachedKeys { set, expires_at: now.checked_add(max_age).unwrap_or(now) })
    }
}

#[async_trait::async_trait]
impl KeySource for GoogleKeys {
    async fn key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| c.expires_at > Instant::now()) {
                return decoding_key(&cached.set, kid);
            }
        }

        let mut cache = self.cache.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref().filter(|c| c.expires_at > Instant::now()) {
            return decoding_key(&cached.set, kid);
        }
        let fresh = self.fetch().await?;
        let key = decoding_key(&fresh.set, kid);
        *cache = Some(fresh);
        key
    }
}

pub(crate) fn decoding_key(set: &JwkSet, kid: &str) -> Result<DecodingKey, VerifyError> {
    let jwk = set.find(kid).ok_or_else(|| VerifyError::UnknownKeyId(kid.to_owned()))?;
    DecodingKey::from_jwk(jwk).map_err(|e| VerifyError::KeyFetch(e.to_string()))
}

/// Extract `max-age` from a `Cache-Control` header value.
pub(crate) fn parse_max_age(header: &str) -> Option<Duration> {
    header
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|secs| secs.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

// =============================================================================
// VERIFIER
// =============================================================================

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    iat: i64,
    exp: i64,
    #[serde(default)]
    auth_time: Option<i64>,
    #[serde(default)]
    email: Option<String>,
}

/// Verifies Firebase ID tokens for one project.
pub struct FirebaseAuth {
    project_id: String,
    issuer: String,
    keys: Arc<dyn KeySource>,
}

impl FirebaseAuth {
    #[must_use]
    pub fn with_keys(project_id: &str, keys: Arc<dyn KeySource>) -> Self {
        Self { project_id: project_id.to_owned(), issuer: format!("{ISSUER_PREFIX}{project_id}"), keys }
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = CLOCK_SKEW_SECS.unsigned_abs();
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);
        validation
    }

    fn map_jwt_error(&self, err: &jsonwebtoken::errors::Error) -> VerifyError {
        match err.kind() {
            ErrorKind::ExpiredSignature => VerifyError::Expired,
            ErrorKind::InvalidAudience => VerifyError::WrongAudience { expected: self.project_id.clone() },
            ErrorKind::InvalidIssuer => VerifyError::WrongIssuer { expected: self.issuer.clone() },
            ErrorKind::InvalidSignature => VerifyError::BadSignature,
            ErrorKind::InvalidAlgorithm => VerifyError::UnsupportedAlgorithm,
            _ => VerifyError::Malformed(err.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl IdentityVerifier for FirebaseAuth {
    async fn verify_id_token(&self, token: &str) -> Result<VerifiedPrincipal, VerifyError> {
        if token.is_empty() {
            return Err(VerifyError::Empty);
        }

        let header = decode_header(token).map_err(|e| VerifyError::Malformed(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(VerifyError::UnsupportedAlgorithm);
        }
        let kid = header.kid.ok_or(VerifyError::MissingKeyId)?;
        let key = self.keys.key(&kid).await?;

        let claims = decode::<FirebaseClaims>(token, &key, &self.validation())
            .map_err(|e| self.map_jwt_error(&e))?
            .claims;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if claims.iat > now + CLOCK_SKEW_SECS {
            return Err(VerifyError::IssuedInFuture);
        }
        if claims.auth_time.is_none_or(|t| t > now + CLOCK_SKEW_SECS) {
            return Err(VerifyError::InvalidAuthTime);
        }
        if claims.sub.is_empty() || claims.sub.len() > MAX_UID_LEN {
            return Err(VerifyError::InvalidSubject);
        }

        Ok(VerifiedPrincipal { uid: claims.sub, email: claims.email, issued_at: claims.iat, expires_at: claims.exp })
    }
}

#[cfg(test)]
#[path = "firebase_test.rs"]
mod tests;
