//! Identity verification seam and the process-wide verifier registry.
//!
//! ARCHITECTURE
//! ============
//! `IdentityVerifier` is what the auth middleware talks to. Production wiring
//! goes through `IdentityRegistry::init_verifier`, which loads the provider
//! app from a credentials file and derives the Firebase verifier from it
//! exactly once. Tests hand `AppState` any other implementation.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;

use super::firebase::{FirebaseApp, FirebaseAuth, InitError};

/// Identity established by a successfully verified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedPrincipal {
    /// Subject of the token; the provider's user id.
    pub uid: String,
    pub email: Option<String>,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
}

/// Why a token was rejected. `Display` is sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("ID token must be a non-empty string")]
    Empty,
    #[error("failed to parse ID token: {0}")]
    Malformed(String),
    #[error("ID token has invalid algorithm; expected RS256")]
    UnsupportedAlgorithm,
    #[error("ID token has no \"kid\" header")]
    MissingKeyId,
    #[error("ID token has \"kid\" header {0:?} which does not match any known signing key")]
    UnknownKeyId(String),
    #[error("ID token has invalid signature")]
    BadSignature,
    #[error("ID token has expired")]
    Expired,
    #[error("ID token issued in the future")]
    IssuedInFuture,
    #[error("ID token has invalid \"aud\" claim; expected {expected:?}")]
    WrongAudience { expected: String },
    #[error("ID token has invalid \"iss\" claim; expected {expected:?}")]
    WrongIssuer { expected: String },
    #[error("ID token has missing or future \"auth_time\" claim")]
    InvalidAuthTime,
    #[error("ID token has invalid \"sub\" claim")]
    InvalidSubject,
    #[error("failed to fetch public signing keys: {0}")]
    KeyFetch(String),
}

#[async_trait::async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify_id_token(&self, token: &str) -> Result<VerifiedPrincipal, VerifyError>;
}

// =============================================================================
// REGISTRY
// =============================================================================

struct Registered {
    app: FirebaseApp,
    auth: Arc<FirebaseAuth>,
}

/// Holds the provider app and its verifier for the life of the process.
#[derive(Default)]
pub struct IdentityRegistry {
    inner: OnceCell<Registered>,
}

impl IdentityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load credentials, build the app, then derive its verifier. Later calls
    /// return the verifier built by the first successful one.
    ///
    /// # Errors
    ///
    /// Returns [`InitError`] if the credentials cannot be loaded or the
    /// verifier cannot be built from them.
    pub async fn init_verifier(&self, credentials_path: impl AsRef<Path>) -> Result<Arc<dyn IdentityVerifier>, InitError> {
        let path = credentials_path.as_ref();
        let registered = self
            .inner
            .get_or_try_init(|| async {
                let app = FirebaseApp::from_credentials_file(path).await?;
                let auth = Arc::new(app.auth()?);
                tracing::info!(project_id = %app.project_id(), "identity verifier initialized");
                Ok::<_, InitError>(Registered { app, auth })
            })
            .await?;
        let verifier: Arc<dyn IdentityVerifier> = registered.auth.clone();
        Ok(verifier)
    }

    /// The verifier, if `init_verifier` has succeeded.
    #[must_use]
    pub fn verifier(&self) -> Option<Arc<dyn IdentityVerifier>> {
        self.inner
            .get()
            .map(|r| r.auth.clone() as Arc<dyn IdentityVerifier>)
    }

    #[must_use]
    pub fn app(&self) -> Option<&FirebaseApp> {
        self.inner.get().map(|r| &r.app)
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
