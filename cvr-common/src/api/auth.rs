//! Internal-call authentication via a statically configured shared secret
//!
//! The public trigger attaches the secret in the `x-cvr-internal-secret`
//! header when it calls the internal worker; the worker rejects any call
//! that does not present it before running a single pipeline stage.
//!
//! Verification goes through the `Authenticator` trait so a deployment can
//! swap the static secret for another credential check without touching
//! the HTTP layer.
//!
//! # Pure Functions
//!
//! No HTTP framework dependencies; the Axum middleware lives in the service.

use sha2::{Digest, Sha256};

/// Header carrying the shared secret on internal calls
pub const INTERNAL_SECRET_HEADER: &str = "x-cvr-internal-secret";

// ========================================
// Error Types
// ========================================

/// Authentication error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiAuthError {
    /// No credential on the request
    MissingCredential,

    /// Credential present but does not match
    InvalidCredential,

    /// Server has no secret configured; every call is refused
    NotConfigured,
}

impl std::fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiAuthError::MissingCredential => write!(f, "Missing internal credential"),
            ApiAuthError::InvalidCredential => write!(f, "Invalid internal credential"),
            ApiAuthError::NotConfigured => write!(f, "Internal authentication not configured"),
        }
    }
}

impl std::error::Error for ApiAuthError {}

// ========================================
// Authenticator
// ========================================

/// Capability check for internal calls
pub trait Authenticator: Send + Sync {
    /// Verify the credential presented with a request
    fn verify(&self, presented: Option<&str>) -> Result<(), ApiAuthError>;

    /// Whether this authenticator can accept anything at all
    fn is_configured(&self) -> bool;
}

/// Static shared-secret authenticator
///
/// Stores only the SHA-256 digest of the secret and compares digests in
/// constant time. An unconfigured authenticator fails closed.
#[derive(Clone)]
pub struct SharedSecretAuthenticator {
    digest: Option<[u8; 32]>,
}

impl SharedSecretAuthenticator {
    /// Build from the configured secret; blank secrets count as unconfigured
    pub fn new(secret: Option<&str>) -> Self {
        let digest = secret
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(digest);
        Self { digest }
    }
}

impl std::fmt::Debug for SharedSecretAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretAuthenticator")
            .field("configured", &self.digest.is_some())
            .finish()
    }
}

impl Authenticator for SharedSecretAuthenticator {
    fn verify(&self, presented: Option<&str>) -> Result<(), ApiAuthError> {
        let expected = self.digest.as_ref().ok_or(ApiAuthError::NotConfigured)?;
        let presented = presented.ok_or(ApiAuthError::MissingCredential)?;

        if constant_time_eq(&digest(presented), expected) {
            Ok(())
        } else {
            Err(ApiAuthError::InvalidCredential)
        }
    }

    fn is_configured(&self) -> bool {
        self.digest.is_some()
    }
}

fn digest(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ========================================
// Tests
// ========================================
