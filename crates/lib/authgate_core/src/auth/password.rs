//! Password hashing via bcrypt.
//!
//! Digests are self-describing (`$2b$<cost>$<salt+hash>`), so verification
//! needs no configuration.

use tracing::debug;

use super::AuthError;

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// One-way password function used by the sign-in flows.
pub trait PasswordHasher: Send + Sync {
    /// Produce a salted digest of `password`.
    fn hash(&self, password: &str) -> Result<String, AuthError>;

    /// Constant-time check of `password` against `digest`. A malformed
    /// digest is a mismatch, not an error.
    fn verify(&self, password: &str, digest: &str) -> bool;
}

/// bcrypt-backed [`PasswordHasher`].
#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, password: &str) -> Result<String, AuthError> {
        hash_password(password, self.cost)
    }

    fn verify(&self, password: &str, digest: &str) -> bool {
        verify_password(password, digest)
    }
}

/// Hash a password with bcrypt.
pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|e| AuthError::HashingFailure(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, digest: &str) -> bool {
    match bcrypt::verify(password, digest) {
        Ok(matches) => matches,
        Err(e) => {
            debug!(error = %e, "unusable password digest");
            false
        }
    }
}
