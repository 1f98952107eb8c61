//! Authentication and token lifecycle.
//!
//! Provides password hashing, key material, access-token signing,
//! refresh-token management, and the sign-in flows composed from them.

pub mod jwt;
pub mod keys;
pub mod password;
pub mod service;
pub mod tokens;
pub mod validation;

use thiserror::Error;

use crate::store::StoreError;

/// Authentication errors.
///
/// Credential and token variants are expected, user-facing outcomes. Store,
/// signing and key variants are internal: transports should show
/// [`AuthError::public_message`] instead of the display text.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User account is not active")]
    UserInactive,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found")]
    NotFound,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Store failure: {0}")]
    StoreFailure(String),

    #[error("Signing failure: {0}")]
    SigningFailure(String),

    #[error("Key load failure: {0}")]
    KeyLoadFailure(String),

    #[error("Signing keys have not been initialized")]
    KeysNotInitialized,

    #[error("Password hashing failure: {0}")]
    HashingFailure(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl AuthError {
    /// Backing-system failures whose detail must not reach the caller.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AuthError::StoreFailure(_)
                | AuthError::SigningFailure(_)
                | AuthError::KeyLoadFailure(_)
                | AuthError::KeysNotInitialized
                | AuthError::HashingFailure(_)
        )
    }

    /// Message safe to return to an external caller.
    pub fn public_message(&self) -> String {
        if self.is_internal() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AuthError::NotFound,
            StoreError::Conflict(msg) => AuthError::Conflict(msg),
            StoreError::Backend(msg) => AuthError::StoreFailure(msg),
        }
    }
}
