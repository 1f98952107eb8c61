//! Persistence contracts for principals and refresh tokens.
//!
//! The engine only talks to storage through [`PrincipalStore`] and
//! [`RefreshTokenStore`]. [`memory::MemoryStore`] backs tests and local
//! runs; [`postgres::PgStore`] is the production backend.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{ExternalIdentity, Principal, RefreshTokenRecord};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.constraint().unwrap_or("unique constraint").to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Refresh token to persist. Only the digest of the secret is stored.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub owner_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Durable refresh-token storage. `token_hash` is unique.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, StoreError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<RefreshTokenRecord, StoreError>;

    /// Mark the token revoked. Returns `true` only if this call moved it
    /// from live to revoked. Already-revoked and unknown hashes return
    /// `false`, and an existing revocation time is never overwritten.
    async fn revoke_by_hash(&self, token_hash: &str, at: DateTime<Utc>)
    -> Result<bool, StoreError>;

    /// Revoke every unrevoked token of `owner_id`. Returns how many changed.
    async fn revoke_all_for_owner(&self, owner_id: Uuid, at: DateTime<Utc>)
    -> Result<u64, StoreError>;
}

/// Principal storage. Soft-deleted principals are invisible to lookups but
/// still hold their login name and email.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Insert. Duplicate login name, email or external identity is a
    /// [`StoreError::Conflict`].
    async fn create(&self, principal: &Principal) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Principal, StoreError>;

    /// `email` must already be normalized.
    async fn find_by_email(&self, email: &str) -> Result<Principal, StoreError>;

    async fn find_by_login_name(&self, login_name: &str) -> Result<Principal, StoreError>;

    /// Whether any principal holds `login_name`, soft-deleted ones included.
    async fn login_name_taken(&self, login_name: &str) -> Result<bool, StoreError>;

    async fn find_by_external_identity(
        &self,
        identity: &ExternalIdentity,
    ) -> Result<Principal, StoreError>;

    /// Replace the stored principal with the same id.
    async fn update(&self, principal: &Principal) -> Result<(), StoreError>;

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}
