//! PostgreSQL storage backend.
//!
//! Uniqueness (login name, email, external identity, token hash) is enforced
//! by the schema in `migrations/`; violations surface as
//! [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewRefreshToken, PrincipalStore, RefreshTokenStore, StoreError};
use crate::models::auth::{AccountStatus, ExternalIdentity, Principal, RefreshTokenRecord};

const PRINCIPAL_COLUMNS: &str = "id, login_name, email, password_hash, status, \
     external_provider, external_id, created_at, updated_at";

const REFRESH_TOKEN_COLUMNS: &str = "id, owner_id, token_hash, expires_at, revoked_at, created_at";

/// (id, login_name, email, password_hash, status, external_provider,
/// external_id, created_at, updated_at)
type PrincipalRow = (
    Uuid,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// (id, owner_id, token_hash, expires_at, revoked_at, created_at)
type RefreshTokenRow = (
    Uuid,
    Uuid,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

fn principal_from_row(row: PrincipalRow) -> Result<Principal, StoreError> {
    let (id, login_name, email, password_hash, status, provider, provider_id, created_at, updated_at) =
        row;
    let status = status
        .parse::<AccountStatus>()
        .map_err(|e| StoreError::Backend(format!("principal {id}: {e}")))?;
    let external_identity = match (provider, provider_id) {
        (Some(provider), Some(provider_id)) => Some(ExternalIdentity {
            provider,
            provider_id,
        }),
        _ => None,
    };
    Ok(Principal {
        id,
        login_name,
        email,
        password_hash,
        status,
        external_identity,
        created_at,
        updated_at,
    })
}

fn refresh_token_from_row(row: RefreshTokenRow) -> RefreshTokenRecord {
    let (id, owner_id, token_hash, expires_at, revoked_at, created_at) = row;
    RefreshTokenRecord {
        id,
        owner_id,
        token_hash,
        expires_at,
        revoked_at,
        created_at,
    }
}

/// Both store contracts over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fetch one live principal whose text `column` equals `value`.
    async fn find_principal_by(&self, column: &str, value: &str) -> Result<Principal, StoreError> {
        let sql = format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE {column} = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, PrincipalRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(StoreError::NotFound).and_then(principal_from_row)
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, StoreError> {
        let sql = format!(
            "INSERT INTO refresh_tokens (id, owner_id, token_hash, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {REFRESH_TOKEN_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RefreshTokenRow>(&sql)
            .bind(Uuid::now_v7())
            .bind(token.owner_id)
            .bind(&token.token_hash)
            .bind(token.expires_at)
            .bind(token.created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(refresh_token_from_row(row))
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<RefreshTokenRecord, StoreError> {
        let sql = format!("SELECT {REFRESH_TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1");
        let row = sqlx::query_as::<_, RefreshTokenRow>(&sql)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(refresh_token_from_row).ok_or(StoreError::NotFound)
    }

    async fn revoke_by_hash(
        &self,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE token_hash = $1 AND revoked_at IS NULL",
        )
        .bind(token_hash)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_owner(
        &self,
        owner_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE owner_id = $1 AND revoked_at IS NULL",
        )
        .bind(owner_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PrincipalStore for PgStore {
    async fn create(&self, principal: &Principal) -> Result<(), StoreError> {
        let (provider, provider_id) = external_columns(principal);
        sqlx::query(
            "INSERT INTO principals \
             (id, login_name, email, password_hash, status, external_provider, external_id, \
              created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(principal.id)
        .bind(&principal.login_name)
        .bind(&principal.email)
        .bind(principal.password_hash.as_deref())
        .bind(principal.status.as_str())
        .bind(provider)
        .bind(provider_id)
        .bind(principal.created_at)
        .bind(principal.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Principal, StoreError> {
        let sql = format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, PrincipalRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(StoreError::NotFound).and_then(principal_from_row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Principal, StoreError> {
        self.find_principal_by("email", email).await
    }

    async fn find_by_login_name(&self, login_name: &str) -> Result<Principal, StoreError> {
        self.find_principal_by("login_name", login_name).await
    }

    async fn login_name_taken(&self, login_name: &str) -> Result<bool, StoreError> {
        // deleted rows still hold the unique index entry
        let (taken,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM principals WHERE login_name = $1)")
                .bind(login_name)
                .fetch_one(&self.pool)
                .await?;
        Ok(taken)
    }

    async fn find_by_external_identity(
        &self,
        identity: &ExternalIdentity,
    ) -> Result<Principal, StoreError> {
        let sql = format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals \
             WHERE external_provider = $1 AND external_id = $2 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, PrincipalRow>(&sql)
            .bind(&identity.provider)
            .bind(&identity.provider_id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(StoreError::NotFound).and_then(principal_from_row)
    }

    async fn update(&self, principal: &Principal) -> Result<(), StoreError> {
        let (provider, provider_id) = external_columns(principal);
        let result = sqlx::query(
            "UPDATE principals SET login_name = $2, email = $3, password_hash = $4, status = $5, \
             external_provider = $6, external_id = $7, updated_at = $8 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(principal.id)
        .bind(&principal.login_name)
        .bind(&principal.email)
        .bind(principal.password_hash.as_deref())
        .bind(principal.status.as_str())
        .bind(provider)
        .bind(provider_id)
        .bind(principal.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE principals SET deleted_at = $2, updated_at = $2, status = 'deleted' \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn external_columns(principal: &Principal) -> (Option<&str>, Option<&str>) {
    match &principal.external_identity {
        Some(identity) => (
            Some(identity.provider.as_str()),
            Some(identity.provider_id.as_str()),
        ),
        None => (None, None),
    }
}
