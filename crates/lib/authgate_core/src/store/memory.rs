//! In-memory storage backend for tests and local development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{NewRefreshToken, PrincipalStore, RefreshTokenStore, StoreError};
use crate::models::auth::{AccountStatus, ExternalIdentity, Principal, RefreshTokenRecord};

#[derive(Debug, Clone)]
struct StoredPrincipal {
    principal: Principal,
    deleted_at: Option<DateTime<Utc>>,
}

impl StoredPrincipal {
    fn live(&self) -> Option<&Principal> {
        self.deleted_at.is_none().then_some(&self.principal)
    }
}

#[derive(Debug, Default)]
struct Inner {
    principals: HashMap<Uuid, StoredPrincipal>,
    /// Keyed by token hash.
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
}

impl Inner {
    /// Uniqueness check against every other principal, deleted ones included.
    fn check_unique(&self, candidate: &Principal) -> Result<(), StoreError> {
        for stored in self.principals.values() {
            let other = &stored.principal;
            if other.id == candidate.id {
                continue;
            }
            if other.login_name == candidate.login_name {
                return Err(StoreError::Conflict("login name already taken".into()));
            }
            if other.email == candidate.email {
                return Err(StoreError::Conflict("email already registered".into()));
            }
            if candidate.external_identity.is_some()
                && other.external_identity == candidate.external_identity
            {
                return Err(StoreError::Conflict("external identity already linked".into()));
            }
        }
        Ok(())
    }

    fn find_live(&self, pred: impl Fn(&Principal) -> bool) -> Result<Principal, StoreError> {
        self.principals
            .values()
            .filter_map(StoredPrincipal::live)
            .find(|p| pred(*p))
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

/// Both store contracts over process memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All refresh-token records of `owner_id`, oldest first.
    pub async fn refresh_tokens_for(&self, owner_id: Uuid) -> Vec<RefreshTokenRecord> {
        let data = self.data.read().await;
        let mut records: Vec<_> = data
            .refresh_tokens
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, StoreError> {
        let mut data = self.data.write().await;
        if data.refresh_tokens.contains_key(&token.token_hash) {
            return Err(StoreError::Conflict("refresh token hash already exists".into()));
        }
        let record = RefreshTokenRecord {
            id: Uuid::now_v7(),
            owner_id: token.owner_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            revoked_at: None,
            created_at: token.created_at,
        };
        data.refresh_tokens
            .insert(record.token_hash.clone(), record.clone());
        Ok(record)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<RefreshTokenRecord, StoreError> {
        let data = self.data.read().await;
        data.refresh_tokens
            .get(token_hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn revoke_by_hash(
        &self,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut data = self.data.write().await;
        match data.refresh_tokens.get_mut(token_hash) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_owner(
        &self,
        owner_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut data = self.data.write().await;
        let mut revoked = 0;
        for record in data.refresh_tokens.values_mut() {
            if record.owner_id == owner_id && record.revoked_at.is_none() {
                record.revoked_at = Some(at);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn create(&self, principal: &Principal) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        if data.principals.contains_key(&principal.id) {
            return Err(StoreError::Conflict("principal id already exists".into()));
        }
        data.check_unique(principal)?;
        data.principals.insert(
            principal.id,
            StoredPrincipal {
                principal: principal.clone(),
                deleted_at: None,
            },
        );
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Principal, StoreError> {
        let data = self.data.read().await;
        data.principals
            .get(&id)
            .and_then(StoredPrincipal::live)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_email(&self, email: &str) -> Result<Principal, StoreError> {
        self.data.read().await.find_live(|p| p.email == email)
    }

    async fn find_by_login_name(&self, login_name: &str) -> Result<Principal, StoreError> {
        self.data
            .read()
            .await
            .find_live(|p| p.login_name == login_name)
    }

    async fn login_name_taken(&self, login_name: &str) -> Result<bool, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .principals
            .values()
            .any(|stored| stored.principal.login_name == login_name))
    }

    async fn find_by_external_identity(
        &self,
        identity: &ExternalIdentity,
    ) -> Result<Principal, StoreError> {
        self.data
            .read()
            .await
            .find_live(|p| p.external_identity.as_ref() == Some(identity))
    }

    async fn update(&self, principal: &Principal) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        if data
            .principals
            .get(&principal.id)
            .and_then(StoredPrincipal::live)
            .is_none()
        {
            return Err(StoreError::NotFound);
        }
        data.check_unique(principal)?;
        if let Some(stored) = data.principals.get_mut(&principal.id) {
            stored.principal = principal.clone();
        }
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        match data.principals.get_mut(&id) {
            Some(stored) if stored.deleted_at.is_none() => {
                stored.deleted_at = Some(at);
                stored.principal.status = AccountStatus::Deleted;
                stored.principal.updated_at = at;
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }
}
