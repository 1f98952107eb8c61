//! Token lifecycle: issuance, validation, rotation and revocation.
//!
//! Refresh tokens are opaque 256-bit secrets. Only their SHA-256 digest is
//! persisted; the plaintext is returned to the caller once. Issuing a
//! refresh token revokes every earlier token of the same principal, so a
//! principal holds at most one live session. That revoke-then-create step
//! is two independent store calls: concurrent logins for one principal can
//! briefly leave two tokens live.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Duration;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use super::AuthError;
use super::jwt::AccessTokenCodec;
use crate::clock::Clock;
use crate::models::auth::{
    IssuedAccessToken, IssuedRefreshToken, RefreshSecret, RefreshTokenRecord, RefreshTokenState,
    TokenPair, VerifiedAccess,
};
use crate::store::{NewRefreshToken, RefreshTokenStore, StoreError};

/// Random bytes per refresh secret.
const REFRESH_SECRET_BYTES: usize = 32;

/// Generate a fresh refresh secret: 32 random bytes, base64url without
/// padding.
pub fn generate_refresh_secret() -> RefreshSecret {
    let mut bytes = [0u8; REFRESH_SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    RefreshSecret::new(URL_SAFE_NO_PAD.encode(bytes))
}

/// Storage digest of a refresh secret (lowercase hex SHA-256).
pub fn hash_refresh_secret(secret: &str) -> String {
    format!("{:x}", Sha256::digest(secret.as_bytes()))
}

/// Token lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access: Duration::minutes(15),
            refresh: Duration::hours(168),
        }
    }
}

/// Owns every decision to mint, rotate or revoke tokens.
#[derive(Clone)]
pub struct TokenManager {
    codec: AccessTokenCodec,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    clock: Arc<dyn Clock>,
    lifetimes: TokenLifetimes,
}

impl TokenManager {
    pub fn new(
        codec: AccessTokenCodec,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        clock: Arc<dyn Clock>,
        lifetimes: TokenLifetimes,
    ) -> Self {
        Self {
            codec,
            refresh_tokens,
            clock,
            lifetimes,
        }
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    pub fn issue_access_token(&self, subject: Uuid) -> Result<IssuedAccessToken, AuthError> {
        Ok(self.codec.issue(subject, self.lifetimes.access)?)
    }

    /// Verify an access token. Stateless: revocation is not consulted.
    pub fn validate_access_token(&self, token: &str) -> Result<VerifiedAccess, AuthError> {
        self.codec.verify(token).map_err(|e| {
            debug!(error = %e, "access token rejected");
            e.into()
        })
    }

    /// Mint a refresh token for `subject`, revoking all of its earlier ones.
    ///
    /// Failure to revoke the old tokens is logged and tolerated; failure to
    /// persist the new one is not.
    pub async fn issue_refresh_token(&self, subject: Uuid) -> Result<IssuedRefreshToken, AuthError> {
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.lifetimes.refresh)
            .ok_or_else(|| {
                AuthError::StoreFailure(format!(
                    "refresh token lifetime {} out of range",
                    self.lifetimes.refresh
                ))
            })?;

        match self.refresh_tokens.revoke_all_for_owner(subject, now).await {
            Ok(0) => {}
            Ok(n) => debug!(user_id = %subject, revoked = n, "superseded earlier refresh tokens"),
            Err(e) => warn!(
                user_id = %subject,
                error = %e,
                "failed to revoke earlier refresh tokens; issuing anyway"
            ),
        }

        let secret = generate_refresh_secret();
        self.refresh_tokens
            .create(NewRefreshToken {
                owner_id: subject,
                token_hash: hash_refresh_secret(secret.expose()),
                expires_at,
                created_at: now,
            })
            .await
            .map_err(|e| AuthError::StoreFailure(format!("persist refresh token: {e}")))?;

        Ok(IssuedRefreshToken { secret, expires_at })
    }

    /// Access token plus a fresh refresh token for `subject`.
    pub async fn issue_pair(&self, subject: Uuid) -> Result<TokenPair, AuthError> {
        let access = self.issue_access_token(subject)?;
        let refresh = self.issue_refresh_token(subject).await?;
        Ok(TokenPair::new(access, refresh))
    }

    /// Look up a refresh secret and check it is still live.
    ///
    /// Unknown and revoked tokens are both `TokenInvalid`; a stale token is
    /// `TokenExpired` whether or not it was also revoked.
    pub async fn validate_refresh_token(&self, secret: &str) -> Result<RefreshTokenRecord, AuthError> {
        if secret.trim().is_empty() {
            return Err(AuthError::TokenInvalid);
        }

        let record = match self
            .refresh_tokens
            .find_by_hash(&hash_refresh_secret(secret))
            .await
        {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                debug!("unknown refresh token");
                return Err(AuthError::TokenInvalid);
            }
            Err(e) => return Err(AuthError::StoreFailure(format!("find refresh token: {e}"))),
        };

        match record.state_at(self.clock.now()) {
            RefreshTokenState::Active => Ok(record),
            RefreshTokenState::Expired => {
                debug!(user_id = %record.owner_id, "expired refresh token");
                Err(AuthError::TokenExpired)
            }
            RefreshTokenState::Revoked => {
                debug!(user_id = %record.owner_id, "revoked refresh token");
                Err(AuthError::TokenInvalid)
            }
        }
    }

    /// New access token for the owner of a live refresh token. The refresh
    /// token itself is left untouched.
    pub async fn refresh_access_token(&self, secret: &str) -> Result<IssuedAccessToken, AuthError> {
        let record = self.validate_refresh_token(secret).await?;
        self.issue_access_token(record.owner_id)
    }

    /// Exchange a live refresh token for a new pair, revoking the presented
    /// token and every other token of its owner.
    ///
    /// Only the caller whose revoke actually flips the token gets a pair;
    /// a concurrent rotation of the same secret fails with `TokenInvalid`.
    pub async fn rotate(&self, secret: &str) -> Result<(Uuid, TokenPair), AuthError> {
        let record = self.validate_refresh_token(secret).await?;
        let revoked = self
            .refresh_tokens
            .revoke_by_hash(&record.token_hash, self.clock.now())
            .await
            .map_err(|e| AuthError::StoreFailure(format!("revoke refresh token: {e}")))?;
        if !revoked {
            debug!(user_id = %record.owner_id, "refresh token already rotated");
            return Err(AuthError::TokenInvalid);
        }
        let pair = self.issue_pair(record.owner_id).await?;
        Ok((record.owner_id, pair))
    }

    /// Revoke one refresh token. Repeating the call, or revoking a token the
    /// store has never seen, succeeds without effect.
    pub async fn revoke(&self, secret: &str) -> Result<(), AuthError> {
        if secret.trim().is_empty() {
            return Err(AuthError::TokenInvalid);
        }
        self.refresh_tokens
            .revoke_by_hash(&hash_refresh_secret(secret), self.clock.now())
            .await
            .map(|_| ())
            .map_err(|e| AuthError::StoreFailure(format!("revoke refresh token: {e}")))
    }

    /// Revoke every refresh token of `owner`.
    pub async fn revoke_all(&self, owner: Uuid) -> Result<u64, AuthError> {
        self.refresh_tokens
            .revoke_all_for_owner(owner, self.clock.now())
            .await
            .map_err(|e| AuthError::StoreFailure(format!("revoke refresh tokens: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::keys::{KeyProvider, KeySource};
    use crate::clock::ManualClock;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    const PUBLIC: &[u8] = include_bytes!("../../tests/fixtures/signing_public.pem");
    const PRIVATE: &[u8] = include_bytes!("../../tests/fixtures/signing_private.pem");

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn manager_over(store: Arc<dyn RefreshTokenStore>) -> (TokenManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let keys = Arc::new(KeyProvider::from_source(KeySource::pem(PUBLIC, PRIVATE)).unwrap());
        let codec = AccessTokenCodec::new(keys, "auth-service", clock.clone());
        let manager = TokenManager::new(codec, store, clock.clone(), TokenLifetimes::default());
        (manager, clock)
    }

    fn setup() -> (TokenManager, Arc<ManualClock>, MemoryStore) {
        let store = MemoryStore::new();
        let (manager, clock) = manager_over(Arc::new(store.clone()));
        (manager, clock, store)
    }

    /// Memory store whose bulk revoke or reads can be made to fail, or
    /// whose reads can lag behind revocations.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_revoke_all: bool,
        fail_reads: bool,
        stale_reads: bool,
    }

    #[async_trait]
    impl RefreshTokenStore for FlakyStore {
        async fn create(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, StoreError> {
            RefreshTokenStore::create(&self.inner, token).await
        }

        async fn find_by_hash(&self, token_hash: &str) -> Result<RefreshTokenRecord, StoreError> {
            if self.fail_reads {
                return Err(StoreError::Backend("connection reset".into()));
            }
            let mut record = self.inner.find_by_hash(token_hash).await?;
            if self.stale_reads {
                record.revoked_at = None;
            }
            Ok(record)
        }

        async fn revoke_by_hash(
            &self,
            token_hash: &str,
            at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.revoke_by_hash(token_hash, at).await
        }

        async fn revoke_all_for_owner(
            &self,
            owner_id: Uuid,
            at: DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            if self.fail_revoke_all {
                return Err(StoreError::Backend("connection reset".into()));
            }
            self.inner.revoke_all_for_owner(owner_id, at).await
        }
    }

    #[test]
    fn secrets_are_random_and_long() {
        let a = generate_refresh_secret();
        let b = generate_refresh_secret();
        assert_ne!(a, b);
        // 32 bytes base64url without padding
        assert_eq!(a.expose().len(), 43);
    }

    #[test]
    fn hash_is_deterministic_hex() {
        let h = hash_refresh_secret("secret");
        assert_eq!(h, hash_refresh_secret("secret"));
        assert_eq!(h.len(), 64);
        assert_ne!(h, hash_refresh_secret("Secret"));
    }

    #[test]
    fn default_lifetimes() {
        let l = TokenLifetimes::default();
        assert_eq!(l.access, Duration::minutes(15));
        assert_eq!(l.refresh, Duration::hours(168));
    }

    #[tokio::test]
    async fn issued_refresh_token_validates() {
        let (tokens, _, store) = setup();
        let subject = Uuid::new_v4();
        let issued = tokens.issue_refresh_token(subject).await.unwrap();
        assert_eq!(issued.expires_at, start() + Duration::hours(168));

        let record = tokens
            .validate_refresh_token(issued.secret.expose())
            .await
            .unwrap();
        assert_eq!(record.owner_id, subject);
        // only the digest is stored
        assert_ne!(record.token_hash, issued.secret.expose());
        assert_eq!(store.refresh_tokens_for(subject).await.len(), 1);
    }

    #[tokio::test]
    async fn new_refresh_token_supersedes_old() {
        let (tokens, _, _) = setup();
        let subject = Uuid::new_v4();
        let first = tokens.issue_refresh_token(subject).await.unwrap();
        let second = tokens.issue_refresh_token(subject).await.unwrap();

        assert!(matches!(
            tokens.validate_refresh_token(first.secret.expose()).await,
            Err(AuthError::TokenInvalid)
        ));
        assert!(tokens
            .validate_refresh_token(second.secret.expose())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn other_principals_are_unaffected() {
        let (tokens, _, _) = setup();
        let alice = tokens.issue_refresh_token(Uuid::new_v4()).await.unwrap();
        tokens.issue_refresh_token(Uuid::new_v4()).await.unwrap();
        assert!(tokens
            .validate_refresh_token(alice.secret.expose())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn refresh_expiry_is_inclusive() {
        let (tokens, clock, _) = setup();
        let issued = tokens.issue_refresh_token(Uuid::new_v4()).await.unwrap();

        clock.set(issued.expires_at - Duration::seconds(1));
        assert!(tokens
            .validate_refresh_token(issued.secret.expose())
            .await
            .is_ok());

        clock.set(issued.expires_at);
        assert!(matches!(
            tokens.validate_refresh_token(issued.secret.expose()).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn expired_and_revoked_reports_expired() {
        let (tokens, clock, _) = setup();
        let issued = tokens.issue_refresh_token(Uuid::new_v4()).await.unwrap();
        tokens.revoke(issued.secret.expose()).await.unwrap();
        clock.advance(Duration::hours(200));
        assert!(matches!(
            tokens.validate_refresh_token(issued.secret.expose()).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn unknown_and_blank_secrets_are_invalid() {
        let (tokens, _, _) = setup();
        for secret in ["", "   ", "never-issued"] {
            assert!(matches!(
                tokens.validate_refresh_token(secret).await,
                Err(AuthError::TokenInvalid)
            ));
        }
        assert!(matches!(tokens.revoke(" ").await, Err(AuthError::TokenInvalid)));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let (tokens, _, _) = setup();
        let issued = tokens.issue_refresh_token(Uuid::new_v4()).await.unwrap();

        tokens.revoke(issued.secret.expose()).await.unwrap();
        tokens.revoke(issued.secret.expose()).await.unwrap();
        assert!(matches!(
            tokens.validate_refresh_token(issued.secret.expose()).await,
            Err(AuthError::TokenInvalid)
        ));
        tokens.revoke("never-issued").await.unwrap();
    }

    #[tokio::test]
    async fn refresh_access_token_does_not_rotate() {
        let (tokens, _, _) = setup();
        let subject = Uuid::new_v4();
        let issued = tokens.issue_refresh_token(subject).await.unwrap();

        let access = tokens
            .refresh_access_token(issued.secret.expose())
            .await
            .unwrap();
        assert_eq!(
            tokens.validate_access_token(&access.token).unwrap().subject,
            subject
        );
        // still usable
        assert!(tokens
            .refresh_access_token(issued.secret.expose())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn rotate_revokes_presented_token() {
        let (tokens, _, _) = setup();
        let subject = Uuid::new_v4();
        let issued = tokens.issue_refresh_token(subject).await.unwrap();

        let (owner, pair) = tokens.rotate(issued.secret.expose()).await.unwrap();
        assert_eq!(owner, subject);
        assert!(matches!(
            tokens.validate_refresh_token(issued.secret.expose()).await,
            Err(AuthError::TokenInvalid)
        ));
        assert!(tokens
            .validate_refresh_token(pair.refresh_token.expose())
            .await
            .is_ok());
        assert!(matches!(
            tokens.rotate(issued.secret.expose()).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn revoke_all_counts_live_tokens() {
        let (tokens, _, _) = setup();
        let subject = Uuid::new_v4();
        let issued = tokens.issue_refresh_token(subject).await.unwrap();
        assert_eq!(tokens.revoke_all(subject).await.unwrap(), 1);
        assert_eq!(tokens.revoke_all(subject).await.unwrap(), 0);
        assert!(tokens
            .validate_refresh_token(issued.secret.expose())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn failed_cleanup_does_not_block_issuance() {
        let (tokens, _) = manager_over(Arc::new(FlakyStore {
            fail_revoke_all: true,
            ..Default::default()
        }));
        let issued = tokens.issue_refresh_token(Uuid::new_v4()).await.unwrap();
        assert!(tokens
            .validate_refresh_token(issued.secret.expose())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn backend_errors_are_store_failures() {
        let (tokens, _) = manager_over(Arc::new(FlakyStore {
            fail_reads: true,
            ..Default::default()
        }));
        let issued = tokens.issue_refresh_token(Uuid::new_v4()).await.unwrap();
        let err = tokens
            .validate_refresh_token(issued.secret.expose())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StoreFailure(_)));
        assert!(err.is_internal());
    }

    #[tokio::test]
    async fn losing_rotation_race_mints_nothing() {
        // reads that miss the revocation stand in for two rotations
        // validating the same secret before either revokes it
        let store = MemoryStore::new();
        let (tokens, _) = manager_over(Arc::new(FlakyStore {
            inner: store.clone(),
            stale_reads: true,
            ..Default::default()
        }));
        let subject = Uuid::new_v4();
        let issued = tokens.issue_refresh_token(subject).await.unwrap();

        let (_, winner) = tokens.rotate(issued.secret.expose()).await.unwrap();
        assert!(matches!(
            tokens.rotate(issued.secret.expose()).await,
            Err(AuthError::TokenInvalid)
        ));

        let live: Vec<_> = store
            .refresh_tokens_for(subject)
            .await
            .into_iter()
            .filter(|r| !r.is_revoked())
            .collect();
        assert_eq!(live.len(), 1);
        assert_eq!(
            live[0].token_hash,
            hash_refresh_secret(winner.refresh_token.expose())
        );
    }

    #[tokio::test]
    async fn out_of_range_refresh_lifetime_is_an_error() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(start()));
        let keys = Arc::new(KeyProvider::from_source(KeySource::pem(PUBLIC, PRIVATE)).unwrap());
        let codec = AccessTokenCodec::new(keys, "auth-service", clock.clone());
        let lifetimes = TokenLifetimes {
            refresh: Duration::days(1_000_000_000),
            ..TokenLifetimes::default()
        };
        let tokens = TokenManager::new(codec, Arc::new(store.clone()), clock, lifetimes);

        let subject = Uuid::new_v4();
        let err = tokens.issue_refresh_token(subject).await.unwrap_err();
        assert!(matches!(err, AuthError::StoreFailure(_)));
        assert!(store.refresh_tokens_for(subject).await.is_empty());
    }
}
