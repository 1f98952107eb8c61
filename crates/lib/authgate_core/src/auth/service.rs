//! Sign-in flows: login, registration, logout, session refresh and
//! external-identity reconciliation.
//!
//! Every public operation runs under [`guard::bounded`] with the configured
//! request timeout and the service's shutdown token. Internal failures are
//! logged here with context; callers get the typed [`AuthError`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::AuthError;
use super::jwt::AccessTokenCodec;
use super::keys::KeyProvider;
use super::password::{BcryptHasher, PasswordHasher};
use super::tokens::TokenManager;
use super::validation::{self, LoginIdentifier};
use crate::clock::Clock;
use crate::config::{AuthConfig, DEFAULT_REQUEST_TIMEOUT};
use crate::guard;
use crate::models::auth::{
    AccountStatus, ExternalIdentity, IssuedAccessToken, Principal, TokenPair, VerifiedAccess,
    normalize_email,
};
use crate::store::{PrincipalStore, RefreshTokenStore, StoreError};

/// Candidates tried (`seed`, `seed1` … `seed9`) before falling back to a
/// random suffix.
const LOGIN_NAME_ATTEMPTS: usize = 10;

/// Identity vouched for by an external provider after its own exchange
/// completed.
#[derive(Debug, Clone)]
pub struct ExternalIdentityAssertion {
    pub provider: String,
    pub provider_id: String,
    pub email: String,
}

/// Authentication flow controller.
#[derive(Clone)]
pub struct AuthService {
    principals: Arc<dyn PrincipalStore>,
    tokens: TokenManager,
    hasher: Arc<dyn PasswordHasher>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl AuthService {
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        tokens: TokenManager,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            principals,
            tokens,
            hasher,
            clock,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    /// Wire the engine from configuration, using bcrypt for passwords.
    pub fn build(
        config: &AuthConfig,
        keys: Arc<KeyProvider>,
        principals: Arc<dyn PrincipalStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let codec = AccessTokenCodec::new(keys, config.issuer.clone(), clock.clone());
        let tokens = TokenManager::new(codec, refresh_tokens, clock.clone(), config.lifetimes());
        Self::new(
            principals,
            tokens,
            Arc::new(BcryptHasher::new(config.bcrypt_cost)),
            clock,
        )
        .with_request_timeout(config.request_timeout)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Cancelling `shutdown` aborts every in-flight operation with
    /// [`AuthError::Cancelled`].
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Authenticate by email or login name plus password.
    ///
    /// Unknown identifiers and wrong passwords both yield
    /// [`AuthError::InvalidCredentials`].
    pub async fn login(&self, identifier: &str, password: &str) -> Result<TokenPair, AuthError> {
        self.bounded("login", self.login_inner(identifier, password))
            .await
    }

    /// Create a password principal in `pending` state.
    pub async fn register(
        &self,
        login_name: &str,
        email: &str,
        password: &str,
    ) -> Result<Principal, AuthError> {
        self.bounded("register", self.register_inner(login_name, email, password))
            .await
    }

    /// Revoke a refresh token. Idempotent.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        self.bounded("logout", async {
            self.tokens
                .revoke(refresh_token)
                .await
                .inspect(|_| info!("logout"))
        })
        .await
    }

    /// New access token from a live refresh token, which stays valid.
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedAccessToken, AuthError> {
        self.bounded("refresh", self.tokens.refresh_access_token(refresh_token))
            .await
    }

    /// Trade a live refresh token for a new pair. The presented token and
    /// every other session of its owner are revoked.
    pub async fn rotate_session(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        self.bounded("rotate_session", self.rotate_inner(refresh_token))
            .await
    }

    /// Revoke every refresh token of a principal.
    pub async fn logout_all(&self, principal_id: Uuid) -> Result<u64, AuthError> {
        self.bounded("logout_all", async {
            self.tokens.revoke_all(principal_id).await.inspect(|revoked| {
                info!(user_id = %principal_id, revoked = *revoked, "logged out everywhere")
            })
        })
        .await
    }

    /// Verify an access token. Purely cryptographic; no store access.
    pub fn authenticate(&self, access_token: &str) -> Result<VerifiedAccess, AuthError> {
        self.tokens.validate_access_token(access_token)
    }

    /// Resolve an external identity to a principal, linking or creating one
    /// as needed, and issue a token pair for it.
    pub async fn handle_external_identity(
        &self,
        assertion: &ExternalIdentityAssertion,
    ) -> Result<(Principal, TokenPair), AuthError> {
        self.bounded("handle_external_identity", self.external_inner(assertion))
            .await
    }

    pub async fn get_principal(&self, id: Uuid) -> Result<Principal, AuthError> {
        self.bounded("get_principal", async {
            self.principals.find_by_id(id).await.map_err(AuthError::from)
        })
        .await
    }

    pub async fn get_principal_by_login_name(&self, login_name: &str) -> Result<Principal, AuthError> {
        validation::validate_login_name(login_name)?;
        self.bounded("get_principal_by_login_name", async {
            self.principals
                .find_by_login_name(login_name)
                .await
                .map_err(AuthError::from)
        })
        .await
    }

    /// Move a principal to `status`. Statuses that forbid login end all of
    /// its sessions; `deleted` soft-deletes it.
    pub async fn change_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<Principal, AuthError> {
        self.bounded("change_status", self.change_status_inner(id, status))
            .await
    }

    /// Soft-delete a principal after revoking its sessions.
    pub async fn delete_principal(&self, id: Uuid) -> Result<(), AuthError> {
        self.bounded("delete_principal", self.delete_inner(id))
            .await
    }

    // -----------------------------------------------------------------------
    // Flows
    // -----------------------------------------------------------------------

    async fn login_inner(&self, identifier: &str, password: &str) -> Result<TokenPair, AuthError> {
        let Some(identifier) = LoginIdentifier::classify(identifier) else {
            return Err(AuthError::InvalidCredentials);
        };

        let found = match &identifier {
            LoginIdentifier::Email(email) => self.principals.find_by_email(email).await,
            LoginIdentifier::LoginName(name) => self.principals.find_by_login_name(name).await,
        };
        let principal = match found {
            Ok(p) => p,
            Err(StoreError::NotFound) => return Err(AuthError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        if !principal.can_login() {
            return Err(AuthError::UserInactive);
        }
        // externally linked principals without a password cannot use this path
        let Some(digest) = principal.password_hash.as_deref() else {
            return Err(AuthError::InvalidCredentials);
        };
        if !self.verify_password(password, digest).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let pair = self.tokens.issue_pair(principal.id).await?;
        info!(user_id = %principal.id, "login succeeded");
        Ok(pair)
    }

    async fn register_inner(
        &self,
        login_name: &str,
        email: &str,
        password: &str,
    ) -> Result<Principal, AuthError> {
        let login_name = login_name.trim();
        let email = email.trim();
        validation::validate_login_name(login_name)?;
        validation::validate_email(email)?;
        validation::validate_password(password)?;

        let digest = self.hash_password(password).await?;
        let principal = Principal::new_local(login_name, email, digest, self.clock.now());
        self.principals.create(&principal).await?;

        info!(user_id = %principal.id, login_name = %principal.login_name, "principal registered");
        Ok(principal)
    }

    async fn rotate_inner(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let record = self.tokens.validate_refresh_token(refresh_token).await?;
        match self.principals.find_by_id(record.owner_id).await {
            Ok(p) if p.can_login() => {}
            Ok(_) => return Err(AuthError::UserInactive),
            Err(StoreError::NotFound) => return Err(AuthError::TokenInvalid),
            Err(e) => return Err(e.into()),
        }

        let (owner, pair) = self.tokens.rotate(refresh_token).await?;
        debug!(user_id = %owner, "session rotated");
        Ok(pair)
    }

    async fn external_inner(
        &self,
        assertion: &ExternalIdentityAssertion,
    ) -> Result<(Principal, TokenPair), AuthError> {
        let provider = assertion.provider.trim();
        let provider_id = assertion.provider_id.trim();
        if provider.is_empty() || provider_id.is_empty() {
            return Err(AuthError::Validation(
                "external identity needs a provider and a provider id".into(),
            ));
        }
        let email = normalize_email(&assertion.email);
        validation::validate_email(&email)?;

        let identity = ExternalIdentity::new(provider, provider_id);
        let existing = match self.principals.find_by_external_identity(&identity).await {
            Ok(p) => Some(p),
            Err(StoreError::NotFound) => match self.principals.find_by_email(&email).await {
                Ok(p) => Some(p),
                Err(StoreError::NotFound) => None,
                Err(e) => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        };

        let now = self.clock.now();
        let principal = match existing {
            Some(mut principal) => {
                if !principal.is_externally_linked() {
                    principal.link_external(identity, now);
                    self.principals.update(&principal).await?;
                    info!(user_id = %principal.id, provider, "linked external identity");
                }
                principal
            }
            None => {
                let login_name = self.unused_login_name(&email).await?;
                let principal = Principal::new_external(&login_name, &email, identity, now);
                self.principals.create(&principal).await?;
                info!(user_id = %principal.id, provider, "principal created from external identity");
                principal
            }
        };

        if !principal.can_login() {
            return Err(AuthError::UserInactive);
        }
        let pair = self.tokens.issue_pair(principal.id).await?;
        Ok((principal, pair))
    }

    /// First login name derived from `email` that no principal holds,
    /// deleted ones included.
    async fn unused_login_name(&self, email: &str) -> Result<String, AuthError> {
        let seed = validation::login_name_seed(email);
        for attempt in 0..LOGIN_NAME_ATTEMPTS {
            let candidate = if attempt == 0 {
                seed.clone()
            } else {
                format!("{seed}{attempt}")
            };
            if !self.principals.login_name_taken(&candidate).await? {
                return Ok(candidate);
            }
        }
        let suffix = Uuid::new_v4().simple().to_string();
        Ok(format!("{seed}_{}", &suffix[..8]))
    }

    async fn change_status_inner(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<Principal, AuthError> {
        let mut principal = self.principals.find_by_id(id).await?;
        if status == AccountStatus::Deleted {
            self.delete_inner(id).await?;
            principal.status = AccountStatus::Deleted;
            principal.updated_at = self.clock.now();
            return Ok(principal);
        }

        let from = principal.status;
        principal
            .transition_to(status, self.clock.now())
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        // sessions first: a failed revoke leaves the old status in place
        if !status.can_login() {
            self.tokens.revoke_all(id).await?;
        }
        self.principals.update(&principal).await?;
        info!(user_id = %id, %from, to = %status, "account status changed");
        Ok(principal)
    }

    async fn delete_inner(&self, id: Uuid) -> Result<(), AuthError> {
        // sessions first, so a failed revoke leaves the account intact for a retry
        self.tokens.revoke_all(id).await?;
        self.principals.soft_delete(id, self.clock.now()).await?;
        info!(user_id = %id, "principal deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::HashingFailure(format!("hashing task: {e}")))?
    }

    async fn verify_password(&self, password: &str, digest: &str) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        let digest = digest.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &digest))
            .await
            .map_err(|e| AuthError::HashingFailure(format!("verification task: {e}")))
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, AuthError>>,
    ) -> Result<T, AuthError> {
        let outcome = guard::bounded(self.request_timeout, &self.shutdown, fut).await;
        match &outcome {
            Err(e) if e.is_internal() => error!(op, error = %e, "auth operation failed"),
            Err(AuthError::Cancelled) => warn!(op, "auth operation cancelled"),
            Err(e) => debug!(op, error = %e, "auth operation rejected"),
            Ok(_) => {}
        }
        outcome
    }
}
