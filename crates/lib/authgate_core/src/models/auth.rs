//! Authentication domain models.
//!
//! These are internal domain models. Transport layers map them to their own
//! wire representations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Token type advertised alongside issued pairs.
pub const BEARER: &str = "Bearer";

/// Account lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    Active,
    Inactive,
    Suspended,
    Deleted,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Deleted => "deleted",
        }
    }

    /// Whether a principal in this state may obtain tokens.
    ///
    /// `pending` accounts may sign in; activation gates features, not login.
    pub fn can_login(self) -> bool {
        matches!(self, AccountStatus::Active | AccountStatus::Pending)
    }

    pub fn is_terminal(self) -> bool {
        self == AccountStatus::Deleted
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown account status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for AccountStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AccountStatus::Pending),
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            "suspended" => Ok(AccountStatus::Suspended),
            "deleted" => Ok(AccountStatus::Deleted),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Rejected status change.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot change account status from {from} to {to}")]
pub struct InvalidTransition {
    pub from: AccountStatus,
    pub to: AccountStatus,
}

/// Identity asserted by a third-party provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub provider: String,
    pub provider_id: String,
}

impl ExternalIdentity {
    pub fn new(provider: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            provider_id: provider_id.into(),
        }
    }
}

/// An authenticable identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub login_name: String,
    pub email: String,
    /// Absent for accounts that only sign in through an external provider.
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub status: AccountStatus,
    pub external_identity: Option<ExternalIdentity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    /// New password-based principal in `pending` state.
    pub fn new_local(
        login_name: &str,
        email: &str,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            login_name: login_name.trim().to_string(),
            email: normalize_email(email),
            password_hash: Some(password_hash),
            status: AccountStatus::Pending,
            external_identity: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// New principal created from an external identity, without a password.
    pub fn new_external(
        login_name: &str,
        email: &str,
        identity: ExternalIdentity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            login_name: login_name.trim().to_string(),
            email: normalize_email(email),
            password_hash: None,
            status: AccountStatus::Pending,
            external_identity: Some(identity),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_login(&self) -> bool {
        self.status.can_login()
    }

    pub fn is_externally_linked(&self) -> bool {
        self.external_identity.is_some()
    }

    pub fn link_external(&mut self, identity: ExternalIdentity, now: DateTime<Utc>) {
        self.external_identity = Some(identity);
        self.updated_at = now;
    }

    /// Move to `to`. Nothing leaves `deleted`.
    pub fn transition_to(
        &mut self,
        to: AccountStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if self.status.is_terminal() && to != self.status {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

/// Canonical form used for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Derived state of a stored refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenState {
    Active,
    Revoked,
    Expired,
}

/// Refresh token record as persisted. Only the digest of the secret is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Expiry is inclusive: at `expires_at` the token is already dead.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Expiry wins over revocation so callers see `expired` for stale tokens.
    pub fn state_at(&self, now: DateTime<Utc>) -> RefreshTokenState {
        if self.is_expired_at(now) {
            RefreshTokenState::Expired
        } else if self.is_revoked() {
            RefreshTokenState::Revoked
        } else {
            RefreshTokenState::Active
        }
    }
}

/// Discriminator carried in signed claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims embedded in access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: principal ID.
    pub sub: String,
    /// Unique token ID.
    pub jti: String,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Not before (unix seconds).
    pub nbf: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    pub iss: String,
    #[serde(rename = "typ")]
    pub token_kind: TokenKind,
}

/// A freshly signed access token.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedAccessToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Identity extracted from a verified access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedAccess {
    pub subject: Uuid,
    pub jti: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Plaintext refresh secret. Handed to the caller once; never logged.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RefreshSecret(String);

impl RefreshSecret {
    pub fn new(secret: String) -> Self {
        Self(secret)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for RefreshSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshSecret(<redacted>)")
    }
}

/// A freshly minted refresh token.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedRefreshToken {
    pub secret: RefreshSecret,
    pub expires_at: DateTime<Utc>,
}

/// Access + refresh pair returned by sign-in flows.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: RefreshSecret,
    pub refresh_expires_at: DateTime<Utc>,
    pub token_type: String,
}

impl TokenPair {
    pub fn new(access: IssuedAccessToken, refresh: IssuedRefreshToken) -> Self {
        Self {
            access_token: access.token,
            access_expires_at: access.expires_at,
            refresh_token: refresh.secret,
            refresh_expires_at: refresh.expires_at,
            token_type: BEARER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn record(expires_at: DateTime<Utc>, revoked_at: Option<DateTime<Utc>>) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: Uuid::now_v7(),
            owner_id: Uuid::new_v4(),
            token_hash: "h".into(),
            expires_at,
            revoked_at,
            created_at: at(0),
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            AccountStatus::Pending,
            AccountStatus::Active,
            AccountStatus::Inactive,
            AccountStatus::Suspended,
            AccountStatus::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<AccountStatus>().unwrap(), status);
        }
        assert!("banned".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn only_active_and_pending_can_login() {
        assert!(AccountStatus::Active.can_login());
        assert!(AccountStatus::Pending.can_login());
        assert!(!AccountStatus::Inactive.can_login());
        assert!(!AccountStatus::Suspended.can_login());
        assert!(!AccountStatus::Deleted.can_login());
    }

    #[test]
    fn deleted_is_terminal() {
        let mut p = Principal::new_local("alice", "alice@example.com", "x".into(), at(0));
        p.transition_to(AccountStatus::Active, at(1)).unwrap();
        p.transition_to(AccountStatus::Deleted, at(2)).unwrap();

        let err = p.transition_to(AccountStatus::Active, at(3)).unwrap_err();
        assert_eq!(err.from, AccountStatus::Deleted);
        assert_eq!(p.status, AccountStatus::Deleted);
        assert_eq!(p.updated_at, at(2));
    }

    #[test]
    fn new_local_normalizes_email() {
        let p = Principal::new_local(" alice ", "  Alice@Example.COM ", "x".into(), at(0));
        assert_eq!(p.login_name, "alice");
        assert_eq!(p.email, "alice@example.com");
        assert_eq!(p.status, AccountStatus::Pending);
        assert!(!p.is_externally_linked());
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let r = record(at(100), None);
        assert_eq!(r.state_at(at(99)), RefreshTokenState::Active);
        assert_eq!(r.state_at(at(100)), RefreshTokenState::Expired);
    }

    #[test]
    fn revoked_unexpired_token_is_revoked() {
        let r = record(at(100), Some(at(50)));
        assert_eq!(r.state_at(at(60)), RefreshTokenState::Revoked);
        assert_eq!(r.state_at(at(100) + Duration::seconds(1)), RefreshTokenState::Expired);
    }

    #[test]
    fn refresh_secret_debug_is_redacted() {
        let secret = RefreshSecret::new("super-secret-value".into());
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("super-secret-value"));
        assert_eq!(secret.expose(), "super-secret-value");
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let p = Principal::new_local("alice", "alice@example.com", "$2b$hash".into(), at(0));
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("$2b$hash"));
    }
}
