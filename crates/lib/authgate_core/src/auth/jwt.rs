//! RS256 access-token encoding and verification.
//!
//! Access tokens are stateless: verification checks the signature, the
//! algorithm, the issuer and the time window, and never consults storage.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::AuthError;
use super::keys::{KeyError, KeyProvider};
use crate::clock::Clock;
use crate::models::auth::{AccessClaims, IssuedAccessToken, TokenKind, VerifiedAccess};

/// The only algorithm this service signs with or accepts.
pub const ALGORITHM: Algorithm = Algorithm::RS256;

/// Codec-level failure detail. Collapsed into [`AuthError`] at the
/// service boundary.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("signature verification failed")]
    BadSignature,

    #[error("unexpected algorithm {0}")]
    AlgorithmMismatch(String),

    #[error("unexpected issuer")]
    WrongIssuer,

    #[error("not an access token")]
    WrongTokenType,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Keys(#[from] KeyError),
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::Signing(msg) => AuthError::SigningFailure(msg),
            TokenError::Keys(k) => k.into(),
            _ => AuthError::TokenInvalid,
        }
    }
}

/// Signs and verifies access tokens for one issuer.
#[derive(Debug, Clone)]
pub struct AccessTokenCodec {
    keys: Arc<KeyProvider>,
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl AccessTokenCodec {
    pub fn new(keys: Arc<KeyProvider>, issuer: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            clock,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign a token for `subject` valid for `ttl` from now.
    pub fn issue(&self, subject: Uuid, ttl: Duration) -> Result<IssuedAccessToken, TokenError> {
        if ttl <= Duration::zero() {
            return Err(TokenError::Signing(format!(
                "access token lifetime must be positive, got {ttl}"
            )));
        }

        let signing_key = self.keys.signing_key()?;
        let now = self.clock.now().timestamp();
        let exp = now + ttl.num_seconds().max(1);
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| TokenError::Signing(format!("expiry {exp} out of range")))?;

        let claims = AccessClaims {
            sub: subject.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            nbf: now,
            exp,
            iss: self.issuer.clone(),
            token_kind: TokenKind::Access,
        };

        let mut header = Header::new(ALGORITHM);
        header.kid = Some(self.keys.key_id()?.to_string());

        let token = encode(&header, &claims, signing_key)
            .map_err(|e| TokenError::Signing(format!("jwt encode: {e}")))?;

        Ok(IssuedAccessToken {
            token,
            jti: claims.jti,
            expires_at,
        })
    }

    /// Verify a token and return the identity it asserts.
    pub fn verify(&self, token: &str) -> Result<VerifiedAccess, TokenError> {
        // The header is untrusted until the signature checks out; only its
        // algorithm is inspected here.
        let header = decode_header(token).map_err(map_jwt_error)?;
        if header.alg != ALGORITHM {
            debug!(alg = ?header.alg, "rejecting token with foreign algorithm");
            return Err(TokenError::AlgorithmMismatch(format!("{:?}", header.alg)));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss"]);
        validation.set_issuer(&[self.issuer.as_str()]);

        let claims = decode::<AccessClaims>(token, self.keys.verifying_key()?, &validation)
            .map_err(map_jwt_error)?
            .claims;

        if claims.token_kind != TokenKind::Access {
            return Err(TokenError::WrongTokenType);
        }

        let now = self.clock.now().timestamp();
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }

        let subject = Uuid::parse_str(&claims.sub)
            .map_err(|_| TokenError::Malformed("subject is not a principal id".into()))?;
        if claims.jti.is_empty() {
            return Err(TokenError::Malformed("missing jti".into()));
        }

        Ok(VerifiedAccess {
            subject,
            jti: claims.jti,
            issued_at: timestamp(claims.iat)?,
            expires_at: timestamp(claims.exp)?,
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TokenError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| TokenError::Malformed(format!("timestamp {secs} out of range")))
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> TokenError {
    match e.kind() {
        ErrorKind::InvalidSignature => TokenError::BadSignature,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            TokenError::AlgorithmMismatch(e.to_string())
        }
        ErrorKind::InvalidIssuer => TokenError::WrongIssuer,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::ImmatureSignature => TokenError::NotYetValid,
        _ => TokenError::Malformed(e.to_string()),
    }
}
