//! RSA key material for access tokens.
//!
//! [`KeyProvider`] is constructed once at process start and shared behind an
//! `Arc`. Initialization runs at most once: concurrent first callers block on
//! a single loader, and its outcome (success or failure) is final.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info};

use super::AuthError;

/// Key loading and lookup errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("signing keys have not been initialized")]
    NotInitialized,

    #[error("failed to read {role} key from {path}: {reason}")]
    Read {
        role: &'static str,
        path: String,
        reason: String,
    },

    #[error("failed to parse {role} key: {reason}")]
    Parse { role: &'static str, reason: String },

    #[error("private key does not match public key")]
    Mismatch,

    #[error("no private key loaded; this instance can only verify tokens")]
    VerifyOnly,
}

impl From<KeyError> for AuthError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::NotInitialized => AuthError::KeysNotInitialized,
            other => AuthError::KeyLoadFailure(other.to_string()),
        }
    }
}

/// Where PEM-encoded keys come from. The private key is optional: verifier
/// instances only need the public half.
#[derive(Clone)]
pub enum KeySource {
    Files {
        public: PathBuf,
        private: Option<PathBuf>,
    },
    Pem {
        public: Vec<u8>,
        private: Option<Vec<u8>>,
    },
}

impl KeySource {
    pub fn files(public: impl Into<PathBuf>, private: impl Into<PathBuf>) -> Self {
        KeySource::Files {
            public: public.into(),
            private: Some(private.into()),
        }
    }

    pub fn public_file(public: impl Into<PathBuf>) -> Self {
        KeySource::Files {
            public: public.into(),
            private: None,
        }
    }

    pub fn pem(public: impl Into<Vec<u8>>, private: impl Into<Vec<u8>>) -> Self {
        KeySource::Pem {
            public: public.into(),
            private: Some(private.into()),
        }
    }

    pub fn public_pem(public: impl Into<Vec<u8>>) -> Self {
        KeySource::Pem {
            public: public.into(),
            private: None,
        }
    }

    fn load(self) -> Result<KeyMaterial, KeyError> {
        match self {
            KeySource::Files { public, private } => {
                let public = read_pem("public", &public)?;
                let private = private
                    .map(|path| read_pem("private", &path))
                    .transpose()?;
                KeyMaterial::from_pem(&public, private.as_deref())
            }
            KeySource::Pem { public, private } => KeyMaterial::from_pem(&public, private.as_deref()),
        }
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Files { public, private } => f
                .debug_struct("Files")
                .field("public", public)
                .field("private", private)
                .finish(),
            KeySource::Pem { private, .. } => f
                .debug_struct("Pem")
                .field("has_private", &private.is_some())
                .finish_non_exhaustive(),
        }
    }
}

fn read_pem(role: &'static str, path: &Path) -> Result<Vec<u8>, KeyError> {
    std::fs::read(path).map_err(|e| KeyError::Read {
        role,
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

struct KeyMaterial {
    signing: Option<EncodingKey>,
    verifying: DecodingKey,
    key_id: String,
}

impl KeyMaterial {
    fn from_pem(public: &[u8], private: Option<&[u8]>) -> Result<Self, KeyError> {
        let verifying = DecodingKey::from_rsa_pem(public).map_err(|e| KeyError::Parse {
            role: "public",
            reason: e.to_string(),
        })?;
        let signing = private
            .map(|pem| {
                EncodingKey::from_rsa_pem(pem).map_err(|e| KeyError::Parse {
                    role: "private",
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        if let Some(signing) = &signing {
            check_pair(signing, &verifying)?;
        }

        Ok(Self {
            signing,
            verifying,
            key_id: fingerprint(public),
        })
    }
}

/// Sign a throwaway payload and verify it, so a mismatched pair fails at
/// startup instead of on the first request.
fn check_pair(signing: &EncodingKey, verifying: &DecodingKey) -> Result<(), KeyError> {
    let probe = jsonwebtoken::encode(
        &Header::new(Algorithm::RS256),
        &serde_json::json!({ "probe": true }),
        signing,
    )
    .map_err(|e| KeyError::Parse {
        role: "private",
        reason: e.to_string(),
    })?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<serde_json::Value>(&probe, verifying, &validation)
        .map(|_| ())
        .map_err(|_| KeyError::Mismatch)
}

/// Short SHA-256 fingerprint of the public key, used as the `kid` header.
fn fingerprint(public_pem: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(public_pem));
    digest[..16].to_string()
}

/// Holds the access-token keypair for the lifetime of the process.
#[derive(Default)]
pub struct KeyProvider {
    material: OnceLock<Result<KeyMaterial, KeyError>>,
}

impl KeyProvider {
    /// An uninitialized provider. Every accessor fails until
    /// [`KeyProvider::initialize`] succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct and initialize in one step.
    pub fn from_source(source: KeySource) -> Result<Self, AuthError> {
        let provider = Self::new();
        provider.initialize(source)?;
        Ok(provider)
    }

    /// Load keys from `source`. Only the first call does any work; later
    /// calls return the first outcome and ignore their argument.
    pub fn initialize(&self, source: KeySource) -> Result<(), AuthError> {
        let outcome = self.material.get_or_init(|| {
            let loaded = source.load();
            match &loaded {
                Ok(m) => info!(
                    key_id = %m.key_id,
                    can_sign = m.signing.is_some(),
                    "loaded access-token keys"
                ),
                Err(e) => error!(error = %e, "failed to load access-token keys"),
            }
            loaded
        });
        match outcome {
            Ok(_) => Ok(()),
            Err(e) => Err(e.clone().into()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.material.get(), Some(Ok(_)))
    }

    pub fn can_sign(&self) -> bool {
        self.material().is_ok_and(|m| m.signing.is_some())
    }

    pub fn signing_key(&self) -> Result<&EncodingKey, KeyError> {
        self.material()?.signing.as_ref().ok_or(KeyError::VerifyOnly)
    }

    pub fn verifying_key(&self) -> Result<&DecodingKey, KeyError> {
        Ok(&self.material()?.verifying)
    }

    pub fn key_id(&self) -> Result<&str, KeyError> {
        Ok(&self.material()?.key_id)
    }

    fn material(&self) -> Result<&KeyMaterial, KeyError> {
        match self.material.get() {
            Some(Ok(m)) => Ok(m),
            Some(Err(e)) => Err(e.clone()),
            None => Err(KeyError::NotInitialized),
        }
    }
}

impl fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyProvider")
            .field("initialized", &self.is_initialized())
            .field("can_sign", &self.can_sign())
            .finish()
    }
}
