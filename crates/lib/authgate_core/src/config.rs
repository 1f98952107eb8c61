//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::auth::keys::KeySource;
use crate::auth::password::DEFAULT_BCRYPT_COST;
use crate::auth::tokens::TokenLifetimes;

pub const DEFAULT_ISSUER: &str = "auth-service";
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(168 * 60 * 60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PUBLIC_KEY_PATH: &str = "./keys/public.pem";
pub const DEFAULT_PRIVATE_KEY_PATH: &str = "./keys/private.pem";

/// Configuration for the authentication engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// `iss` claim of issued access tokens.
    pub issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub public_key_path: PathBuf,
    pub private_key_path: PathBuf,
    /// Deadline applied to every engine operation.
    pub request_timeout: Duration,
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.into(),
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            public_key_path: DEFAULT_PUBLIC_KEY_PATH.into(),
            private_key_path: DEFAULT_PRIVATE_KEY_PATH.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }
}

impl AuthConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable            | Default              |
    /// |---------------------|----------------------|
    /// | `ACCESS_TOKEN_TTL`  | `15m`                |
    /// | `REFRESH_TOKEN_TTL` | `168h`               |
    /// | `PUBLIC_KEY_PATH`   | `./keys/public.pem`  |
    /// | `PRIVATE_KEY_PATH`  | `./keys/private.pem` |
    /// | `TOKEN_ISSUER`      | `auth-service`       |
    /// | `REQUEST_TIMEOUT`   | `30s`                |
    /// | `BCRYPT_COST`       | `10`                 |
    ///
    /// Unparseable or non-positive values fall back to the default with a
    /// warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AuthConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let duration = |key: &str, default: Duration| match text(key) {
            None => default,
            Some(raw) => match parse_duration(&raw) {
                Some(d) if !d.is_zero() => d,
                _ => {
                    warn!(key, value = %raw, default = ?default, "invalid duration, using default");
                    default
                }
            },
        };

        let bcrypt_cost = match text("BCRYPT_COST") {
            None => defaults.bcrypt_cost,
            Some(raw) => match raw.parse::<u32>() {
                Ok(cost) if (4..=31).contains(&cost) => cost,
                _ => {
                    warn!(value = %raw, "invalid BCRYPT_COST, using default");
                    defaults.bcrypt_cost
                }
            },
        };

        Self {
            issuer: text("TOKEN_ISSUER").unwrap_or(defaults.issuer),
            access_token_ttl: duration("ACCESS_TOKEN_TTL", defaults.access_token_ttl),
            refresh_token_ttl: duration("REFRESH_TOKEN_TTL", defaults.refresh_token_ttl),
            public_key_path: text("PUBLIC_KEY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.public_key_path),
            private_key_path: text("PRIVATE_KEY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.private_key_path),
            request_timeout: duration("REQUEST_TIMEOUT", defaults.request_timeout),
            bcrypt_cost,
        }
    }

    /// Both key files, for instances that issue tokens.
    pub fn key_source(&self) -> KeySource {
        KeySource::files(&self.public_key_path, &self.private_key_path)
    }

    /// Public key only, for instances that just verify.
    pub fn verify_key_source(&self) -> KeySource {
        KeySource::public_file(&self.public_key_path)
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        let defaults = TokenLifetimes::default();
        TokenLifetimes {
            access: chrono::Duration::from_std(self.access_token_ttl).unwrap_or(defaults.access),
            refresh: chrono::Duration::from_std(self.refresh_token_ttl).unwrap_or(defaults.refresh),
        }
    }
}

/// Parse a duration such as `15m`, `1h30m`, `1.5h`, `45s` or `500ms`.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` is allowed;
/// any other number needs a unit. Negative durations are rejected.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let mut rest = input.trim();
    if rest == "0" {
        return Some(Duration::ZERO);
    }
    if rest.is_empty() {
        return None;
    }

    let is_numeric = |c: char| c.is_ascii_digit() || c == '.';
    let mut nanos = 0f64;
    while !rest.is_empty() {
        let split = rest.find(|c: char| !is_numeric(c)).unwrap_or(rest.len());
        if split == 0 {
            return None;
        }
        let value: f64 = rest[..split].parse().ok()?;
        rest = &rest[split..];

        let split = rest.find(is_numeric).unwrap_or(rest.len());
        let scale = match &rest[..split] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[split..];
        nanos += value * scale;
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos.round() as u64))
}
