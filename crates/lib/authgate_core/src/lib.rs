//! # authgate_core
//!
//! Credential verification and token lifecycle engine for Authgate.
//!
//! The engine authenticates principals, issues short-lived RS256 access
//! tokens, and manages long-lived refresh tokens that are persisted only as
//! SHA-256 digests. Persistence is reached through the traits in [`store`];
//! an in-memory and a PostgreSQL implementation are provided.

pub mod auth;
pub mod clock;
pub mod config;
pub mod guard;
pub mod migrate;
pub mod models;
pub mod store;

pub use auth::AuthError;
pub use auth::keys::{KeyProvider, KeySource};
pub use auth::service::{AuthService, ExternalIdentityAssertion};
pub use auth::tokens::{TokenLifetimes, TokenManager};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AuthConfig;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
