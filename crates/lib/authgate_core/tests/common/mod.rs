//! Shared harness: in-memory store, frozen clock, fixture RSA keys.

#![allow(dead_code)]

use std::sync::Arc;

use authgate_core::auth::password::BcryptHasher;
use authgate_core::auth::jwt::AccessTokenCodec;
use authgate_core::store::memory::MemoryStore;
use authgate_core::{
    AuthService, KeyProvider, KeySource, ManualClock, TokenLifetimes, TokenManager,
};
use chrono::{DateTime, Utc};

pub const PUBLIC_PEM: &str = include_str!("../fixtures/signing_public.pem");
pub const PRIVATE_PEM: &str = include_str!("../fixtures/signing_private.pem");
pub const ROGUE_PUBLIC_PEM: &str = include_str!("../fixtures/rogue_public.pem");
pub const ROGUE_PRIVATE_PEM: &str = include_str!("../fixtures/rogue_private.pem");

pub const ISSUER: &str = "auth-service";
pub const PASSWORD: &str = "Str0ng!Pass";

pub fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
}

pub struct Harness {
    pub service: AuthService,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub keys: Arc<KeyProvider>,
}

pub fn keys(public: &str, private: &str) -> Arc<KeyProvider> {
    Arc::new(KeyProvider::from_source(KeySource::pem(public, private)).expect("fixture keys"))
}

pub fn codec(keys: Arc<KeyProvider>, clock: Arc<ManualClock>) -> AccessTokenCodec {
    AccessTokenCodec::new(keys, ISSUER, clock)
}

pub fn harness() -> Harness {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(start()));
    let keys = keys(PUBLIC_PEM, PRIVATE_PEM);
    let tokens = TokenManager::new(
        codec(keys.clone(), clock.clone()),
        Arc::new(store.clone()),
        clock.clone(),
        TokenLifetimes::default(),
    );
    // cost 4 keeps bcrypt fast in tests
    let service = AuthService::new(
        Arc::new(store.clone()),
        tokens,
        Arc::new(BcryptHasher::new(4)),
        clock.clone(),
    );
    Harness {
        service,
        store,
        clock,
        keys,
    }
}

impl Harness {
    /// Register `login_name` with [`PASSWORD`] and return its id.
    pub async fn register(&self, login_name: &str) -> uuid::Uuid {
        self.service
            .register(login_name, &format!("{login_name}@example.com"), PASSWORD)
            .await
            .expect("register")
            .id
    }

    /// Number of refresh tokens of `owner` that are live right now.
    pub async fn live_refresh_tokens(&self, owner: uuid::Uuid) -> usize {
        let now = authgate_core::Clock::now(self.clock.as_ref());
        self.store
            .refresh_tokens_for(owner)
            .await
            .iter()
            .filter(|r| !r.is_revoked() && !r.is_expired_at(now))
            .count()
    }
}
