//! End-to-end token lifecycle over the in-memory store.

mod common;

use std::sync::Arc;

use authgate_core::{AuthError, KeyProvider, KeySource};
use chrono::Duration;
use common::{PASSWORD, PUBLIC_PEM, ROGUE_PRIVATE_PEM, ROGUE_PUBLIC_PEM, harness};

#[tokio::test]
async fn login_yields_verifiable_access_and_live_refresh() {
    let h = harness();
    let id = h.register("alice").await;

    let pair = h.service.login("alice", PASSWORD).await.expect("login");
    assert_eq!(pair.token_type, "Bearer");

    // any holder of the public key alone can verify
    let verifier_keys = Arc::new(
        KeyProvider::from_source(KeySource::public_pem(PUBLIC_PEM)).expect("public key"),
    );
    let verifier = common::codec(verifier_keys, h.clock.clone());
    assert_eq!(verifier.verify(&pair.access_token).unwrap().subject, id);

    let record = h
        .service
        .tokens()
        .validate_refresh_token(pair.refresh_token.expose())
        .await
        .expect("refresh token is live");
    assert_eq!(record.owner_id, id);
}

#[tokio::test]
async fn issuing_a_new_refresh_token_invalidates_the_previous_one() {
    let h = harness();
    let id = h.register("alice").await;
    let tokens = h.service.tokens();

    let first = tokens.issue_refresh_token(id).await.unwrap();
    let second = tokens.issue_refresh_token(id).await.unwrap();

    assert!(matches!(
        tokens.validate_refresh_token(first.secret.expose()).await,
        Err(AuthError::TokenInvalid)
    ));
    assert!(tokens.validate_refresh_token(second.secret.expose()).await.is_ok());
    assert_eq!(h.live_refresh_tokens(id).await, 1);
}

#[tokio::test]
async fn access_token_valid_strictly_before_expiry() {
    let h = harness();
    let id = h.register("alice").await;
    let issued = h.service.tokens().issue_access_token(id).unwrap();
    assert_eq!(issued.expires_at, common::start() + Duration::minutes(15));

    h.clock.set(issued.expires_at - Duration::seconds(1));
    assert_eq!(h.service.authenticate(&issued.token).unwrap().subject, id);

    h.clock.set(issued.expires_at);
    assert!(matches!(
        h.service.authenticate(&issued.token),
        Err(AuthError::TokenExpired)
    ));

    h.clock.advance(Duration::hours(1));
    assert!(matches!(
        h.service.authenticate(&issued.token),
        Err(AuthError::TokenExpired)
    ));
}

#[tokio::test]
async fn fresh_refresh_token_validates() {
    let h = harness();
    let id = h.register("alice").await;
    let issued = h.service.tokens().issue_refresh_token(id).await.unwrap();
    assert!(h
        .service
        .tokens()
        .validate_refresh_token(issued.secret.expose())
        .await
        .is_ok());
}

#[tokio::test]
async fn logout_twice_is_harmless() {
    let h = harness();
    h.register("alice").await;
    let pair = h.service.login("alice", PASSWORD).await.unwrap();

    h.service.logout(pair.refresh_token.expose()).await.unwrap();
    h.service.logout(pair.refresh_token.expose()).await.unwrap();

    assert!(matches!(
        h.service.refresh(pair.refresh_token.expose()).await,
        Err(AuthError::TokenInvalid)
    ));
}

#[tokio::test]
async fn register_then_login_scenario() {
    let h = harness();
    let principal = h
        .service
        .register("alice", "alice@example.com", "Str0ng!Pass")
        .await
        .unwrap();
    assert_eq!(principal.status.as_str(), "pending");

    assert!(h.service.login("alice", "Str0ng!Pass").await.is_ok());
    assert!(matches!(
        h.service.login("alice", "wrong").await,
        Err(AuthError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn second_login_revokes_first_session() {
    let h = harness();
    h.register("alice").await;

    let first = h.service.login("alice", PASSWORD).await.unwrap();
    let second = h.service.login("alice", PASSWORD).await.unwrap();

    assert!(matches!(
        h.service.refresh(first.refresh_token.expose()).await,
        Err(AuthError::TokenInvalid)
    ));
    assert!(h.service.refresh(second.refresh_token.expose()).await.is_ok());
}

#[tokio::test]
async fn token_signed_by_another_key_is_invalid() {
    let h = harness();
    let id = h.register("alice").await;

    let rogue = common::codec(
        common::keys(ROGUE_PUBLIC_PEM, ROGUE_PRIVATE_PEM),
        h.clock.clone(),
    );
    let forged = rogue.issue(id, Duration::minutes(15)).unwrap();

    assert!(matches!(
        h.service.authenticate(&forged.token),
        Err(AuthError::TokenInvalid)
    ));
}

#[tokio::test]
async fn refresh_with_expired_or_revoked_token() {
    let h = harness();
    h.register("alice").await;
    h.register("bob").await;

    let alice = h.service.login("alice", PASSWORD).await.unwrap();
    let bob = h.service.login("bob", PASSWORD).await.unwrap();

    h.service.logout(bob.refresh_token.expose()).await.unwrap();
    assert!(matches!(
        h.service.refresh(bob.refresh_token.expose()).await,
        Err(AuthError::TokenInvalid)
    ));

    h.clock.set(alice.refresh_expires_at);
    assert!(matches!(
        h.service.refresh(alice.refresh_token.expose()).await,
        Err(AuthError::TokenExpired)
    ));
}

#[tokio::test]
async fn refresh_issues_access_for_owner() {
    let h = harness();
    let id = h.register("alice").await;
    let pair = h.service.login("alice", PASSWORD).await.unwrap();

    h.clock.advance(Duration::minutes(20));
    assert!(matches!(
        h.service.authenticate(&pair.access_token),
        Err(AuthError::TokenExpired)
    ));

    let access = h.service.refresh(pair.refresh_token.expose()).await.unwrap();
    assert_eq!(h.service.authenticate(&access.token).unwrap().subject, id);
}

#[tokio::test]
async fn rotate_session_replaces_the_pair() {
    let h = harness();
    let id = h.register("alice").await;
    let pair = h.service.login("alice", PASSWORD).await.unwrap();

    let rotated = h
        .service
        .rotate_session(pair.refresh_token.expose())
        .await
        .unwrap();
    assert_ne!(rotated.refresh_token, pair.refresh_token);
    assert!(matches!(
        h.service.refresh(pair.refresh_token.expose()).await,
        Err(AuthError::TokenInvalid)
    ));
    assert!(h.service.refresh(rotated.refresh_token.expose()).await.is_ok());
    assert_eq!(h.live_refresh_tokens(id).await, 1);

    // replaying the old token does not mint anything
    assert!(matches!(
        h.service.rotate_session(pair.refresh_token.expose()).await,
        Err(AuthError::TokenInvalid)
    ));
}

#[tokio::test]
async fn logout_all_ends_every_session() {
    let h = harness();
    let id = h.register("alice").await;
    let tokens = h.service.tokens();
    let a = tokens.issue_refresh_token(id).await.unwrap();

    assert_eq!(h.service.logout_all(id).await.unwrap(), 1);
    assert!(tokens.validate_refresh_token(a.secret.expose()).await.is_err());
    assert_eq!(h.live_refresh_tokens(id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_logins_all_succeed() {
    let h = Arc::new(harness());
    let id = h.register("alice").await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            h.service.login("alice", PASSWORD).await
        }));
    }
    for task in tasks {
        task.await.unwrap().expect("login");
    }

    // a later login settles the principal back to one live session
    h.service.login("alice", PASSWORD).await.unwrap();
    assert_eq!(h.live_refresh_tokens(id).await, 1);
}
