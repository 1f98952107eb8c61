//! `authgate` operator binary.
//!
//! Loads configuration from the environment (and `.env`), then runs one
//! maintenance command against the token engine. Command output goes to
//! stdout as JSON; logs go to stderr.

pub use self::error::{Error, Result};
mod error;

use std::process::ExitCode;
use std::sync::Arc;

use authgate_core::auth::jwt::AccessTokenCodec;
use authgate_core::{AuthConfig, AuthError, KeyProvider, SystemClock};
use clap::Parser;
use cli::{Cli, Commands, KeyArgs};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

mod cli;
mod logging;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    logging::init()?;

    let args = Cli::parse();
    let config = configure(&args.keys);

    match args.command {
        Commands::CheckKeys { verify_only } => {
            let source = if verify_only {
                config.verify_key_source()
            } else {
                config.key_source()
            };
            let keys = KeyProvider::from_source(source)?;
            let key_id = keys.key_id().map_err(AuthError::from)?;
            print_json(&serde_json::json!({
                "key_id": key_id,
                "can_sign": keys.can_sign(),
            }))?;
        }
        Commands::Issue { subject, ttl } => {
            let keys = Arc::new(KeyProvider::from_source(config.key_source())?);
            let codec = AccessTokenCodec::new(keys, config.issuer.clone(), Arc::new(SystemClock));
            let ttl = ttl.unwrap_or(config.lifetimes().access);
            let issued = codec.issue(subject, ttl).map_err(AuthError::from)?;
            info!(user_id = %subject, jti = %issued.jti, expires_at = %issued.expires_at, "access token issued");
            print_json(&issued)?;
        }
        Commands::Verify { token } => {
            let keys = Arc::new(KeyProvider::from_source(config.verify_key_source())?);
            let codec = AccessTokenCodec::new(keys, config.issuer.clone(), Arc::new(SystemClock));
            let verified = codec.verify(&token).map_err(AuthError::from)?;
            print_json(&verified)?;
        }
        Commands::Migrate { database_url } => {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(config.request_timeout)
                .connect(&database_url)
                .await?;
            info!("running database migrations");
            authgate_core::migrate::migrate(&pool).await?;
            pool.close().await;
        }
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), authgate_core::version());
        }
    }

    Ok(())
}

/// Environment configuration with command-line overrides applied.
fn configure(overrides: &KeyArgs) -> AuthConfig {
    let mut config = AuthConfig::from_env();
    if let Some(path) = &overrides.public_key {
        config.public_key_path = path.clone();
    }
    if let Some(path) = &overrides.private_key {
        config.private_key_path = path.clone();
    }
    if let Some(issuer) = &overrides.issuer {
        config.issuer = issuer.clone();
    }
    config
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
