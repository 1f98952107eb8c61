use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "authgate", about = "Authgate token engine operator tool")]
pub struct Cli {
    #[command(flatten)]
    pub keys: KeyArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides for the environment-derived configuration.
#[derive(Args, Debug)]
pub struct KeyArgs {
    /// RSA public key (PEM).
    #[arg(long, global = true, env = "PUBLIC_KEY_PATH")]
    pub public_key: Option<PathBuf>,

    /// RSA private key (PEM).
    #[arg(long, global = true, env = "PRIVATE_KEY_PATH")]
    pub private_key: Option<PathBuf>,

    /// `iss` claim written and expected.
    #[arg(long, global = true, env = "TOKEN_ISSUER")]
    pub issuer: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load the key pair and report its key id.
    CheckKeys {
        /// Only load the public key.
        #[arg(long)]
        verify_only: bool,
    },

    /// Sign an access token for a subject.
    Issue {
        #[arg(long)]
        subject: Uuid,

        /// Lifetime such as `15m` or `1h30m`; defaults to ACCESS_TOKEN_TTL.
        #[arg(long, value_parser = parse_ttl)]
        ttl: Option<chrono::Duration>,
    },

    /// Verify an access token with the public key and print its claims.
    Verify { token: String },

    /// Apply database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },

    Version,
}

fn parse_ttl(raw: &str) -> Result<chrono::Duration, String> {
    authgate_core::config::parse_duration(raw)
        .filter(|d| !d.is_zero())
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .ok_or_else(|| format!("invalid duration `{raw}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ttl() {
        assert_eq!(parse_ttl("90s").unwrap(), chrono::Duration::seconds(90));
        assert_eq!(parse_ttl("1h30m").unwrap(), chrono::Duration::minutes(90));
        assert!(parse_ttl("0").is_err());
        assert!(parse_ttl("soon").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
