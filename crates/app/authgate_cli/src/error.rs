use authgate_core::AuthError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", .0)]
    Custom(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("database: {}", .0)]
    Database(#[from] sqlx::Error),

    #[error("migration: {}", .0)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("json: {}", .0)]
    Json(#[from] serde_json::Error),
}
