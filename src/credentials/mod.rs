mod redis;
mod sqlite;

pub use self::redis::RedisCredentialStore;
pub use self::sqlite::SqliteCredentialStore;

use async_trait::async_trait;
use log::info;
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("SQLite credential error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Redis credential error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("Unsupported credential store type: {0}")]
    UnsupportedBackend(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn upsert(&self, user_id: &str, token: &str) -> Result<(), CredentialError>;

    async fn get(&self, user_id: &str) -> Result<Option<String>, CredentialError>;
}

pub fn create_credential_store(args: &Args) -> Result<Arc<dyn CredentialStore>, CredentialError> {
    info!("Service tokens will be stored in: {} at {}", args.credentials_type, args.credentials_host);
    match args.credentials_type.to_lowercase().as_str() {
        "sqlite" => Ok(Arc::new(SqliteCredentialStore::open(&args.credentials_host)?)),
        "redis" => Ok(Arc::new(RedisCredentialStore::new(&args.credentials_host, &args.credentials_redis_key)?)),
        other => Err(CredentialError::UnsupportedBackend(other.to_string())),
    }
}
