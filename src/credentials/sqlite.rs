use async_trait::async_trait;
use log::info;
use rusqlite::{ params, Connection, OptionalExtension };
use std::path::Path;
use tokio::sync::Mutex;
use crate::credentials::{ CredentialError, CredentialStore };

const SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS tokens (
         username TEXT PRIMARY KEY,
         token    TEXT NOT NULL
     );";

pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        info!("SQLite credential store opened at {:?}", path.as_ref());
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self, CredentialError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn upsert(&self, user_id: &str, token: &str) -> Result<(), CredentialError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO tokens (username, token) VALUES (?1, ?2)",
            params![user_id, token]
        )?;
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<String>, CredentialError> {
        let conn = self.conn.lock().await;
        let token = conn
            .query_row("SELECT token FROM tokens WHERE username = ?1", params![user_id], |row|
                row.get(0)
            )
            .optional()?;
        Ok(token)
    }
}
