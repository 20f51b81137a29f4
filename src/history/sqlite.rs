use async_trait::async_trait;
use chrono::Utc;
use log::{ debug, info };
use rusqlite::{ params, Connection, OptionalExtension };
use std::path::Path;
use tokio::sync::Mutex;
use crate::history::{ HistoryError, HistoryStore };
use crate::models::chat::{ NewTurn, ParseRoleError, Role, StoredTurn };

const SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS messages (
         id            INTEGER PRIMARY KEY,
         chat_id       TEXT NOT NULL,
         role          TEXT NOT NULL,
         content       TEXT NOT NULL,
         function_name TEXT,
         arguments     TEXT,
         timestamp     INTEGER NOT NULL
     );
     CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, timestamp);";

pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        info!("SQLite history store opened at {:?}", path.as_ref());
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self, HistoryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, turn: NewTurn) -> Result<StoredTurn, HistoryError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let last: Option<i64> = tx
            .query_row(
                "SELECT MAX(timestamp) FROM messages WHERE chat_id = ?1",
                params![turn.conversation_id],
                |row| row.get(0)
            )
            .optional()?
            .flatten();
        let now = Utc::now().timestamp_micros();
        let timestamp = match last {
            Some(last) if last >= now => last + 1,
            _ => now,
        };

        tx.execute(
            "INSERT INTO messages (chat_id, role, content, function_name, arguments, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                turn.conversation_id,
                turn.role.as_str(),
                turn.content,
                turn.action_name,
                turn.action_arguments,
                timestamp
            ]
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!("Appended {} turn #{} to conversation {}", turn.role, id, turn.conversation_id);
        Ok(StoredTurn {
            id,
            conversation_id: turn.conversation_id,
            role: turn.role,
            content: turn.content,
            action_name: turn.action_name,
            action_arguments: turn.action_arguments,
            timestamp,
        })
    }

    async fn read_turns(&self, conversation_id: &str) -> Result<Vec<StoredTurn>, HistoryError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, role, content, function_name, arguments, timestamp
             FROM messages WHERE chat_id = ?1 ORDER BY timestamp ASC, id ASC"
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut turns = Vec::new();
        for row in rows {
            let (id, conversation_id, role, content, action_name, action_arguments, timestamp) =
                row?;
            let role: Role = role.parse().map_err(|e: ParseRoleError| HistoryError::Corrupt(e.to_string()))?;
            turns.push(StoredTurn {
                id,
                conversation_id,
                role,
                content,
                action_name,
                action_arguments,
                timestamp,
            });
        }
        Ok(turns)
    }

    async fn clear(&self, conversation_id: &str) -> Result<(), HistoryError> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM messages WHERE chat_id = ?1", params![conversation_id])?;
        info!("Cleared {} turns from conversation {}", removed, conversation_id);
        Ok(())
    }
}
