mod redis;
mod sqlite;

pub use self::redis::RedisHistoryStore;
pub use self::sqlite::SqliteHistoryStore;

use async_trait::async_trait;
use log::info;
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;
use crate::models::chat::{ ChatMessage, NewTurn, StoredTurn };

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("SQLite history error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Redis history error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("History serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt history row: {0}")]
    Corrupt(String),
    #[error("Unsupported history store type: {0}")]
    UnsupportedBackend(String),
}

// Each append is atomic and gets a timestamp above every earlier turn of its conversation.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, turn: NewTurn) -> Result<StoredTurn, HistoryError>;

    async fn read_turns(&self, conversation_id: &str) -> Result<Vec<StoredTurn>, HistoryError>;

    async fn read_all(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, HistoryError> {
        let turns = self.read_turns(conversation_id).await?;
        Ok(turns.iter().map(StoredTurn::to_message).collect())
    }

    async fn clear(&self, conversation_id: &str) -> Result<(), HistoryError>;
}

pub fn create_history_store(args: &Args) -> Result<Arc<dyn HistoryStore>, HistoryError> {
    info!("Chat history will be stored in: {} at {}", args.history_type, args.history_host);
    match args.history_type.to_lowercase().as_str() {
        "sqlite" => Ok(Arc::new(SqliteHistoryStore::open(&args.history_host)?)),
        "redis" => Ok(Arc::new(RedisHistoryStore::new(&args.history_host, &args.history_redis_prefix)?)),
        other => Err(HistoryError::UnsupportedBackend(other.to_string())),
    }
}

pub fn format_history(turns: &[StoredTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;

    #[test]
    fn format_history_lists_role_and_content() {
        let turns = vec![
            StoredTurn {
                id: 1,
                conversation_id: "c".into(),
                role: Role::User,
                content: "hello".into(),
                action_name: None,
                action_arguments: None,
                timestamp: 1,
            },
            StoredTurn {
                id: 2,
                conversation_id: "c".into(),
                role: Role::Assistant,
                content: "hi there".into(),
                action_name: None,
                action_arguments: None,
                timestamp: 2,
            }
        ];
        assert_eq!(format_history(&turns), "user: hello\nassistant: hi there");
        assert_eq!(format_history(&[]), "");
    }
}
