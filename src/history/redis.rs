use async_trait::async_trait;
use chrono::Utc;
use log::{ debug, error };
use redis::{ AsyncCommands, Client, Script };
use serde::{ Serialize, Deserialize };
use crate::history::{ HistoryError, HistoryStore };
use crate::models::chat::{ NewTurn, Role, StoredTurn };

// Sequence bump and push happen in one script so an append is atomic. The
// per-conversation sequence doubles as the ordering timestamp.
const APPEND_SCRIPT: &str =
    r#"
local seq = redis.call('INCR', KEYS[2])
redis.call('RPUSH', KEYS[1], '{"id":' .. seq .. ',"turn":' .. ARGV[1] .. '}')
return seq
"#;

#[derive(Deserialize)]
struct Envelope {
    id: i64,
    turn: StoredMessage,
}

#[derive(Serialize, Deserialize)]
struct StoredMessage {
    role: Role,
    content: String,
    #[serde(default)]
    action_name: Option<String>,
    #[serde(default)]
    action_arguments: Option<String>,
    created_at: i64,
}

pub struct RedisHistoryStore {
    client: Client,
    key_prefix: String,
}

impl RedisHistoryStore {
    pub fn new(url: &str, key_prefix: &str) -> Result<Self, HistoryError> {
        Ok(Self {
            client: Client::open(url)?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn turns_key(&self, conversation_id: &str) -> String {
        format!("{}{}", self.key_prefix, conversation_id)
    }

    fn sequence_key(&self, conversation_id: &str) -> String {
        format!("{}{}:seq", self.key_prefix, conversation_id)
    }
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn append(&self, turn: NewTurn) -> Result<StoredTurn, HistoryError> {
        let mut conn = self.get_connection().await?;
        let message = StoredMessage {
            role: turn.role,
            content: turn.content.clone(),
            action_name: turn.action_name.clone(),
            action_arguments: turn.action_arguments.clone(),
            created_at: Utc::now().timestamp(),
        };
        let json_msg = serde_json::to_string(&message)?;

        let id: i64 = Script::new(APPEND_SCRIPT)
            .key(self.turns_key(&turn.conversation_id))
            .key(self.sequence_key(&turn.conversation_id))
            .arg(&json_msg)
            .invoke_async(&mut conn).await?;

        debug!("Appended {} turn #{} to conversation {}", turn.role, id, turn.conversation_id);
        Ok(StoredTurn {
            id,
            conversation_id: turn.conversation_id,
            role: turn.role,
            content: turn.content,
            action_name: turn.action_name,
            action_arguments: turn.action_arguments,
            timestamp: id,
        })
    }

    async fn read_turns(&self, conversation_id: &str) -> Result<Vec<StoredTurn>, HistoryError> {
        let mut conn = self.get_connection().await?;
        let json_entries: Vec<String> = conn.lrange(self.turns_key(conversation_id), 0, -1).await?;
        let mut turns = Vec::with_capacity(json_entries.len());

        for json_entry in &json_entries {
            match serde_json::from_str::<Envelope>(json_entry) {
                Ok(Envelope { id, turn: msg }) => {
                    turns.push(StoredTurn {
                        id,
                        conversation_id: conversation_id.to_string(),
                        role: msg.role,
                        content: msg.content,
                        action_name: msg.action_name,
                        action_arguments: msg.action_arguments,
                        timestamp: id,
                    });
                }
                Err(e) => {
                    error!("Error parsing history entry: {}", e);
                    return Err(HistoryError::Corrupt(e.to_string()));
                }
            }
        }

        Ok(turns)
    }

    async fn clear(&self, conversation_id: &str) -> Result<(), HistoryError> {
        let mut conn = self.get_connection().await?;
        let _: i64 = conn
            .del(vec![self.turns_key(conversation_id), self.sequence_key(conversation_id)]).await?;
        Ok(())
    }
}
