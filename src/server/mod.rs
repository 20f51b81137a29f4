pub mod api;
pub mod websocket;

use crate::agent::Assistant;
use crate::cli::Args;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::{ Mutex, OwnedMutexGuard };
use log::{ info, warn };

#[derive(Clone, Default)]
pub struct ConversationLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(conversation_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}

// A zero limit disables splitting.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if max_chars == 0 {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

pub struct Server {
    addr: String,
    assistant: Arc<Assistant>,
    locks: ConversationLocks,
    args: Args,
}

impl Server {
    pub fn new(addr: String, assistant: Arc<Assistant>, args: Args) -> Self {
        let has_key = args.server_api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if has_key {
            info!("Server configured with API Key authentication.");
        } else {
            warn!("Server configured WITHOUT API Key authentication. Connections are open.");
        }
        Self {
            addr,
            assistant,
            locks: ConversationLocks::new(),
            args,
        }
    }

    fn api_key(&self) -> Option<String> {
        self.args.server_api_key.clone().filter(|k| !k.trim().is_empty())
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(http_port) = self.args.http_port {
            api::start_http_server(
                http_port,
                Arc::clone(&self.assistant),
                self.locks.clone(),
                self.api_key()
            ).await?;
        }

        websocket::start_ws_server(
            &self.addr,
            Arc::clone(&self.assistant),
            self.locks.clone(),
            self.api_key(),
            self.args.chunk_size
        ).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn chunks_respect_limit_and_char_boundaries() {
        assert!(chunk_text("", 4096).is_empty());
        assert_eq!(chunk_text("abcdef", 4), vec!["abcd", "ef"]);
        assert_eq!(chunk_text("привет", 4), vec!["прив", "ет"]);
        assert_eq!(chunk_text("short", 0), vec!["short"]);

        let long = "x".repeat(10_000);
        let chunks = chunk_text(&long, 4096);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4096));
        assert_eq!(chunks.concat(), long);
    }

    #[tokio::test]
    async fn same_conversation_turns_are_serialized() {
        let locks = ConversationLocks::new();
        let first = locks.acquire("chat").await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _guard = contender.acquire("chat").await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        let _other = tokio::time::timeout(Duration::from_millis(50), locks.acquire("other")).await.unwrap();

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn idle_locks_are_pruned() {
        let locks = ConversationLocks::new();
        drop(locks.acquire("a").await);
        drop(locks.acquire("b").await);
        let _held = locks.acquire("c").await;
        assert_eq!(locks.tracked().await, 1);
    }
}
