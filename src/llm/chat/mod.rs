pub mod openai;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use super::{ LlmConfig, LlmError };
use self::openai::OpenAIChatClient;
use crate::models::chat::{ ActionCall, ChatMessage };

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionCallMode {
    Auto,
    None,
}

#[derive(Clone, Debug)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub functions: &'a [JsonValue],
    pub function_call: FunctionCallMode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelReply {
    FinalAnswer(String),
    ActionRequest(ActionCall),
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<ModelReply, LlmError>;

    async fn list_models(&self) -> Result<Vec<String>, LlmError>;

    fn get_model(&self) -> String;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, LlmError> {
    let client = OpenAIChatClient::from_config(config)?;
    Ok(Arc::new(client))
}
