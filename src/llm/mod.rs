pub mod chat;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OpenAI API key is required")]
    MissingApiKey,
    #[error("Invalid API key format: {0}")]
    InvalidApiKey(String),
    #[error("HTTP error calling the model: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Model API returned {status}: {body}")]
    Api {
        status: u16,
        body: String,
    },
    #[error("Model response contained no choices")]
    EmptyResponse,
}

#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub completion_model: Option<String>,
    pub base_url: Option<String>,
}
