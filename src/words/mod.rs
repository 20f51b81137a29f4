pub mod skyeng;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;

pub use self::skyeng::{ SkyengClient, SkyengClientFactory, SkyengConfig };

#[derive(Debug, Error)]
pub enum WordsApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Service returned {status}")]
    Status {
        status: u16,
        body: String,
    },
    #[error("CSRF token not found on login page")]
    CsrfNotFound,
    #[error("No session token was issued")]
    MissingToken,
    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct WordSetPage {
    pub sets: Vec<JsonValue>,
    pub last_page: JsonValue,
}

#[async_trait]
pub trait WordsApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<String, WordsApiError>;

    async fn word_sets(
        &self,
        token: &str,
        page_number: i64,
        page_size: i64
    ) -> Result<WordSetPage, WordsApiError>;

    async fn words_from_set(&self, token: &str, set_id: i64) -> Result<JsonValue, WordsApiError>;

    async fn words_data(&self, token: &str, word_ids: &[String]) -> Result<JsonValue, WordsApiError>;
}

pub trait WordsApiFactory: Send + Sync {
    fn open_session(&self) -> Result<Arc<dyn WordsApi>, WordsApiError>;
}
