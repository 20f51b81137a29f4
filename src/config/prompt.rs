use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use log::info;
use thiserror::Error;

pub const DEFAULT_WELCOME_MESSAGE: &str = "Welcome! How can I assist you today?";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Failed to read prompts file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse prompts file '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Prompts file '{0}' has an empty system_prompt")]
    EmptySystemPrompt(String),
}

fn default_welcome_message() -> String {
    DEFAULT_WELCOME_MESSAGE.to_string()
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PromptConfig {
    pub system_prompt: String,
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
    #[serde(skip)]
    pub last_loaded: Option<SystemTime>,
}

impl PromptConfig {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            welcome_message: default_welcome_message(),
            last_loaded: None,
        }
    }
}

pub fn load_prompts<P: AsRef<Path>>(path: P) -> Result<Arc<PromptConfig>, PromptError> {
    let display = path.as_ref().display().to_string();
    let io_error = |source| PromptError::Io { path: display.clone(), source };

    let modified = fs::metadata(&path).and_then(|m| m.modified()).map_err(io_error)?;
    let file_content = fs::read_to_string(&path).map_err(io_error)?;
    let mut config: PromptConfig = serde_json
        ::from_str(&file_content)
        .map_err(|source| PromptError::Json { path: display.clone(), source })?;
    if config.system_prompt.trim().is_empty() {
        return Err(PromptError::EmptySystemPrompt(display));
    }
    config.last_loaded = Some(modified);
    Ok(Arc::new(config))
}

pub fn reload_prompts_if_changed<P: AsRef<Path>>(
    path: P,
    current_config: &PromptConfig
) -> Result<Option<Arc<PromptConfig>>, PromptError> {
    let modified = fs
        ::metadata(&path)
        .and_then(|m| m.modified())
        .map_err(|source| PromptError::Io { path: path.as_ref().display().to_string(), source })?;

    let changed = match current_config.last_loaded {
        Some(last_loaded) => modified > last_loaded,
        None => true,
    };
    if !changed {
        return Ok(None);
    }
    info!("Prompts file changed, reloading...");
    load_prompts(path).map(Some)
}
