use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- History Store Args ---
    /// Conversation history store type (sqlite, redis)
    #[arg(long, env = "HISTORY_TYPE", default_value = "sqlite")]
    pub history_type: String,

    /// History store location: SQLite file path or Redis URL (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "context.db")]
    pub history_host: String,

    /// Prefix for Redis history keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "history:")]
    pub history_redis_prefix: String,

    // --- Credential Store Args ---
    /// Store for words-service session tokens (sqlite, redis)
    #[arg(long, env = "CREDENTIALS_TYPE", default_value = "sqlite")]
    pub credentials_type: String,

    /// Token store location: SQLite file path or Redis URL
    #[arg(long, env = "CREDENTIALS_HOST", default_value = "skyeng.db")]
    pub credentials_host: String,

    /// Redis hash holding the tokens.
    #[arg(long, env = "CREDENTIALS_REDIS_KEY", default_value = "skyeng:tokens")]
    pub credentials_redis_key: String,

    // --- Chat LLM Provider Args ---
    /// API Key for the OpenAI-compatible chat provider
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion. Must support function calling.
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    /// Base URL for the chat provider API (e.g., https://api.openai.com/v1)
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    // --- Token Budget Args ---
    /// Model identifier used to pick the tokenizer for context budgeting.
    #[arg(long, env = "ENCODING_MODEL_MESSAGES", default_value = "gpt-3.5-turbo-0613")]
    pub encoding_model_messages: String,

    /// Encoding used when the model identifier has no known tokenizer.
    #[arg(long, env = "ENCODING_MODEL_STRINGS", default_value = "cl100k_base")]
    pub encoding_model_strings: String,

    /// Maximum tokens of replayed context per completion call.
    #[arg(long, env = "LLM_MAX_TOKENS", default_value = "3000")]
    pub llm_max_tokens: usize,

    // --- Words Service Args ---
    /// Base URL of the identity service (login, JWT).
    #[arg(long, env = "SKYENG_ID_URL", default_value = "https://id.skyeng.ru")]
    pub skyeng_id_url: String,

    /// Base URL of the word sets API.
    #[arg(long, env = "SKYENG_WORDS_URL", default_value = "https://api.words.skyeng.ru")]
    pub skyeng_words_url: String,

    /// Base URL of the dictionary API.
    #[arg(long, env = "SKYENG_DICTIONARY_URL", default_value = "https://dictionary.skyeng.ru")]
    pub skyeng_dictionary_url: String,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Path to the prompt configuration file.
    #[arg(long, env = "PROMPTS_PATH", default_value = "json/prompts.json")]
    pub prompts_path: String,

    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional API Key required for clients to connect. If set, clients must provide this key.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Optional port for the HTTP API. Disabled when not set.
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Maximum characters per outbound response frame.
    #[arg(long, env = "CHUNK_SIZE", default_value = "4096")]
    pub chunk_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_single_node_setup() {
        let args = Args::try_parse_from(["lexicon-agent"]).unwrap();
        assert_eq!(args.history_type, "sqlite");
        assert_eq!(args.credentials_type, "sqlite");
        assert_eq!(args.encoding_model_strings, "cl100k_base");
        assert_eq!(args.llm_max_tokens, 3000);
        assert_eq!(args.chunk_size, 4096);
        assert!(args.http_port.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "lexicon-agent",
            "--history-type",
            "redis",
            "--history-host",
            "redis://cache:6379",
            "--llm-max-tokens",
            "1200",
            "--http-port",
            "8080",
        ]).unwrap();
        assert_eq!(args.history_type, "redis");
        assert_eq!(args.history_host, "redis://cache:6379");
        assert_eq!(args.llm_max_tokens, 1200);
        assert_eq!(args.http_port, Some(8080));
    }
}
