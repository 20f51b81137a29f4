use crate::actions::{ Action, ActionDispatcher, ActionError };
use crate::cli::Args;
use crate::config::prompt::{ self, PromptConfig, PromptError };
use crate::credentials::{ create_credential_store, CredentialError, CredentialStore };
use crate::history::{ create_history_store, format_history, HistoryError, HistoryStore };
use crate::llm::{ LlmConfig, LlmError };
use crate::llm::chat::{ new_client as new_chat_client, ChatClient, CompletionRequest, FunctionCallMode, ModelReply };
use crate::models::chat::{ ChatMessage, NewTurn, StoredTurn };
use crate::tokens::{ TokenBudgeter, Tokenizer };
use crate::words::{ SkyengClientFactory, SkyengConfig, WordsApiError, WordsApiFactory };

use log::{ debug, info, warn };
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

pub const MAX_ACTION_ITERATIONS: usize = 4;

pub const EMPTY_CONTEXT_MESSAGE: &str = "No conversation context available.";

const ACTION_LIMIT_ANSWER: &str =
    "Sorry, I could not finish that request within the allowed number of steps. Please try again.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("History store failure: {0}")]
    History(#[from] HistoryError),
    #[error("Credential store failure: {0}")]
    Credentials(#[from] CredentialError),
    #[error("Model call failed: {0}")]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("Words service unavailable: {0}")]
    WordsApi(#[from] WordsApiError),
    #[error("Failed to serialize action result: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

pub struct Assistant {
    history: Arc<dyn HistoryStore>,
    budgeter: TokenBudgeter,
    chat_client: Arc<dyn ChatClient>,
    credentials: Arc<dyn CredentialStore>,
    words: Arc<dyn WordsApiFactory>,
    prompts: RwLock<Arc<PromptConfig>>,
    prompts_path: Option<PathBuf>,
}

impl Assistant {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        budgeter: TokenBudgeter,
        chat_client: Arc<dyn ChatClient>,
        credentials: Arc<dyn CredentialStore>,
        words: Arc<dyn WordsApiFactory>,
        prompts: Arc<PromptConfig>
    ) -> Self {
        Self {
            history,
            budgeter,
            chat_client,
            credentials,
            words,
            prompts: RwLock::new(prompts),
            prompts_path: None,
        }
    }

    pub fn with_prompts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.prompts_path = Some(path.into());
        self
    }

    pub fn from_args(args: &Args) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let chat_api_key = if !args.chat_api_key.is_empty() { Some(args.chat_api_key.clone()) } else { None };
        let chat_config = LlmConfig {
            api_key: chat_api_key,
            completion_model: args.chat_model.clone(),
            base_url: args.chat_base_url.clone(),
        };
        let chat_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Model={}, BaseURL={:?}",
            chat_client.get_model(),
            chat_config.base_url.as_deref().unwrap_or("adapter default")
        );

        let tokenizer = Tokenizer::resolve(&args.encoding_model_messages, &args.encoding_model_strings);
        info!("Context budget: {} tokens ({})", args.llm_max_tokens, tokenizer.name());
        let budgeter = TokenBudgeter::new(tokenizer, args.llm_max_tokens);

        let history = create_history_store(args)?;
        let credentials = create_credential_store(args)?;
        let words = Arc::new(
            SkyengClientFactory::new(
                SkyengConfig::from_bases(&args.skyeng_id_url, &args.skyeng_words_url, &args.skyeng_dictionary_url)
            )
        );
        let prompts = prompt::load_prompts(&args.prompts_path)?;
        info!("Loaded prompts from: {}", args.prompts_path);

        Ok(
            Self::new(history, budgeter, chat_client, credentials, words, prompts).with_prompts_path(
                &args.prompts_path
            )
        )
    }

    pub async fn process_message(&self, conversation_id: &str, text: &str) -> Result<String, AgentError> {
        self.history.append(NewTurn::user(conversation_id, text)).await?;
        let history = self.history.read_all(conversation_id).await?;
        let system_prompt = self.prompts.read().await.system_prompt.clone();
        let mut window = self.budgeter.build_window(&system_prompt, history).messages;

        let mut iterations = 0;
        let mut mode = FunctionCallMode::Auto;
        let answer = loop {
            let request = CompletionRequest {
                messages: &window,
                functions: Action::schemas(),
                function_call: mode,
            };
            let call = match self.chat_client.complete(&request).await? {
                ModelReply::FinalAnswer(content) => {
                    break content;
                }
                ModelReply::ActionRequest(call) => call,
            };

            if iterations >= MAX_ACTION_ITERATIONS {
                warn!(
                    "[{}] Model requested '{}' after the action limit; not dispatching",
                    conversation_id,
                    call.name
                );
                break ACTION_LIMIT_ANSWER.to_string();
            }

            let resolved = call.resolve()?;
            info!("[{}] Iteration {}: model requested '{}'", conversation_id, iterations + 1, call.name);
            let dispatcher = ActionDispatcher::new(
                conversation_id,
                Arc::clone(&self.credentials),
                self.words.open_session()?
            );
            let result = dispatcher.dispatch(resolved).await?;
            let content = serde_json::to_string(&result)?;

            self.history.append(NewTurn::function(conversation_id, &call, content.as_str())).await?;
            let name = call.name.clone();
            window.push(ChatMessage::action_request(call));
            window.push(ChatMessage::function(name, content));

            iterations += 1;
            if iterations >= MAX_ACTION_ITERATIONS {
                debug!("[{}] Action limit reached; forcing a direct answer", conversation_id);
                mode = FunctionCallMode::None;
            }
        };

        self.history.append(NewTurn::assistant(conversation_id, answer.as_str())).await?;
        info!("[{}] Turn finished after {} action(s)", conversation_id, iterations);
        Ok(answer)
    }

    pub async fn clear_history(&self, conversation_id: &str) -> Result<(), AgentError> {
        self.history.clear(conversation_id).await?;
        Ok(())
    }

    async fn context_turns(&self, conversation_id: &str) -> Result<Vec<StoredTurn>, AgentError> {
        Ok(self.history.read_turns(conversation_id).await?)
    }

    // Action arguments stay in the store.
    pub async fn context_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, AgentError> {
        Ok(self.history.read_all(conversation_id).await?)
    }

    pub async fn format_context(&self, conversation_id: &str) -> Result<String, AgentError> {
        let turns = self.context_turns(conversation_id).await?;
        if turns.is_empty() {
            return Ok(EMPTY_CONTEXT_MESSAGE.to_string());
        }
        Ok(format_history(&turns))
    }

    pub async fn welcome_message(&self) -> String {
        self.prompts.read().await.welcome_message.clone()
    }

    pub async fn list_models(&self) -> Result<Vec<String>, AgentError> {
        Ok(self.chat_client.list_models().await?)
    }

    pub async fn reload_prompts_if_changed(&self) -> Result<bool, AgentError> {
        let Some(path) = &self.prompts_path else {
            return Ok(false);
        };
        let current = Arc::clone(&*self.prompts.read().await);
        match prompt::reload_prompts_if_changed(path, &current)? {
            Some(new_config) => {
                *self.prompts.write().await = new_config;
                info!("Prompts successfully reloaded");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::actions::tests::StubWordsApi;
    use crate::actions::ActionResult;
    use crate::credentials::SqliteCredentialStore;
    use crate::history::SqliteHistoryStore;
    use crate::models::chat::{ ActionCall, Role };
    use crate::words::WordsApi;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct ScriptedChatClient {
        replies: Mutex<VecDeque<Result<ModelReply, LlmError>>>,
        fallback: Option<ModelReply>,
        seen: Mutex<Vec<(FunctionCallMode, Vec<ChatMessage>)>>,
    }

    impl ScriptedChatClient {
        pub(crate) fn new(replies: Vec<Result<ModelReply, LlmError>>) -> Self {
            Self { replies: Mutex::new(replies.into()), ..Default::default() }
        }

        fn modes(&self) -> Vec<FunctionCallMode> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|(mode, _)| *mode)
                .collect()
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChatClient {
        async fn complete(&self, request: &CompletionRequest<'_>) -> Result<ModelReply, LlmError> {
            assert_eq!(request.functions.len(), 4);
            self.seen.lock().unwrap().push((request.function_call, request.messages.to_vec()));
            match self.replies.lock().unwrap().pop_front() {
                Some(reply) => reply,
                None => self.fallback.clone().ok_or(LlmError::EmptyResponse),
            }
        }

        async fn list_models(&self) -> Result<Vec<String>, LlmError> {
            Ok(vec!["gpt-3.5-turbo-0613".into(), "gpt-4".into()])
        }

        fn get_model(&self) -> String {
            "scripted".into()
        }
    }

    struct StubFactory(Arc<StubWordsApi>);

    impl WordsApiFactory for StubFactory {
        fn open_session(&self) -> Result<Arc<dyn WordsApi>, WordsApiError> {
            Ok(self.0.clone())
        }
    }

    pub(crate) struct Fixture {
        pub(crate) assistant: Assistant,
        pub(crate) history: Arc<SqliteHistoryStore>,
        chat: Arc<ScriptedChatClient>,
        api: Arc<StubWordsApi>,
    }

    pub(crate) fn fixture(chat: ScriptedChatClient) -> Fixture {
        let history = Arc::new(SqliteHistoryStore::in_memory().unwrap());
        let chat = Arc::new(chat);
        let api = Arc::new(StubWordsApi::default());
        let assistant = Assistant::new(
            history.clone(),
            TokenBudgeter::new(Tokenizer::Approximate, 3000),
            chat.clone(),
            Arc::new(SqliteCredentialStore::in_memory().unwrap()),
            Arc::new(StubFactory(api.clone())),
            Arc::new(PromptConfig::new("You are an English tutor."))
        );
        Fixture { assistant, history, chat, api }
    }

    pub(crate) fn action(name: &str, arguments: &str) -> ModelReply {
        ModelReply::ActionRequest(ActionCall { name: name.into(), arguments: arguments.into() })
    }

    pub(crate) fn answer(text: &str) -> ModelReply {
        ModelReply::FinalAnswer(text.into())
    }

    async fn roles(history: &SqliteHistoryStore, conversation_id: &str) -> Vec<Role> {
        history
            .read_turns(conversation_id).await
            .unwrap()
            .iter()
            .map(|t| t.role)
            .collect()
    }

    #[tokio::test]
    async fn direct_answer_persists_user_and_assistant() {
        let f = fixture(ScriptedChatClient::new(vec![Ok(answer("Hi! Ready to practise?"))]));

        let reply = f.assistant.process_message("c1", "hello").await.unwrap();
        assert_eq!(reply, "Hi! Ready to practise?");

        let turns = f.history.read_turns("c1").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!((turns[0].role, turns[0].content.as_str()), (Role::User, "hello"));
        assert_eq!((turns[1].role, turns[1].content.as_str()), (Role::Assistant, reply.as_str()));

        let seen = f.chat.seen.lock().unwrap();
        assert_eq!(seen[0].0, FunctionCallMode::Auto);
        assert_eq!(seen[0].1, vec![ChatMessage::system("You are an English tutor."), ChatMessage::user("hello")]);
    }

    #[tokio::test]
    async fn login_action_is_persisted_between_user_and_answer() {
        let f = fixture(
            ScriptedChatClient::new(
                vec![
                    Ok(action("login", r#"{"username": "ann", "password": "secret"}"#)),
                    Ok(answer("You are logged in."))
                ]
            )
        );

        let reply = f.assistant.process_message("c2", "log me in as ann / secret").await.unwrap();
        assert_eq!(reply, "You are logged in.");
        assert_eq!(roles(&f.history, "c2").await, vec![Role::User, Role::Function, Role::Assistant]);

        let turns = f.history.read_turns("c2").await.unwrap();
        assert_eq!(turns[1].action_name.as_deref(), Some("login"));
        let result: ActionResult = serde_json::from_str(&turns[1].content).unwrap();
        assert_eq!(result.message, "Data received");
        assert_eq!(*f.api.calls.lock().unwrap(), vec!["login:ann".to_string()]);

        let seen = f.chat.seen.lock().unwrap();
        let second_window = &seen[1].1;
        assert_eq!(second_window.len(), 4);
        assert_eq!(second_window[2].function_call.as_ref().map(|c| c.name.as_str()), Some("login"));
        assert_eq!(second_window[3].role, Role::Function);
        assert_eq!(second_window[3].name.as_deref(), Some("login"));
    }

    #[tokio::test]
    async fn unknown_action_is_fed_back_and_loop_continues() {
        let f = fixture(
            ScriptedChatClient::new(vec![Ok(action("teleport", "{}")), Ok(answer("I can't do that."))])
        );

        let reply = f.assistant.process_message("c3", "teleport me").await.unwrap();
        assert_eq!(reply, "I can't do that.");

        let turns = f.history.read_turns("c3").await.unwrap();
        assert_eq!(turns[1].role, Role::Function);
        let content: serde_json::Value = serde_json::from_str(&turns[1].content).unwrap();
        assert_eq!(content, json!({"status": "error", "message": "Unknown function"}));
    }

    #[tokio::test]
    async fn action_loop_stops_after_the_limit() {
        let chat = ScriptedChatClient {
            fallback: Some(action("get_word_sets", r#"{"page_number": 1, "page_size": 10}"#)),
            ..Default::default()
        };
        let f = fixture(chat);

        let reply = f.assistant.process_message("c4", "show my sets").await.unwrap();
        assert_eq!(reply, ACTION_LIMIT_ANSWER);

        let roles = roles(&f.history, "c4").await;
        let dispatched = roles
            .iter()
            .filter(|r| **r == Role::Function)
            .count();
        assert_eq!(dispatched, MAX_ACTION_ITERATIONS);
        assert_eq!(roles.last(), Some(&Role::Assistant));
        assert_eq!(f.chat.modes(), vec![
            FunctionCallMode::Auto,
            FunctionCallMode::Auto,
            FunctionCallMode::Auto,
            FunctionCallMode::Auto,
            FunctionCallMode::None
        ]);
    }

    #[tokio::test]
    async fn forced_direct_answer_is_returned() {
        let sets = r#"{"page_number": 1, "page_size": 10}"#;
        let f = fixture(
            ScriptedChatClient::new(
                vec![
                    Ok(action("get_word_sets", sets)),
                    Ok(action("get_word_sets", sets)),
                    Ok(action("get_word_sets", sets)),
                    Ok(action("get_word_sets", sets)),
                    Ok(answer("Please log in first."))
                ]
            )
        );

        let reply = f.assistant.process_message("c5", "sets please").await.unwrap();
        assert_eq!(reply, "Please log in first.");
        assert_eq!(f.chat.modes().last(), Some(&FunctionCallMode::None));
    }

    #[tokio::test]
    async fn malformed_arguments_abort_the_turn() {
        let f = fixture(ScriptedChatClient::new(vec![Ok(action("login", "{oops"))]));

        let err = f.assistant.process_message("c6", "login").await.unwrap_err();
        assert!(matches!(err, AgentError::Action(ActionError::InvalidArguments { .. })));
        assert_eq!(roles(&f.history, "c6").await, vec![Role::User]);
        assert!(f.api.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let f = fixture(
            ScriptedChatClient::new(vec![Err(LlmError::Api { status: 429, body: "rate limited".into() })])
        );

        let err = f.assistant.process_message("c7", "hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(LlmError::Api { status: 429, .. })));
        assert_eq!(roles(&f.history, "c7").await, vec![Role::User]);
    }

    #[tokio::test]
    async fn context_inspection_and_clear() {
        let f = fixture(ScriptedChatClient::new(vec![Ok(answer("Hi!"))]));
        assert_eq!(f.assistant.format_context("c8").await.unwrap(), EMPTY_CONTEXT_MESSAGE);

        f.assistant.process_message("c8", "hello").await.unwrap();
        assert_eq!(f.assistant.format_context("c8").await.unwrap(), "user: hello\nassistant: Hi!");
        assert_eq!(f.assistant.context_messages("c8").await.unwrap(), vec![
            ChatMessage::user("hello"),
            ChatMessage::assistant("Hi!")
        ]);

        f.assistant.clear_history("c8").await.unwrap();
        f.assistant.clear_history("c8").await.unwrap();
        assert_eq!(f.assistant.format_context("c8").await.unwrap(), EMPTY_CONTEXT_MESSAGE);
    }

    #[tokio::test]
    async fn models_and_welcome_message() {
        let f = fixture(ScriptedChatClient::default());
        assert_eq!(f.assistant.list_models().await.unwrap(), vec!["gpt-3.5-turbo-0613", "gpt-4"]);
        assert_eq!(f.assistant.welcome_message().await, prompt::DEFAULT_WELCOME_MESSAGE);
    }

    #[tokio::test]
    async fn prompts_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs
            ::write(&path, r#"{"system_prompt": "You quiz vocabulary.", "welcome_message": "Let's learn!"}"#)
            .unwrap();

        let f = fixture(ScriptedChatClient::new(vec![Ok(answer("ok"))]));
        let assistant = f.assistant.with_prompts_path(&path);

        assert!(assistant.reload_prompts_if_changed().await.unwrap());
        assert!(!assistant.reload_prompts_if_changed().await.unwrap());
        assert_eq!(assistant.welcome_message().await, "Let's learn!");

        assistant.process_message("c9", "hi").await.unwrap();
        let seen = f.chat.seen.lock().unwrap();
        assert_eq!(seen[0].1[0], ChatMessage::system("You quiz vocabulary."));
    }
}
