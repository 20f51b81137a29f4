use lazy_static::lazy_static;
use log::{ info, warn };
use serde::{ de, Deserialize, Deserializer, Serialize };
use serde_json::{ json, Map, Value as JsonValue };
use std::sync::Arc;
use thiserror::Error;

use crate::credentials::{ CredentialError, CredentialStore };
use crate::models::chat::ActionCall;
use crate::words::{ WordsApi, WordsApiError };

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Invalid arguments for '{action}': {reason}")]
    InvalidArguments {
        action: String,
        reason: String,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LoginArgs {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct WordSetsArgs {
    #[serde(deserialize_with = "integer")]
    pub page_number: i64,
    #[serde(deserialize_with = "integer")]
    pub page_size: i64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct WordSetArgs {
    #[serde(deserialize_with = "integer")]
    pub set_id: i64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct WordsDataArgs {
    #[serde(deserialize_with = "word_ids")]
    pub word_ids: Vec<String>,
}

// Models send ids and counts both as strings and as bare numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Number(serde_json::Number),
}

impl StringOrNumber {
    fn into_text(self) -> String {
        match self {
            StringOrNumber::Text(text) => text,
            StringOrNumber::Number(number) => number.to_string(),
        }
    }
}

fn integer<'de, D>(deserializer: D) -> Result<i64, D::Error> where D: Deserializer<'de> {
    let value = StringOrNumber::deserialize(deserializer)?.into_text();
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| de::Error::custom(format!("expected an integer, got {:?}", value)))
}

fn word_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error> where D: Deserializer<'de> {
    let ids = Vec::<StringOrNumber>::deserialize(deserializer)?;
    Ok(ids.into_iter().map(StringOrNumber::into_text).collect())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Login(LoginArgs),
    GetWordSets(WordSetsArgs),
    GetWordsFromSet(WordSetArgs),
    GetWordsData(WordsDataArgs),
}

lazy_static! {
    static ref ACTION_SCHEMAS: Vec<JsonValue> = vec![
        json!({
            "name": "login",
            "description": "Login to Skyeng. Other functions will not work without authorization. The user must provide an email and password before using the rest of the features.",
            "parameters": {
                "type": "object",
                "properties": {
                    "username": {"type": "string", "description": "Username for login"},
                    "password": {"type": "string", "description": "Password for login"}
                },
                "required": ["username", "password"]
            }
        }),
        json!({
            "name": "get_word_sets",
            "description": "Retrieve word sets by page. This is a set of words that go along with the topic of the lesson. Teachers add words to these sets for users, and this function returns data on the user's current sets for the specified page.",
            "parameters": {
                "type": "object",
                "properties": {
                    "page_number": {"type": "integer", "description": "Page number to retrieve"},
                    "page_size": {"type": "integer", "description": "Number of word sets per page"}
                },
                "required": ["page_number", "page_size"]
            }
        }),
        json!({
            "name": "get_words_from_set",
            "description": "This function returns words data for a specific set (Students also call these 'topics' or 'topics'). Data contains info about words: progress, status, isLearned, createdAt.",
            "parameters": {
                "type": "object",
                "properties": {
                    "set_id": {"type": "integer", "description": "ID of the word set"}
                },
                "required": ["set_id"]
            }
        }),
        json!({
            "name": "get_words_data",
            "description": "Get words data of words. Data that can be retrieved: alternatives, definition, examples, id, images, sound_url, text, transcription, translation. Please, don't provide useless info like ",
            "parameters": {
                "type": "object",
                "properties": {
                    "word_ids": {
                        "type": "array",
                        "description": "List of ids for words. These ids can be found in sets, in word objects.",
                        "items": {"type": "string"}
                    }
                },
                "required": ["word_ids"]
            }
        })
    ];
}

impl Action {
    pub const LOGIN: &'static str = "login";
    pub const GET_WORD_SETS: &'static str = "get_word_sets";
    pub const GET_WORDS_FROM_SET: &'static str = "get_words_from_set";
    pub const GET_WORDS_DATA: &'static str = "get_words_data";

    pub fn schemas() -> &'static [JsonValue] {
        &ACTION_SCHEMAS
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Login(_) => Self::LOGIN,
            Action::GetWordSets(_) => Self::GET_WORD_SETS,
            Action::GetWordsFromSet(_) => Self::GET_WORDS_FROM_SET,
            Action::GetWordsData(_) => Self::GET_WORDS_DATA,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedCall {
    Known(Action),
    Unknown(String),
}

impl ActionCall {
    // Unknown names are not an error; bad arguments are.
    pub fn resolve(&self) -> Result<ResolvedCall, ActionError> {
        let invalid = |reason: String| ActionError::InvalidArguments {
            action: self.name.clone(),
            reason,
        };
        let arguments: JsonValue = serde_json::from_str(&self.arguments).map_err(|e| invalid(e.to_string()))?;

        fn bind<T: for<'de> Deserialize<'de>>(arguments: JsonValue) -> Result<T, String> {
            serde_json::from_value(arguments).map_err(|e| e.to_string())
        }

        let action = match self.name.as_str() {
            Action::LOGIN => Action::Login(bind(arguments).map_err(invalid)?),
            Action::GET_WORD_SETS => Action::GetWordSets(bind(arguments).map_err(invalid)?),
            Action::GET_WORDS_FROM_SET => Action::GetWordsFromSet(bind(arguments).map_err(invalid)?),
            Action::GET_WORDS_DATA => Action::GetWordsData(bind(arguments).map_err(invalid)?),
            other => {
                return Ok(ResolvedCall::Unknown(other.to_string()));
            }
        };
        Ok(ResolvedCall::Known(action))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Ok,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub message: String,
    #[serde(flatten)]
    pub payload: Map<String, JsonValue>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { status: ActionStatus::Ok, message: message.into(), payload: Map::new() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: ActionStatus::Error, message: message.into(), payload: Map::new() }
    }

    pub fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        let details: String = details.into();
        Self::error(message).with("details", details)
    }

    pub fn unknown() -> Self {
        Self::error("Unknown function")
    }

    pub fn with(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ActionStatus::Ok
    }

    fn from_service_error(error: WordsApiError, failed: &str, exception: &str) -> Self {
        match error {
            WordsApiError::Status { body, .. } => Self::error_with_details(failed, body),
            other => Self::error_with_details(exception, other.to_string()),
        }
    }
}

pub struct ActionDispatcher {
    user_id: String,
    credentials: Arc<dyn CredentialStore>,
    api: Arc<dyn WordsApi>,
}

impl ActionDispatcher {
    pub fn new(user_id: impl Into<String>, credentials: Arc<dyn CredentialStore>, api: Arc<dyn WordsApi>) -> Self {
        Self { user_id: user_id.into(), credentials, api }
    }

    pub async fn dispatch(&self, call: ResolvedCall) -> Result<ActionResult, CredentialError> {
        let action = match call {
            ResolvedCall::Known(action) => action,
            ResolvedCall::Unknown(name) => {
                warn!("Model requested unknown action '{}' for user {}", name, self.user_id);
                return Ok(ActionResult::unknown());
            }
        };
        info!("Dispatching '{}' for user {}", action.name(), self.user_id);

        let result = match action {
            Action::Login(args) => self.login(args).await?,
            Action::GetWordSets(args) => self.word_sets(args).await?,
            Action::GetWordsFromSet(args) => self.words_from_set(args).await?,
            Action::GetWordsData(args) => self.words_data(args).await?,
        };
        if !result.is_ok() {
            warn!("Action failed for user {}: {}", self.user_id, result.message);
        }
        Ok(result)
    }

    async fn login(&self, args: LoginArgs) -> Result<ActionResult, CredentialError> {
        if let Some(token) = self.credentials.get(&self.user_id).await? {
            return Ok(ActionResult::ok("Already logged in").with("token", token));
        }
        match self.api.login(&args.username, &args.password).await {
            Ok(token) => {
                self.credentials.upsert(&self.user_id, &token).await?;
                Ok(ActionResult::ok("Data received").with("token", token))
            }
            Err(e) => Ok(ActionResult::from_service_error(e, "Login failed", "An exception occurred during login")),
        }
    }

    async fn word_sets(&self, args: WordSetsArgs) -> Result<ActionResult, CredentialError> {
        let Some(token) = self.credentials.get(&self.user_id).await? else {
            return Ok(ActionResult::error("Not logged in"));
        };
        Ok(match self.api.word_sets(&token, args.page_number, args.page_size).await {
            Ok(page) =>
                ActionResult::ok("Word sets fetched successfully")
                    .with("sets", page.sets)
                    .with("page", args.page_number)
                    .with("pageSize", args.page_size)
                    .with("lastPage", page.last_page),
            Err(e) =>
                ActionResult::from_service_error(
                    e,
                    "Failed to fetch word sets",
                    "An exception occurred while fetching word sets"
                ),
        })
    }

    async fn words_from_set(&self, args: WordSetArgs) -> Result<ActionResult, CredentialError> {
        let Some(token) = self.credentials.get(&self.user_id).await? else {
            return Ok(ActionResult::error("Not logged in"));
        };
        Ok(match self.api.words_from_set(&token, args.set_id).await {
            Ok(words) => ActionResult::ok("Words fetched successfully").with("words", words),
            Err(e) =>
                ActionResult::from_service_error(
                    e,
                    "Failed to fetch words from set",
                    "An exception occurred while fetching words from set"
                ),
        })
    }

    async fn words_data(&self, args: WordsDataArgs) -> Result<ActionResult, CredentialError> {
        let Some(token) = self.credentials.get(&self.user_id).await? else {
            return Ok(ActionResult::error("Not logged in"));
        };
        Ok(match self.api.words_data(&token, &args.word_ids).await {
            Ok(words) => ActionResult::ok("Words data fetched successfully").with("Words_data", words),
            Err(e) =>
                ActionResult::from_service_error(
                    e,
                    "Failed to fetch words data",
                    "An exception occurred while fetching words data"
                ),
        })
    }
}
