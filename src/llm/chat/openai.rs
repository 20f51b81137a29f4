use async_trait::async_trait;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };
use serde_json::Value as JsonValue;

use super::{ ChatClient, CompletionRequest, FunctionCallMode, ModelReply };
use crate::llm::{ LlmConfig, LlmError };
use crate::models::chat::{ ActionCall, ChatMessage, Role };

const DEFAULT_MODEL: &str = "gpt-3.5-turbo-0613";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct OpenAIMessage {
    role: Role,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<OpenAIFunctionCall>,
}

impl From<&ChatMessage> for OpenAIMessage {
    fn from(message: &ChatMessage) -> Self {
        let function_call = message.function_call.as_ref().map(|call| OpenAIFunctionCall {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
        // A function-call turn carries no text; the API expects null there.
        let content = if function_call.is_some() && message.content.is_empty() {
            None
        } else {
            Some(message.content.clone())
        };
        Self {
            role: message.role,
            content,
            name: message.name.clone(),
            function_call,
        }
    }
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "no_functions")]
    functions: &'a [JsonValue],
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCallMode>,
}

fn no_functions(functions: &&[JsonValue]) -> bool {
    functions.is_empty()
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    function_call: Option<OpenAIFunctionCall>,
}

#[derive(Deserialize)]
struct OpenAIModelList {
    data: Vec<OpenAIModel>,
}

#[derive(Deserialize)]
struct OpenAIModel {
    id: String,
}

impl OpenAIResponse {
    fn into_reply(self) -> Result<ModelReply, LlmError> {
        let message = self.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?.message;
        Ok(match message.function_call {
            Some(call) =>
                ModelReply::ActionRequest(ActionCall {
                    name: call.name,
                    arguments: call.arguments,
                }),
            None => ModelReply::FinalAnswer(message.content.unwrap_or_default()),
        })
    }
}

impl OpenAIChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, LlmError> {
        let chat_model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                LlmError::InvalidApiKey(e.to_string())
            )?
        );

        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            model: chat_model,
            base_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key.clone().filter(|k| !k.is_empty()).ok_or(LlmError::MissingApiKey)?;
        Self::new(api_key, config.completion_model.clone(), config.base_url.clone())
    }

    async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(LlmError::Api { status: status.as_u16(), body })
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<ModelReply, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = OpenAIChatRequest {
            model: &self.model,
            messages: request.messages.iter().map(OpenAIMessage::from).collect(),
            functions: request.functions,
            function_call: if request.functions.is_empty() {
                None
            } else {
                Some(request.function_call)
            },
        };
        debug!(
            "Calling {} with {} messages (function_call={:?})",
            self.model,
            body.messages.len(),
            request.function_call
        );

        let res = self.http.post(&url).json(&body).send().await?;
        let res = Self::check_status(res).await?;
        let parsed: OpenAIResponse = res.json().await?;
        parsed.into_reply()
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/models", self.base_url);
        let res = Self::check_status(self.http.get(&url).send().await?).await?;
        let list: OpenAIModelList = res.json().await?;
        info!("Model list returned {} entries", list.data.len());
        Ok(
            list.data
                .into_iter()
                .map(|m| m.id)
                .collect()
        )
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_request_turn_serializes_with_null_content() {
        let msg = ChatMessage::action_request(ActionCall {
            name: "login".into(),
            arguments: r#"{"username":"a","password":"b"}"#.into(),
        });
        let wire = serde_json::to_value(OpenAIMessage::from(&msg)).unwrap();
        assert_eq!(
            wire,
            json!({
                "role": "assistant",
                "content": null,
                "function_call": {"name": "login", "arguments": "{\"username\":\"a\",\"password\":\"b\"}"}
            })
        );
    }

    #[test]
    fn function_turn_serializes_with_name() {
        let wire = serde_json::to_value(OpenAIMessage::from(&ChatMessage::function("login", "{}"))).unwrap();
        assert_eq!(wire, json!({"role": "function", "content": "{}", "name": "login"}));
    }

    #[test]
    fn request_omits_function_mode_without_functions() {
        let messages = [ChatMessage::user("hi")];
        let body = OpenAIChatRequest {
            model: "m",
            messages: messages.iter().map(OpenAIMessage::from).collect(),
            functions: &[],
            function_call: None,
        };
        let wire = serde_json::to_value(&body).unwrap();
        assert!(wire.get("functions").is_none());
        assert!(wire.get("function_call").is_none());

        let functions = [json!({"name": "login"})];
        let body = OpenAIChatRequest {
            model: "m",
            messages: Vec::new(),
            functions: &functions,
            function_call: Some(FunctionCallMode::None),
        };
        assert_eq!(serde_json::to_value(&body).unwrap()["function_call"], json!("none"));
    }

    #[test]
    fn response_with_function_call_is_an_action_request() {
        let response: OpenAIResponse = serde_json
            ::from_value(
                json!({
                "choices": [{"message": {"role": "assistant", "content": null,
                    "function_call": {"name": "get_word_sets", "arguments": "{\"page_number\":1}"}}}]
            })
            )
            .unwrap();
        assert_eq!(
            response.into_reply().unwrap(),
            ModelReply::ActionRequest(ActionCall {
                name: "get_word_sets".into(),
                arguments: "{\"page_number\":1}".into(),
            })
        );
    }

    #[test]
    fn response_with_text_is_a_final_answer() {
        let response: OpenAIResponse = serde_json
            ::from_value(json!({"choices": [{"message": {"role": "assistant", "content": "Hello!"}}]}))
            .unwrap();
        assert_eq!(response.into_reply().unwrap(), ModelReply::FinalAnswer("Hello!".into()));

        let empty: OpenAIResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(empty.into_reply(), Err(LlmError::EmptyResponse)));
    }

    #[test]
    fn from_config_requires_api_key() {
        assert!(matches!(OpenAIChatClient::from_config(&LlmConfig::default()), Err(LlmError::MissingApiKey)));
        let client = OpenAIChatClient::from_config(&LlmConfig {
            api_key: Some("sk-test".into()),
            completion_model: None,
            base_url: Some("http://localhost:8080/v1/".into()),
        }).unwrap();
        assert_eq!(client.get_model(), DEFAULT_MODEL);
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
