use async_trait::async_trait;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, Response };
use scraper::{ Html, Selector };
use serde_json::Value as JsonValue;
use std::sync::Arc;

use super::{ WordSetPage, WordsApi, WordsApiError, WordsApiFactory };

pub const DEFAULT_ID_URL: &str = "https://id.skyeng.ru";
pub const DEFAULT_WORDS_URL: &str = "https://api.words.skyeng.ru";
pub const DEFAULT_DICTIONARY_URL: &str = "https://dictionary.skyeng.ru";

const WORD_SET_NOISE: [&str; 4] = ["images", "progress", "subtitle", "sourceSet"];
const WORD_DATA_NOISE: [&str; 4] = ["soundUrl", "images", "transcription", "examples"];

#[derive(Clone, Debug, PartialEq)]
pub struct SkyengConfig {
    pub login_url: String,
    pub login_submit_url: String,
    pub jwt_url: String,
    pub word_sets_url: String,
    pub words_from_set_url: String,
    pub words_data_url: String,
}

impl SkyengConfig {
    pub fn from_bases(id_url: &str, words_url: &str, dictionary_url: &str) -> Self {
        let id = id_url.trim_end_matches('/');
        let words = words_url.trim_end_matches('/');
        let dictionary = dictionary_url.trim_end_matches('/');
        Self {
            login_url: format!("{}/login", id),
            login_submit_url: format!("{}/frame/login-submit", id),
            jwt_url: format!("{}/user-api/v1/auth/jwt", id),
            word_sets_url: format!("{}/api/for-vimbox/v1/wordsets.json", words),
            words_from_set_url: format!("{}/api/v1/wordsets/{{set_id}}/words.json", words),
            words_data_url: format!("{}/api/for-services/v2/meanings", dictionary),
        }
    }

    fn words_from_set(&self, set_id: i64) -> String {
        self.words_from_set_url.replace("{set_id}", &set_id.to_string())
    }
}

impl Default for SkyengConfig {
    fn default() -> Self {
        Self::from_bases(DEFAULT_ID_URL, DEFAULT_WORDS_URL, DEFAULT_DICTIONARY_URL)
    }
}

pub struct SkyengClient {
    http: HttpClient,
    config: SkyengConfig,
}

impl SkyengClient {
    pub fn new(config: SkyengConfig) -> Result<Self, WordsApiError> {
        let http = HttpClient::builder().cookie_store(true).build()?;
        Ok(Self { http, config })
    }

    async fn check_status(res: Response) -> Result<Response, WordsApiError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(WordsApiError::Status { status: status.as_u16(), body })
    }

    async fn csrf_token(&self) -> Result<String, WordsApiError> {
        let page = self.http.get(&self.config.login_url).send().await?.text().await?;
        extract_csrf_token(&page)
    }

    async fn get_json(&self, request: reqwest::RequestBuilder) -> Result<JsonValue, WordsApiError> {
        let res = Self::check_status(request.send().await?).await?;
        Ok(res.json().await?)
    }
}

fn extract_csrf_token(page: &str) -> Result<String, WordsApiError> {
    let document = Html::parse_document(page);
    let selector = Selector::parse(r#"input[name="csrfToken"]"#).map_err(|_| WordsApiError::CsrfNotFound)?;
    document
        .select(&selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
        .ok_or(WordsApiError::CsrfNotFound)
}

fn take_field(body: &mut JsonValue, field: &str) -> Result<JsonValue, WordsApiError> {
    body.get_mut(field)
        .map(JsonValue::take)
        .ok_or_else(|| WordsApiError::UnexpectedShape(format!("missing '{}'", field)))
}

fn strip_word_set(set: &mut JsonValue) {
    if let Some(fields) = set.as_object_mut() {
        for key in WORD_SET_NOISE {
            fields.remove(key);
        }
    }
}

fn strip_word_data(word: &mut JsonValue) {
    let Some(fields) = word.as_object_mut() else {
        return;
    };
    for key in WORD_DATA_NOISE {
        fields.remove(key);
    }
    for value in fields.values_mut() {
        match value {
            JsonValue::Object(nested) => {
                nested.remove("soundUrl");
            }
            JsonValue::Array(items) => {
                for item in items.iter_mut().filter_map(JsonValue::as_object_mut) {
                    item.remove("soundUrl");
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl WordsApi for SkyengClient {
    async fn login(&self, username: &str, password: &str) -> Result<String, WordsApiError> {
        let csrf = self.csrf_token().await?;
        let form = [
            ("username", username),
            ("password", password),
            ("csrfToken", csrf.as_str()),
        ];
        let res = self.http.post(&self.config.login_submit_url).form(&form).send().await?;
        Self::check_status(res).await?;

        let res = self.http.post(&self.config.jwt_url).send().await?;
        let token = res
            .cookies()
            .next()
            .map(|cookie| cookie.value().to_string())
            .ok_or(WordsApiError::MissingToken)?;
        info!("Session token issued");
        Ok(token)
    }

    async fn word_sets(
        &self,
        token: &str,
        page_number: i64,
        page_size: i64
    ) -> Result<WordSetPage, WordsApiError> {
        let request = self.http
            .get(&self.config.word_sets_url)
            .bearer_auth(token)
            .query(&[("page", page_number), ("pageSize", page_size)]);
        let mut body = self.get_json(request).await?;

        let last_page = body
            .pointer_mut("/meta/lastPage")
            .map(JsonValue::take)
            .ok_or_else(|| WordsApiError::UnexpectedShape("missing 'meta.lastPage'".into()))?;
        let mut sets = match take_field(&mut body, "data")? {
            JsonValue::Array(sets) => sets,
            other => {
                return Err(WordsApiError::UnexpectedShape(format!("'data' is not a list: {}", other)));
            }
        };
        sets.iter_mut().for_each(strip_word_set);
        debug!("Fetched {} word sets (page {})", sets.len(), page_number);
        Ok(WordSetPage { sets, last_page })
    }

    async fn words_from_set(&self, token: &str, set_id: i64) -> Result<JsonValue, WordsApiError> {
        let request = self.http.get(self.config.words_from_set(set_id)).bearer_auth(token);
        let mut body = self.get_json(request).await?;
        take_field(&mut body, "data")
    }

    async fn words_data(&self, token: &str, word_ids: &[String]) -> Result<JsonValue, WordsApiError> {
        let request = self.http
            .get(&self.config.words_data_url)
            .bearer_auth(token)
            .query(&[("ids", word_ids.join(","))]);
        let mut words = self.get_json(request).await?;
        if let Some(items) = words.as_array_mut() {
            items.iter_mut().for_each(strip_word_data);
        }
        Ok(words)
    }
}

pub struct SkyengClientFactory {
    config: SkyengConfig,
}

impl SkyengClientFactory {
    pub fn new(config: SkyengConfig) -> Self {
        Self { config }
    }
}

impl WordsApiFactory for SkyengClientFactory {
    fn open_session(&self) -> Result<Arc<dyn WordsApi>, WordsApiError> {
        Ok(Arc::new(SkyengClient::new(self.config.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_urls_point_at_the_platform() {
        let config = SkyengConfig::default();
        assert_eq!(config.login_url, "https://id.skyeng.ru/login");
        assert_eq!(config.login_submit_url, "https://id.skyeng.ru/frame/login-submit");
        assert_eq!(config.jwt_url, "https://id.skyeng.ru/user-api/v1/auth/jwt");
        assert_eq!(config.word_sets_url, "https://api.words.skyeng.ru/api/for-vimbox/v1/wordsets.json");
        assert_eq!(config.words_from_set(17), "https://api.words.skyeng.ru/api/v1/wordsets/17/words.json");
        assert_eq!(config.words_data_url, "https://dictionary.skyeng.ru/api/for-services/v2/meanings");
    }

    #[test]
    fn csrf_token_is_read_from_hidden_input() {
        let page =
            r#"<html><body><form>
                <input type="text" name="username">
                <input type="hidden" name="csrfToken" value="abc123">
            </form></body></html>"#;
        assert_eq!(extract_csrf_token(page).unwrap(), "abc123");
        assert!(matches!(extract_csrf_token("<html></html>"), Err(WordsApiError::CsrfNotFound)));
    }

    #[test]
    fn word_set_noise_is_removed() {
        let mut set = json!({"id": 1, "title": "Travel", "images": [], "progress": 40, "subtitle": "x", "sourceSet": {}});
        strip_word_set(&mut set);
        assert_eq!(set, json!({"id": 1, "title": "Travel"}));
    }

    #[test]
    fn word_data_noise_is_removed_one_level_deep() {
        let mut word = json!({
            "id": 5,
            "text": "ticket",
            "soundUrl": "a.mp3",
            "transcription": "ˈtɪkɪt",
            "examples": [],
            "translation": {"text": "билет", "soundUrl": "b.mp3"},
            "alternatives": [{"text": "pass", "soundUrl": "c.mp3"}, "plain"]
        });
        strip_word_data(&mut word);
        assert_eq!(
            word,
            json!({
                "id": 5,
                "text": "ticket",
                "translation": {"text": "билет"},
                "alternatives": [{"text": "pass"}, "plain"]
            })
        );
    }
}
