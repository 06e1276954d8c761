//! Summarization handlers. The built-ins forward the article to an external
//! model server and return whatever text it produces.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::http::{self, HttpConfig};
use super::schema::{FieldKind, FieldSpec, HandlerSchema};
use super::traits::{HandlerError, Summarizer};
use crate::api::models::FeedEntry;

const SYSTEM_PROMPT: &str = "Your goal is to write a brief but detailed summary of the text given to you. \
Only output the summary without any additional text. Provide the summary in markdown.";

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_MODEL: &str = "gpt-4o-mini";

fn prompt(content: &str) -> String {
    format!("Summarize this article:\n\n{content}\n")
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NullSummarizationConfig {}

impl NullSummarizationConfig {
    pub fn schema() -> HandlerSchema {
        HandlerSchema::new("null_summarization")
    }
}

pub struct NullSummarizer;

#[async_trait]
impl Summarizer for NullSummarizer {
    fn name(&self) -> &'static str {
        "null_summarization"
    }

    async fn summarize(&self, _entry: &FeedEntry, _content: &str) -> Result<Option<String>, HandlerError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl OllamaConfig {
    pub fn schema() -> HandlerSchema {
        HandlerSchema::new("ollama")
            .field(FieldSpec::required(
                "base_url",
                FieldKind::Url,
                "address of the Ollama server, e.g. http://localhost:11434",
            ))
            .field(FieldSpec::required("model", FieldKind::String, "model to chat with"))
            .field(FieldSpec::optional(
                "system",
                FieldKind::String,
                "system prompt overriding the built-in one",
            ))
            .field(FieldSpec::optional(
                "temperature",
                FieldKind::Float {
                    min: Some(0.0),
                    max: Some(2.0),
                },
                "sampling temperature",
            ))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OllamaSummarizer {
    client: Client,
    config: OllamaConfig,
}

impl OllamaSummarizer {
    pub fn new(config: OllamaConfig) -> Result<Self, HandlerError> {
        let client = http::build_client(&HttpConfig::default())?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn summarize(&self, entry: &FeedEntry, content: &str) -> Result<Option<String>, HandlerError> {
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let system = self.config.system.as_deref().unwrap_or(SYSTEM_PROMPT);

        let mut body = json!({
            "model": self.config.model,
            "stream": false,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt(content)},
            ],
        });
        if let Some(temperature) = self.config.temperature {
            body["options"] = json!({ "temperature": temperature });
        }

        debug!(entry_id = %entry.id, model = %self.config.model, "Requesting Ollama summary");
        let response = self.client.post(&url).json(&body).send().await?;
        let chat: OllamaChatResponse = http::ensure_success(response).await?.json().await?;

        Ok(chat.message.content.and_then(non_empty))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub system: Option<String>,
}

fn default_openai_model() -> String {
    OPENAI_MODEL.to_string()
}

fn default_openai_base_url() -> String {
    OPENAI_BASE_URL.to_string()
}

impl OpenAiConfig {
    pub fn schema() -> HandlerSchema {
        HandlerSchema::new("openai")
            .field(FieldSpec::required("api_key", FieldKind::String, "API key"))
            .field(
                FieldSpec::optional("model", FieldKind::String, "chat completion model")
                    .with_default(OPENAI_MODEL),
            )
            .field(
                FieldSpec::optional(
                    "base_url",
                    FieldKind::Url,
                    "API root, for OpenAI-compatible servers",
                )
                .with_default(OPENAI_BASE_URL),
            )
            .field(FieldSpec::optional(
                "system",
                FieldKind::String,
                "system prompt overriding the built-in one",
            ))
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

pub struct OpenAiSummarizer {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiSummarizer {
    pub fn new(config: OpenAiConfig) -> Result<Self, HandlerError> {
        let client = http::build_client(&HttpConfig::default())?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn summarize(&self, entry: &FeedEntry, content: &str) -> Result<Option<String>, HandlerError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let system = self.config.system.as_deref().unwrap_or(SYSTEM_PROMPT);

        let body = json!({
            "model": self.config.model,
            "n": 1,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt(content)},
            ],
        });

        debug!(entry_id = %entry.id, model = %self.config.model, "Requesting OpenAI summary");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let completion: CompletionResponse = http::ensure_success(response).await?.json().await?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| HandlerError::InvalidResponse("completion has no choices".to_string()))?;

        Ok(choice.message.content.and_then(non_empty))
    }
}
