use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use stayql_core::config::LlmConfig;
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationPurpose {
    SqlGeneration,
    AnswerFormatting,
}

impl GenerationPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SqlGeneration => "sql_generation",
            Self::AnswerFormatting => "answer_formatting",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationOptions {
    pub purpose: GenerationPurpose,
    pub temperature: f32,
}

impl GenerationOptions {
    pub fn sql(temperature: f32) -> Self {
        Self { purpose: GenerationPurpose::SqlGeneration, temperature }
    }

    pub fn answer(temperature: f32) -> Self {
        Self { purpose: GenerationPurpose::AnswerFormatting, temperature }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("llm request timed out")]
    Timeout,
    #[error("llm transport failure: {0}")]
    Transport(String),
    #[error("llm returned an unusable payload: {0}")]
    Malformed(String),
    /// The provider is down or refuses this deployment; retrying within a turn cannot help.
    #[error("llm provider outage: {0}")]
    Outage(String),
}

impl ProviderError {
    pub fn is_outage(&self) -> bool {
        matches!(self, Self::Outage(_))
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError>;
}

const SQL_SYSTEM_PROMPT: &str =
    "You translate analytics questions into exactly one read-only SQLite SELECT statement. Return only SQL.";
const ANSWER_SYSTEM_PROMPT: &str =
    "You are a data analyst assistant. Answer clearly and concisely using only the provided results.";

/// Chat-completions client for OpenAI and any OpenAI-compatible endpoint (Ollama, vLLM).
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    chat_completions_url: String,
    api_key: Option<SecretString>,
    model: String,
    sql_model: String,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| ProviderError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            chat_completions_url: format!("{}/chat/completions", config.resolved_base_url()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            sql_model: config.sql_model().to_owned(),
        })
    }

    fn model_for(&self, purpose: GenerationPurpose) -> &str {
        match purpose {
            GenerationPurpose::SqlGeneration => &self.sql_model,
            GenerationPurpose::AnswerFormatting => &self.model,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleClient {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let system_prompt = match options.purpose {
            GenerationPurpose::SqlGeneration => SQL_SYSTEM_PROMPT,
            GenerationPurpose::AnswerFormatting => ANSWER_SYSTEM_PROMPT,
        };
        let model = self.model_for(options.purpose);
        let body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": prompt }
            ],
            "temperature": options.temperature,
        });

        let mut request = self.client.post(&self.chat_completions_url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                ProviderError::Timeout
            } else if error.is_connect() {
                ProviderError::Outage(format!("endpoint unreachable: {error}"))
            } else {
                ProviderError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        let payload = response.text().await.map_err(|error| {
            if error.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Transport(error.to_string())
            }
        })?;

        if !status.is_success() {
            debug!(
                event_name = "llm.request_failed",
                status = status.as_u16(),
                model,
                purpose = options.purpose.as_str(),
                "llm provider returned an error status"
            );
            return Err(classify_status(status));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&payload)
            .map_err(|_| ProviderError::Malformed("response_json_parse_failed".to_owned()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_owned())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(ProviderError::Malformed("empty_completion".to_owned()));
        }

        Ok(content)
    }
}

fn classify_status(status: StatusCode) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::NOT_FOUND
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE => ProviderError::Outage(format!("status={}", status.as_u16())),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout,
        other => ProviderError::Transport(format!("status={}", other.as_u16())),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
