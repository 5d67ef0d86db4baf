use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::llm::{gemini::GeminiAdapter, openai::OpenAiAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Openai,
    Gemini,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// Payload shape the provider's API expects.
    pub fn shape(self) -> PromptShape {
        match self {
            Self::Openai => PromptShape::Messages,
            Self::Gemini => PromptShape::Flattened,
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Openai => "https://api.openai.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    pub fn api_key_envs(self) -> &'static [&'static str] {
        match self {
            Self::Openai => &["OPENAI_API_KEY"],
            Self::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "gemini" => Ok(Self::Gemini),
            other => Err(other.to_string()),
        }
    }
}

pub fn api_key_from_env(provider: Provider) -> Option<String> {
    provider.api_key_envs().iter().find_map(|key_env| {
        env::var(key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

pub fn is_api_key_present(provider: Provider) -> bool {
    api_key_from_env(provider).is_some()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptShape {
    /// Ordered role-tagged messages (multi-turn chat).
    Messages,
    /// One newline-joined prompt string (single-shot).
    Flattened,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// What gets handed to an adapter for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PromptPayload {
    Messages(Vec<ChatMessage>),
    Flattened(String),
}

impl PromptPayload {
    pub fn into_messages(self) -> Vec<ChatMessage> {
        match self {
            Self::Messages(messages) => messages,
            Self::Flattened(text) => vec![ChatMessage::user(text)],
        }
    }

    pub fn into_flattened(self) -> String {
        match self {
            Self::Messages(messages) => flatten_messages(&messages),
            Self::Flattened(text) => text,
        }
    }

    /// Plain-text rendering used for observation records and logs.
    pub fn render(&self) -> String {
        match self {
            Self::Messages(messages) => flatten_messages(messages),
            Self::Flattened(text) => text.clone(),
        }
    }
}

fn flatten_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| message.content.as_str())
        .filter(|content| !content.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone)]
pub struct ProviderSettings {
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("retries", &self.retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

impl ProviderSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: None,
            retries: 0,
            retry_delay_ms: 500,
        }
    }

    pub fn from_env(provider: Provider) -> Result<Self, ProviderError> {
        api_key_from_env(provider)
            .map(Self::new)
            .ok_or(ProviderError::MissingApiKey {
                provider,
                key_env: provider.api_key_envs()[0],
            })
    }

    pub fn base_url(&self, provider: Provider) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{key_env} is not set in the environment")]
    MissingApiKey {
        provider: Provider,
        key_env: &'static str,
    },
    #[error("{} request failed: {source}", .provider.as_str())]
    Request {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },
    #[error("{} API error {status}: {body}", .provider.as_str())]
    Api {
        provider: Provider,
        status: StatusCode,
        body: String,
    },
}

/// One completion call against a concrete LLM backend.
///
/// Implementations return an empty string when the backend answers without
/// text and surface transport or API failures as [`ProviderError`].
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    fn shape(&self) -> PromptShape {
        self.provider().shape()
    }

    async fn call(
        &self,
        payload: PromptPayload,
        model: &str,
        options: CallOptions,
    ) -> Result<String, ProviderError>;
}

pub fn build_adapter(provider: Provider, settings: ProviderSettings) -> Arc<dyn LlmAdapter> {
    match provider {
        Provider::Openai => Arc::new(OpenAiAdapter::new(settings)),
        Provider::Gemini => Arc::new(GeminiAdapter::new(settings)),
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatMessage, PromptPayload, Provider, ProviderSettings};

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<Provider>(), Ok(Provider::Openai));
        assert_eq!(" gemini ".parse::<Provider>(), Ok(Provider::Gemini));
        assert_eq!("bard".parse::<Provider>(), Err("bard".to_string()));
    }

    #[test]
    fn messages_flatten_in_order() {
        let payload = PromptPayload::Messages(vec![
            ChatMessage::system("persona"),
            ChatMessage::user("first"),
            ChatMessage::assistant("second"),
        ]);
        assert_eq!(payload.into_flattened(), "persona\nfirst\nsecond");
    }

    #[test]
    fn flattened_prompt_becomes_single_user_message() {
        let messages = PromptPayload::Flattened("hello".to_string()).into_messages();
        assert_eq!(messages, vec![ChatMessage::user("hello")]);
    }

    #[test]
    fn base_url_override_is_trimmed() {
        let mut settings = ProviderSettings::new("k");
        assert_eq!(
            settings.base_url(Provider::Openai),
            "https://api.openai.com/v1"
        );
        settings.base_url = Some("http://127.0.0.1:9000/".to_string());
        assert_eq!(settings.base_url(Provider::Gemini), "http://127.0.0.1:9000");
    }
}
