use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::provider::{
    CallOptions, ChatMessage, LlmAdapter, PromptPayload, Provider, ProviderError, ProviderSettings,
};
use crate::llm::transport::{Auth, post_json_with_retry};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// Multi-turn chat-completions adapter.
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        ProviderSettings::from_env(Provider::Openai).map(Self::new)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url(Provider::Openai))
    }
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::Openai
    }

    async fn call(
        &self,
        payload: PromptPayload,
        model: &str,
        options: CallOptions,
    ) -> Result<String, ProviderError> {
        let provider = Provider::Openai;
        let request = ChatCompletionRequest {
            model,
            messages: payload.into_messages(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = post_json_with_retry(
            &self.client,
            provider,
            &self.endpoint(),
            Auth::Bearer(&self.settings.api_key),
            &request,
            &self.settings,
        )
        .await?;

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|source| ProviderError::Request { provider, source })?;

        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}
