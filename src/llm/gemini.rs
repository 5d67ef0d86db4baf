use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::provider::{
    CallOptions, LlmAdapter, PromptPayload, Provider, ProviderError, ProviderSettings,
};
use crate::llm::transport::{Auth, post_json_with_retry};

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Single-shot `generateContent` adapter. Every call is a fresh one-turn
/// request carrying the whole flattened prompt.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        ProviderSettings::from_env(Provider::Gemini).map(Self::new)
    }

    fn endpoint(&self, model: &str) -> String {
        let model = model.trim().trim_start_matches("models/");
        format!(
            "{}/models/{model}:generateContent",
            self.settings.base_url(Provider::Gemini)
        )
    }
}

#[async_trait]
impl LlmAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn call(
        &self,
        payload: PromptPayload,
        model: &str,
        options: CallOptions,
    ) -> Result<String, ProviderError> {
        let provider = Provider::Gemini;
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart {
                    text: payload.into_flattened(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
            },
        };

        let response = post_json_with_retry(
            &self.client,
            provider,
            &self.endpoint(model),
            Auth::Header {
                name: "x-goog-api-key",
                value: &self.settings.api_key,
            },
            &request,
            &self.settings,
        )
        .await?;

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|source| ProviderError::Request { provider, source })?;

        Ok(candidate_text(body))
    }
}

fn candidate_text(body: GenerateContentResponse) -> String {
    body.candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default()
}
