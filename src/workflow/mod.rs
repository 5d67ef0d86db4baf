//! Self-correcting reply generation.
//!
//! One invocation classifies the user's intent once, then drafts an answer and
//! runs it through a toxicity gate and a fulfillment gate. A failed gate adds a
//! regeneration reason and sends the loop back to drafting, at most
//! [`MAX_DRAFT_ATTEMPTS`] times. Every failure mode ends in a user-presentable
//! string.

pub mod context;
pub mod prompts;
pub mod score;

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::llm::provider::{CallOptions, LlmAdapter, ProviderError};
use crate::observe::{LlmCall, NoopObserver, Observer};
use context::ConversationContext;
use prompts::{Prompt, PromptBuilder};
use score::{GateScore, extract_gate_score};

pub const GATE_THRESHOLD: f64 = 0.7;
pub const MAX_DRAFT_ATTEMPTS: usize = 3;

pub const FAILURE_FALLBACK: &str = "I apologize, but I'm having trouble processing your request right now. Please try again in a moment.";
pub const EXHAUSTED_FALLBACK: &str =
    "I had trouble generating a safe and helpful answer. Please try again.";

const INTENT_OPTIONS: CallOptions = CallOptions {
    temperature: 0.2,
    max_tokens: 200,
};
const DRAFT_OPTIONS: CallOptions = CallOptions {
    temperature: 0.6,
    max_tokens: 220,
};
const GATE_OPTIONS: CallOptions = CallOptions {
    temperature: 0.0,
    max_tokens: 120,
};

/// What to answer when every draft attempt failed a gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// The last draft if it has any text, otherwise [`EXHAUSTED_FALLBACK`].
    #[default]
    LastDraft,
    /// Always [`EXHAUSTED_FALLBACK`].
    Fallback,
}

impl ExhaustionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LastDraft => "last-draft",
            Self::Fallback => "fallback",
        }
    }
}

impl FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "last-draft" | "last_draft" => Ok(Self::LastDraft),
            "fallback" => Ok(Self::Fallback),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentResult {
    pub intent: String,
    pub outcome: Option<String>,
    pub confidence: Option<f64>,
    pub raw: String,
}

/// Parses the intent classifier's reply. Anything that is not a JSON object
/// with an `intent` field keeps the raw text as the intent summary.
pub fn parse_intent(raw: &str) -> IntentResult {
    let fields = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    };
    let text_field = |key: &str| {
        fields
            .as_ref()
            .and_then(|map| map.get(key))
            .and_then(|value| match value {
                Value::String(text) => Some(text.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
    };

    IntentResult {
        intent: text_field("intent").unwrap_or_else(|| raw.to_string()),
        outcome: text_field("outcome"),
        confidence: fields
            .as_ref()
            .and_then(|map| map.get("confidence"))
            .and_then(Value::as_f64),
        raw: raw.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("user message is empty")]
    EmptyMessage,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Approved,
    Exhausted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowReport {
    pub answer: String,
    pub outcome: Outcome,
    pub drafts: usize,
    pub intent: Option<IntentResult>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Default)]
struct Progress {
    intent: Option<IntentResult>,
    drafts: usize,
    reasons: Vec<String>,
}

enum Gate {
    Toxicity,
    Fulfillment,
}

pub struct GenerationWorkflow {
    adapter: Arc<dyn LlmAdapter>,
    observer: Arc<dyn Observer>,
    prompts: PromptBuilder,
    exhaustion: ExhaustionPolicy,
}

impl GenerationWorkflow {
    pub fn new(adapter: Arc<dyn LlmAdapter>) -> Self {
        Self {
            adapter,
            observer: Arc::new(NoopObserver),
            prompts: PromptBuilder::default(),
            exhaustion: ExhaustionPolicy::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion = policy;
        self
    }

    /// Generates the reply for `user_message`. Always returns displayable text.
    pub async fn generate_response(
        &self,
        model: &str,
        user_message: &str,
        context: &ConversationContext,
    ) -> String {
        self.run(model, user_message, context).await.answer
    }

    pub async fn run(
        &self,
        model: &str,
        user_message: &str,
        context: &ConversationContext,
    ) -> WorkflowReport {
        let span = info_span!(
            "generate_response",
            provider = self.adapter.provider().as_str(),
            model = %model
        );

        async {
            let mut progress = Progress::default();
            let result = self
                .execute(model, user_message, context, &mut progress)
                .await;

            let (answer, outcome) = match result {
                Ok(done) => done,
                Err(err) => {
                    error!(error = %err, drafts = progress.drafts, "reply generation failed");
                    (FAILURE_FALLBACK.to_string(), Outcome::Failed)
                }
            };

            WorkflowReport {
                answer,
                outcome,
                drafts: progress.drafts,
                intent: progress.intent,
                reasons: progress.reasons,
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        model: &str,
        user_message: &str,
        context: &ConversationContext,
        progress: &mut Progress,
    ) -> Result<(String, Outcome), WorkflowError> {
        if user_message.trim().is_empty() {
            return Err(WorkflowError::EmptyMessage);
        }

        let raw_intent = self
            .complete(&self.prompts.intent(user_message), model, INTENT_OPTIONS)
            .await?;
        let intent = parse_intent(&raw_intent);
        debug!(intent = %intent.intent, "intent classified");
        let intent_summary = intent.intent.clone();
        progress.intent = Some(intent);

        let mut answer = String::new();
        while progress.drafts < MAX_DRAFT_ATTEMPTS {
            let draft_prompt =
                self.prompts
                    .draft(user_message, &intent_summary, context, &progress.reasons);
            answer = self.complete(&draft_prompt, model, DRAFT_OPTIONS).await?;
            progress.drafts += 1;
            debug!(attempt = progress.drafts, chars = answer.len(), "draft generated");

            let toxicity = self.rate(&self.prompts.toxicity(&answer), model).await?;
            if !toxicity.passes(GATE_THRESHOLD) {
                self.reject(progress, Gate::Toxicity, &toxicity);
                continue;
            }

            let fulfillment = self
                .rate(
                    &self.prompts.fulfillment(user_message, &answer, &intent_summary),
                    model,
                )
                .await?;
            if !fulfillment.passes(GATE_THRESHOLD) {
                self.reject(progress, Gate::Fulfillment, &fulfillment);
                continue;
            }

            if answer.trim().is_empty() {
                warn!(attempt = progress.drafts, "approved draft is blank");
                return Ok((EXHAUSTED_FALLBACK.to_string(), Outcome::Exhausted));
            }
            return Ok((answer, Outcome::Approved));
        }

        warn!(
            drafts = progress.drafts,
            policy = self.exhaustion.as_str(),
            "no draft passed both gates"
        );
        let answer = match self.exhaustion {
            ExhaustionPolicy::LastDraft if !answer.trim().is_empty() => answer,
            _ => EXHAUSTED_FALLBACK.to_string(),
        };
        Ok((answer, Outcome::Exhausted))
    }

    fn reject(&self, progress: &mut Progress, gate: Gate, score: &GateScore) {
        let (label, reason) = match gate {
            Gate::Toxicity => (
                "toxicity",
                format!("Reduce toxicity: {}", score.justification()),
            ),
            Gate::Fulfillment => (
                "fulfillment",
                format!("Better fulfill the user's intent: {}", score.justification()),
            ),
        };
        info!(
            gate = label,
            score = score.value,
            attempt = progress.drafts,
            "draft rejected"
        );
        progress.reasons.push(reason);
    }

    async fn rate(&self, prompt: &Prompt, model: &str) -> Result<GateScore, ProviderError> {
        let completion = self.complete(prompt, model, GATE_OPTIONS).await?;
        Ok(extract_gate_score(&completion, "score"))
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        model: &str,
        options: CallOptions,
    ) -> Result<String, ProviderError> {
        let payload = prompt.to_payload(self.adapter.shape());
        let rendered = payload.render();
        let result = self.adapter.call(payload, model, options).await;

        let call = LlmCall {
            stage: prompt.stage,
            provider: self.adapter.provider(),
            model: model.to_string(),
            prompt: rendered,
            completion: result.as_deref().unwrap_or_default().to_string(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        if let Err(err) = self.observer.record_call(&call) {
            warn!(observer = self.observer.name(), error = %err, "failed to record llm call");
        }
        result
    }
}
