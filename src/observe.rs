//! Side channel recording every LLM call the workflow makes.

use std::sync::Mutex;

use anyhow::anyhow;
use serde::Serialize;
use tracing::debug;

use crate::llm::provider::Provider;
use crate::workflow::prompts::Stage;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmCall {
    pub stage: Stage,
    #[serde(serialize_with = "serialize_provider")]
    pub provider: Provider,
    pub model: String,
    pub prompt: String,
    /// Empty when the call failed.
    pub completion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn serialize_provider<S: serde::Serializer>(
    provider: &Provider,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(provider.as_str())
}

/// Receives one record per completed LLM call. Errors are logged and
/// otherwise ignored by the workflow.
pub trait Observer: Send + Sync {
    fn record_call(&self, call: &LlmCall) -> anyhow::Result<()>;

    fn name(&self) -> &str;
}

pub struct NoopObserver;

impl Observer for NoopObserver {
    #[inline(always)]
    fn record_call(&self, _call: &LlmCall) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Emits each call as a `tracing` debug event.
pub struct LogObserver;

impl Observer for LogObserver {
    fn record_call(&self, call: &LlmCall) -> anyhow::Result<()> {
        debug!(
            stage = %call.stage,
            provider = call.provider.as_str(),
            model = %call.model,
            prompt_chars = call.prompt.chars().count(),
            completion = %call.completion,
            error = call.error.as_deref(),
            "llm.call"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Keeps calls in memory, in the order they happened.
#[derive(Default)]
pub struct MemoryObserver {
    calls: Mutex<Vec<LlmCall>>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<LlmCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.calls().into_iter().map(|call| call.stage).collect()
    }
}

impl Observer for MemoryObserver {
    fn record_call(&self, call: &LlmCall) -> anyhow::Result<()> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| anyhow!("call log mutex poisoned"))?;
        calls.push(call.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::{LlmCall, LogObserver, MemoryObserver, NoopObserver, Observer};
    use crate::llm::provider::Provider;
    use crate::workflow::prompts::Stage;

    fn call(stage: Stage) -> LlmCall {
        LlmCall {
            stage,
            provider: Provider::Gemini,
            model: "gemini-2.5-flash".into(),
            prompt: "prompt".into(),
            completion: "completion".into(),
            error: None,
        }
    }

    #[test]
    fn noop_and_log_accept_calls() {
        assert!(NoopObserver.record_call(&call(Stage::Intent)).is_ok());
        assert!(LogObserver.record_call(&call(Stage::Draft)).is_ok());
        assert_eq!(NoopObserver.name(), "noop");
    }

    #[test]
    fn memory_observer_preserves_order() {
        let observer = MemoryObserver::new();
        for stage in [Stage::Intent, Stage::Draft, Stage::Toxicity] {
            observer.record_call(&call(stage)).unwrap();
        }
        assert_eq!(observer.stages(), [Stage::Intent, Stage::Draft, Stage::Toxicity]);
    }

    #[test]
    fn call_serializes_provider_name() {
        let json = serde_json::to_value(call(Stage::Fulfillment)).unwrap();
        assert_eq!(json["provider"], "gemini");
        assert_eq!(json["stage"], "fulfillment");
        assert!(json.get("error").is_none());
    }
}
