//! LLM provider integration.
//!
//! Adapters expose one completion call per request over either backend; the
//! generation workflow only ever talks to the [`provider::LlmAdapter`] trait.

/// Gemini `generateContent` adapter (single-shot prompts).
pub mod gemini;
/// OpenAI chat-completions adapter (multi-turn messages).
pub mod openai;
/// Provider-agnostic adapter trait, payloads, settings and errors.
pub mod provider;
pub(crate) mod transport;
