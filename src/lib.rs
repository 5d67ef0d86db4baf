//! Gated reply generation for a chat assistant.
//!
//! [`workflow::GenerationWorkflow`] drafts an answer with an LLM, checks it
//! with a toxicity gate and an intent-fulfillment gate, and regenerates with
//! feedback until both pass or the attempt budget runs out. Providers plug in
//! through [`llm::provider::LlmAdapter`]; every call can be observed through
//! [`observe::Observer`].

pub mod commands;
pub mod config;
pub mod llm;
pub mod observe;
pub mod workflow;
