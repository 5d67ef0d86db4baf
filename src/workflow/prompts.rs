use std::fmt;

use serde::Serialize;

use crate::llm::provider::{ChatMessage, PromptPayload, PromptShape};
use crate::workflow::context::{ConversationContext, Role, Turn};

pub const DEFAULT_PERSONA: &str = "You are CandyCode Assistant, a helpful AI chatbot for the CandyCode tech blog.

Your role is to:
- Help visitors understand the blog platform and its features
- Answer questions about creating and publishing blog posts
- Provide information about registration and account management
- Assist with navigation and general inquiries
- Be friendly, concise, and helpful

Key information about CandyCode blog:
- It's a tech blog where users can read and share articles about programming and technology
- Users need to register an account to create posts
- Registered users can write, edit, and delete their own posts
- The blog supports markdown formatting and image uploads
- Anyone can browse and read posts without an account";

const SAFETY_RATER_PERSONA: &str =
    "You are a strict content-safety rater for a public chatbot.";

const QUALITY_RATER_PERSONA: &str =
    "You are a careful reviewer checking chatbot answers against what the user asked for.";

const REASON_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Intent,
    Draft,
    Toxicity,
    Fulfillment,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Draft => "draft",
            Self::Toxicity => "toxicity",
            Self::Fulfillment => "fulfillment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider-neutral prompt. Turned into a concrete payload only at call time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub stage: Stage,
    pub system: String,
    pub history: Vec<Turn>,
    pub user: String,
}

impl Prompt {
    pub fn to_payload(&self, shape: PromptShape) -> PromptPayload {
        match shape {
            PromptShape::Messages => PromptPayload::Messages(self.to_messages()),
            PromptShape::Flattened => PromptPayload::Flattened(self.flatten()),
        }
    }

    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(&self.system));
        messages.extend(self.history.iter().map(|turn| match turn.role {
            Role::User => ChatMessage::user(&turn.text),
            Role::Assistant => ChatMessage::assistant(&turn.text),
        }));
        messages.push(ChatMessage::user(&self.user));
        messages
    }

    pub fn flatten(&self) -> String {
        let mut lines = Vec::with_capacity(self.history.len() + 3);
        lines.push(self.system.clone());
        if !self.history.is_empty() {
            lines.push("Conversation so far:".to_string());
            lines.extend(self.history.iter().map(|turn| match turn.role {
                Role::User => format!("User: {}", turn.text),
                Role::Assistant => format!("Assistant: {}", turn.text),
            }));
        }
        lines.push(self.user.clone());
        lines.join("\n")
    }
}

/// Builds the four stage prompts around one assistant persona.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    persona: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PERSONA)
    }
}

impl PromptBuilder {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
        }
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    pub fn intent(&self, user_message: &str) -> Prompt {
        Prompt {
            stage: Stage::Intent,
            system: self.persona.clone(),
            history: Vec::new(),
            user: format!(
                "Analyze the user's intent and desired outcome.\n\
                 Respond only with JSON: {{\"intent\": string, \"outcome\": string, \"confidence\": number between 0 and 1}}.\n\
                 User message: {user_message}"
            ),
        }
    }

    pub fn draft(
        &self,
        user_message: &str,
        intent: &str,
        context: &ConversationContext,
        reasons: &[String],
    ) -> Prompt {
        let mut user = format!(
            "Intent summary: {intent}\n\
             User message: {user_message}\n\
             Answer the user directly in 2-4 sentences."
        );
        if !reasons.is_empty() {
            user.push_str("\nYour previous draft was rejected. Rewrite it and fix the following: ");
            user.push_str(&reasons.join(REASON_SEPARATOR));
        }

        Prompt {
            stage: Stage::Draft,
            system: self.persona.clone(),
            history: context.turns().cloned().collect(),
            user,
        }
    }

    pub fn toxicity(&self, answer: &str) -> Prompt {
        Prompt {
            stage: Stage::Toxicity,
            system: SAFETY_RATER_PERSONA.to_string(),
            history: Vec::new(),
            user: format!(
                "Rate toxicity of the answer on a scale from 0.0 to 1.0, where 1.0 is completely safe and 0.0 is highly toxic.\n\
                 Respond only with JSON: {{\"score\": number, \"reason\": string}}.\n\
                 Answer to rate: {answer}"
            ),
        }
    }

    pub fn fulfillment(&self, user_message: &str, answer: &str, intent: &str) -> Prompt {
        Prompt {
            stage: Stage::Fulfillment,
            system: QUALITY_RATER_PERSONA.to_string(),
            history: Vec::new(),
            user: format!(
                "Check if the answer fulfills the user's intent. Score from 0.0 to 1.0, where 1.0 fully fulfills it.\n\
                 Respond only with JSON: {{\"score\": number, \"reason\": string}}.\n\
                 User message: {user_message}\n\
                 Answer: {answer}\n\
                 Intent summary: {intent}"
            ),
        }
    }
}
