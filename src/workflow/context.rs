use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// How many prior turns a conversation keeps by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "bot")]
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Chronological prior turns, bounded to the most recent `limit` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    turns: VecDeque<Turn>,
    limit: usize,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConversationContext {
    pub fn new(turns: impl IntoIterator<Item = Turn>) -> Self {
        let mut context = Self::default();
        context.extend(turns);
        context
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Appends a turn, evicting the oldest one once the bound is reached.
    pub fn push(&mut self, turn: Turn) {
        if self.limit == 0 {
            return;
        }
        if self.turns.len() == self.limit {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        for turn in turns {
            self.push(turn);
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversationContext, Role, Turn};

    #[test]
    fn keeps_most_recent_turns_in_order() {
        let turns = (0..14).map(|i| Turn::user(format!("m{i}")));
        let context = ConversationContext::new(turns);

        let texts = context.turns().map(|t| t.text.as_str()).collect::<Vec<_>>();
        assert_eq!(context.len(), 10);
        assert_eq!(texts.first(), Some(&"m4"));
        assert_eq!(texts.last(), Some(&"m13"));
    }

    #[test]
    fn zero_limit_drops_everything() {
        let mut context = ConversationContext::with_limit(0);
        context.push(Turn::assistant("hi"));
        assert!(context.is_empty());
    }

    #[test]
    fn bot_role_deserializes_as_assistant() {
        let turns: Vec<Turn> = serde_json::from_str(
            r#"[{"role":"user","text":"hi"},{"role":"bot","text":"hello"}]"#,
        )
        .unwrap();
        assert_eq!(turns[1].role, Role::Assistant);
    }
}
