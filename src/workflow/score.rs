use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static SCORE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[01](\.\d+)?").expect("score pattern is valid"));

/// Gate verdict parsed from a rater completion.
#[derive(Debug, Clone, PartialEq)]
pub struct GateScore {
    pub value: f64,
    pub raw: String,
    pub reason: Option<String>,
}

impl GateScore {
    pub fn passes(&self, threshold: f64) -> bool {
        self.value >= threshold
    }

    /// Rater justification, falling back to the raw completion.
    pub fn justification(&self) -> &str {
        self.reason
            .as_deref()
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or(self.raw.trim())
    }
}

/// Reads a score in `[0, 1]` from `text`. Never fails: anything unusable is 0.0.
///
/// A numeric `key` in a JSON object wins. Otherwise the first score-like token
/// in the text is used. Numbers outside `[0, 1]` are rejected, not clamped.
pub fn extract_score(text: &str, key: &str) -> f64 {
    if let Some(value) = json_field(text, key).as_ref().and_then(as_score) {
        return in_range(value).unwrap_or(0.0);
    }

    SCORE_PATTERN
        .find(text)
        .and_then(|found| found.as_str().parse::<f64>().ok())
        .and_then(in_range)
        .unwrap_or(0.0)
}

pub fn extract_gate_score(text: &str, key: &str) -> GateScore {
    let reason = json_field(text, "reason").and_then(|value| match value {
        Value::String(reason) => Some(reason),
        Value::Null => None,
        other => Some(other.to_string()),
    });

    GateScore {
        value: extract_score(text, key),
        raw: text.to_string(),
        reason,
    }
}

fn json_field(text: &str, key: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(mut map)) => map.remove(key),
        _ => None,
    }
}

fn as_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn in_range(value: f64) -> Option<f64> {
    (0.0..=1.0).contains(&value).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::{extract_gate_score, extract_score};

    #[test]
    fn json_score_is_read_directly() {
        assert_eq!(extract_score(r#"{"score":0.85,"reason":"x"}"#, "score"), 0.85);
        assert_eq!(extract_score(r#"{"score":1}"#, "score"), 1.0);
        assert_eq!(extract_score(r#"  {"score":"0.75"}  "#, "score"), 0.75);
    }

    #[test]
    fn free_text_falls_back_to_first_number() {
        assert_eq!(extract_score("not json but 0.4 here", "score"), 0.4);
        assert_eq!(extract_score("Score: 1.0 (safe)", "score"), 1.0);
        assert_eq!(extract_score("```json\n{\"score\": 0.9}\n```", "score"), 0.9);
    }

    #[test]
    fn missing_key_uses_scan() {
        assert_eq!(extract_score(r#"{"rating":0.3}"#, "score"), 0.3);
    }

    #[test]
    fn unparseable_text_scores_zero() {
        assert_eq!(extract_score("no numbers", "score"), 0.0);
        assert_eq!(extract_score("", "score"), 0.0);
        assert_eq!(extract_score(r#"{"score":null}"#, "score"), 0.0);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert_eq!(extract_score(r#"{"score":1.5}"#, "score"), 0.0);
        assert_eq!(extract_score(r#"{"score":-0.2}"#, "score"), 0.0);
        assert_eq!(extract_score("rated 1.7 overall", "score"), 0.0);
    }

    #[test]
    fn non_numeric_json_score_falls_back_to_scan() {
        assert_eq!(
            extract_score(r#"{"score":"high","reason":"rated 0.9"}"#, "score"),
            0.9
        );
        assert_eq!(
            extract_score(r#"{"score":null,"reason":"about 0.8"}"#, "score"),
            0.8
        );
        assert_eq!(extract_score(r#"{"score":"0.9/1"}"#, "score"), 0.9);
    }

    #[test]
    fn only_the_first_scanned_token_counts() {
        assert_eq!(extract_score("1.7 then 0.5", "score"), 0.0);
    }

    #[test]
    fn gate_score_keeps_reason_and_raw() {
        let score = extract_gate_score(r#"{"score":0.6,"reason":"too blunt"}"#, "score");
        assert_eq!(score.value, 0.6);
        assert_eq!(score.reason.as_deref(), Some("too blunt"));
        assert_eq!(score.justification(), "too blunt");
        assert!(!score.passes(0.7));

        let score = extract_gate_score("0.95 looks fine", "score");
        assert_eq!(score.reason, None);
        assert_eq!(score.justification(), "0.95 looks fine");
        assert!(score.passes(0.7));
    }
}
