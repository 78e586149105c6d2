//! How a model call turns its reply text into a value.
//!
//! Parsing never fails the call. When a strategy cannot produce its value,
//! the error lands in [`ParseDiagnostics::parse_error`] and the value falls
//! back to the cleaned reply text. Strict validation belongs to
//! [`Validator`](crate::validator::Validator), placed after the call.

use crate::diagnostics::ParseDiagnostics;
use crate::output_parser::{self, ParseError};
use serde_json::Value;
use std::sync::Arc;

/// Caller-provided parse function used by [`OutputStrategy::Custom`].
pub type CustomParseFn = Arc<dyn Fn(&str) -> Result<Value, ParseError> + Send + Sync>;

/// Parse strategy for [`LlmCall`](crate::llm_call::LlmCall).
///
/// ```
/// use llm_chains::output_strategy::OutputStrategy;
///
/// let (value, diag) = OutputStrategy::Json.apply("Result: {\"score\": 8}");
/// assert_eq!(value["score"], 8);
/// assert!(diag.ok() && diag.extracted);
/// ```
#[derive(Clone, Default)]
pub enum OutputStrategy {
    /// JSON when the reply is JSON or fenced JSON, otherwise the text.
    /// Never records an error.
    #[default]
    Lossy,

    /// JSON located anywhere in the reply. Records an error when none parses.
    Json,

    /// Plain text with filler openers ("Sure!") removed.
    Text,

    /// The reply exactly as sent, minus reasoning and outer whitespace.
    /// JSON-looking replies stay text.
    Raw,

    /// Caller-provided parser.
    Custom(CustomParseFn),
}

impl OutputStrategy {
    /// Wrap a parse function.
    pub fn custom(f: impl Fn(&str) -> Result<Value, ParseError> + Send + Sync + 'static) -> Self {
        OutputStrategy::Custom(Arc::new(f))
    }

    /// Diagnostic label of the strategy.
    pub fn label(&self) -> &'static str {
        match self {
            OutputStrategy::Lossy => "lossy",
            OutputStrategy::Json => "json",
            OutputStrategy::Text => "text",
            OutputStrategy::Raw => "raw",
            OutputStrategy::Custom(_) => "custom",
        }
    }

    /// Parse `answer` (reply text with reasoning already removed).
    pub fn apply(&self, answer: &str) -> (Value, ParseDiagnostics) {
        let mut diag = ParseDiagnostics {
            strategy: Some(self.label()),
            ..Default::default()
        };
        let fallback = || Value::String(answer.trim().to_string());

        let parsed = match self {
            OutputStrategy::Lossy => output_parser::parse_value_lossy(answer).map(|(v, extracted)| {
                diag.extracted = extracted;
                v
            }),
            OutputStrategy::Json => output_parser::json::locate_json(answer).and_then(|c| {
                diag.extracted = c.extracted;
                output_parser::parse_json_value(&c.json)
            }),
            OutputStrategy::Text => output_parser::parse_text(answer).map(Value::String),
            OutputStrategy::Raw => Ok(fallback()),
            OutputStrategy::Custom(f) => f(answer),
        };

        let value = parsed.unwrap_or_else(|e| {
            diag.parse_error = Some(e.to_string());
            fallback()
        });
        (value, diag)
    }
}

impl std::fmt::Debug for OutputStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputStrategy::Custom(_) => write!(f, "Custom(..)"),
            other => write!(f, "{}", other.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_is_lossy() {
        assert!(matches!(OutputStrategy::default(), OutputStrategy::Lossy));
    }

    #[test]
    fn test_lossy_text_and_json() {
        let (v, d) = OutputStrategy::Lossy.apply("A five point summary.");
        assert_eq!(v, json!("A five point summary."));
        assert!(d.ok());
        assert_eq!(d.strategy, Some("lossy"));

        let (v, d) = OutputStrategy::Lossy.apply("```json\n{\"a\": 1}\n```");
        assert_eq!(v, json!({"a": 1}));
        assert!(d.extracted);
    }

    #[test]
    fn test_lossy_empty_records_error() {
        let (v, d) = OutputStrategy::Lossy.apply("   ");
        assert_eq!(v, json!(""));
        assert!(!d.ok());
    }

    #[test]
    fn test_json_failure_falls_back_to_text() {
        let (v, d) = OutputStrategy::Json.apply("positive");
        assert_eq!(v, json!("positive"));
        assert!(d.parse_error.unwrap().contains("no JSON"));
    }

    #[test]
    fn test_json_direct_not_extracted() {
        let (v, d) = OutputStrategy::Json.apply(r#"{"sentiment": "negative"}"#);
        assert_eq!(v["sentiment"], "negative");
        assert!(!d.extracted);
    }

    #[test]
    fn test_text_strips_filler() {
        let (v, _) = OutputStrategy::Text.apply("Sure! Here it is.");
        assert_eq!(v, json!("Here it is."));
    }

    #[test]
    fn test_raw_keeps_reply_verbatim() {
        let reply = "Here is the report:\n```json\n{\"a\": 1}\n```";
        let (v, d) = OutputStrategy::Raw.apply(&format!("  {reply}\n"));
        assert_eq!(v, json!(reply));
        assert!(d.ok());
        assert_eq!(d.strategy, Some("raw"));
    }

    #[test]
    fn test_custom() {
        let upper = OutputStrategy::custom(|s| Ok(json!(s.to_uppercase())));
        assert_eq!(upper.apply("quiz").0, json!("QUIZ"));

        let failing = OutputStrategy::custom(|_| Err(ParseError::EmptyResponse));
        let (v, d) = failing.apply(" raw ");
        assert_eq!(v, json!("raw"));
        assert_eq!(d.strategy, Some("custom"));
        assert!(!d.ok());
    }

    #[test]
    fn test_debug() {
        assert_eq!(format!("{:?}", OutputStrategy::Json), "json");
        assert_eq!(
            format!("{:?}", OutputStrategy::custom(|_| Ok(Value::Null))),
            "Custom(..)"
        );
    }
}
