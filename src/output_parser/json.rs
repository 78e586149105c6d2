//! JSON extraction from model replies.
//!
//! Models wrap JSON in prose, code fences and think blocks. The functions
//! here locate the JSON and hand it to serde; they never rewrite it.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::output_parser::error::{truncate, ParseError};
use crate::output_parser::extract::{extract_code_block, find_bracketed, preprocess};

/// A located JSON candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonCandidate {
    /// The JSON text handed to serde.
    pub json: String,
    /// `true` when the JSON was cut out of a fence or surrounding prose.
    pub extracted: bool,
}

/// Parse a model reply into a typed value.
///
/// Candidates are tried in order: the whole cleaned reply, a `json` fence,
/// any fence that opens with a bracket, the last `{...}` region, the last
/// `[...]` region.
///
/// ```
/// use serde::Deserialize;
/// use llm_chains::output_parser::parse_json;
///
/// #[derive(Deserialize, Debug, PartialEq)]
/// struct Feedback {
///     sentiment: String,
/// }
///
/// let reply = r#"<think>hmm</think>Answer: {"sentiment": "positive"}"#;
/// let parsed: Feedback = parse_json(reply).unwrap();
/// assert_eq!(parsed.sentiment, "positive");
/// ```
pub fn parse_json<T: DeserializeOwned>(response: &str) -> Result<T, ParseError> {
    let candidate = locate_json(response)?;
    serde_json::from_str(&candidate.json).map_err(|e| ParseError::DeserializationFailed {
        reason: e.to_string(),
        raw_json: truncate(&candidate.json, 200),
    })
}

/// Parse into a `serde_json::Value` when the shape is unknown.
pub fn parse_json_value(response: &str) -> Result<Value, ParseError> {
    parse_json(response)
}

/// JSON if the reply is JSON or carries a fenced JSON block, otherwise the
/// cleaned text as a string.
///
/// Returns the value and whether it came out of a fence. Brackets inside
/// prose are left alone so free-form answers survive untouched. Fails only
/// on an empty reply.
///
/// ```
/// use llm_chains::output_parser::parse_value_lossy;
/// use serde_json::json;
///
/// assert_eq!(parse_value_lossy("See note [1].").unwrap().0, json!("See note [1]."));
/// assert_eq!(parse_value_lossy("```json\n[1]\n```").unwrap(), (json!([1]), true));
/// ```
pub fn parse_value_lossy(response: &str) -> Result<(Value, bool), ParseError> {
    let cleaned = preprocess(response);
    if cleaned.is_empty() {
        return Err(ParseError::EmptyResponse);
    }
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Ok((value, false));
    }
    let fenced = extract_code_block(&cleaned, Some("json"))
        .or_else(|| extract_code_block(&cleaned, None));
    if let Some(Ok(value)) = fenced.map(serde_json::from_str::<Value>) {
        return Ok((value, true));
    }
    Ok((Value::String(cleaned), false))
}

/// Find the most plausible JSON text in a reply.
///
/// Only candidates that parse as JSON are returned, except for a `json`
/// fence: its body is returned as-is so the caller sees the real serde error.
pub fn locate_json(response: &str) -> Result<JsonCandidate, ParseError> {
    let cleaned = preprocess(response);
    if cleaned.is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    if is_json(&cleaned) {
        return Ok(JsonCandidate {
            json: cleaned,
            extracted: false,
        });
    }

    if let Some(body) = extract_code_block(&cleaned, Some("json")) {
        return Ok(extracted(body));
    }

    if let Some(body) = extract_code_block(&cleaned, None) {
        if (body.starts_with('{') || body.starts_with('[')) && is_json(body) {
            return Ok(extracted(body));
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(region) = find_bracketed(&cleaned, open, close) {
            if is_json(region) {
                return Ok(extracted(region));
            }
        }
    }

    Err(ParseError::NoJson {
        text: truncate(&cleaned, 200),
    })
}

fn extracted(json: &str) -> JsonCandidate {
    JsonCandidate {
        json: json.to_string(),
        extracted: true,
    }
}

fn is_json(text: &str) -> bool {
    serde_json::from_str::<Value>(text).is_ok()
}
