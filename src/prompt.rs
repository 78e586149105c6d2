//! Prompt template rendering.
//!
//! Templates use plain `{key}` placeholders. `{{` and `}}` produce literal
//! braces. Substituted values are inserted verbatim and never rescanned, so
//! a value containing braces (a JSON schema, say) cannot trigger further
//! substitution.
//!
//! Placeholders resolve in this order:
//!
//! 1. `{input}`: the whole stage input as text
//! 2. top-level fields of an object input
//! 3. each variable map, in the order given
//!
//! Unresolved placeholders are left as written.

use serde_json::Value;
use std::collections::HashMap;

/// Render `template` against a stage input and variable maps.
///
/// ```
/// use llm_chains::prompt::render;
/// use serde_json::json;
/// use std::collections::HashMap;
///
/// let vars = HashMap::from([("tone".to_string(), "friendly".to_string())]);
/// let out = render(
///     "Be {tone}. Notes: {notes} Reply as {{\"quiz\": ...}}",
///     &json!({"notes": "SVMs maximise the margin."}),
///     &[&vars],
/// );
/// assert_eq!(out, "Be friendly. Notes: SVMs maximise the margin. Reply as {\"quiz\": ...}");
/// ```
pub fn render(template: &str, input: &Value, vars: &[&HashMap<String, String>]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(&['{', '}'][..]) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if let Some(key) = placeholder(tail) {
            if let Some(value) = lookup(key, input, vars) {
                out.push_str(&value);
                rest = &tail[key.len() + 2..];
                continue;
            }
        }

        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }

    out.push_str(rest);
    out
}

/// Text form of a value: strings verbatim, anything else as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The key of a `{key}` placeholder at the start of `text`, if well-formed.
fn placeholder(text: &str) -> Option<&str> {
    let body = text.strip_prefix('{')?;
    let end = body.find('}')?;
    let key = &body[..end];
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(key)
}

fn lookup(key: &str, input: &Value, vars: &[&HashMap<String, String>]) -> Option<String> {
    if key == "input" {
        return Some(value_text(input));
    }
    if let Some(field) = input.as_object().and_then(|o| o.get(key)) {
        return Some(value_text(field));
    }
    vars.iter().find_map(|m| m.get(key).cloned())
}
