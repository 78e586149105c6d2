//! Plain-text extraction from model replies.

use crate::output_parser::error::ParseError;
use crate::output_parser::extract::preprocess;

/// Filler openers that carry no content.
const FILLER: &[&str] = &[
    "Sure! ",
    "Sure, ",
    "Sure.\n",
    "Of course! ",
    "Of course, ",
    "Certainly! ",
    "Certainly, ",
    "Absolutely! ",
];

/// Openers that introduce the answer on the rest of the line.
const INTRODUCERS: &[&str] = &["Here's ", "Here is "];

/// Clean a model reply for use as plain text.
///
/// Strips think blocks, surrounding whitespace and one leading filler
/// phrase ("Sure!", "Here's the answer:" and similar).
///
/// ```
/// use llm_chains::output_parser::parse_text;
///
/// assert_eq!(parse_text("Sure! Paris is the capital.").unwrap(), "Paris is the capital.");
/// ```
pub fn parse_text(response: &str) -> Result<String, ParseError> {
    let cleaned = preprocess(response);
    let text = strip_opener(&cleaned).trim();
    if text.is_empty() {
        return Err(ParseError::EmptyResponse);
    }
    Ok(text.to_string())
}

fn strip_opener(text: &str) -> &str {
    if let Some(rest) = FILLER.iter().find_map(|p| text.strip_prefix(p)) {
        return rest;
    }
    for intro in INTRODUCERS {
        if let Some(rest) = text.strip_prefix(intro) {
            if let Some(pos) = rest.find(|c: char| c == '\n' || c == ':') {
                return &rest[pos + 1..];
            }
        }
    }
    text
}
