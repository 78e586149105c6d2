//! Shared extraction strategies for model output.
//!
//! Every parser calls into these for preprocessing, code block extraction
//! and bracket matching.

/// Preprocessing applied to every response: strip think blocks, trim.
pub fn preprocess(text: &str) -> String {
    strip_think_tags(text).trim().to_string()
}

/// Strip all `<think>...</think>` and `<thinking>...</thinking>` blocks.
///
/// An unclosed block swallows the rest of the text.
///
/// ```
/// use llm_chains::output_parser::strip_think_tags;
///
/// assert_eq!(strip_think_tags("<think>reasoning</think>result"), "result");
/// assert_eq!(strip_think_tags("<think>no closing tag"), "");
/// assert_eq!(strip_think_tags("<thinking>also works</thinking>done"), "done");
/// ```
pub fn strip_think_tags(text: &str) -> String {
    split_thinking(text).1
}

/// Separate reasoning from the answer.
///
/// Returns `(thinking, answer)`. `thinking` joins the bodies of every
/// `<think>`/`<thinking>` block (trimmed, `None` if empty); `answer` is the
/// remaining text, untrimmed.
pub fn split_thinking(text: &str) -> (Option<String>, String) {
    let mut thoughts = Vec::new();
    let mut answer = text.to_string();
    for (open, close) in [("<think>", "</think>"), ("<thinking>", "</thinking>")] {
        while let Some(start) = answer.find(open) {
            let body_start = start + open.len();
            match answer[body_start..].find(close) {
                Some(offset) => {
                    let body_end = body_start + offset;
                    thoughts.push(answer[body_start..body_end].trim().to_string());
                    answer.replace_range(start..body_end + close.len(), "");
                }
                None => {
                    thoughts.push(answer[body_start..].trim().to_string());
                    answer.truncate(start);
                    break;
                }
            }
        }
    }
    thoughts.retain(|t| !t.is_empty());
    let thinking = if thoughts.is_empty() {
        None
    } else {
        Some(thoughts.join("\n"))
    };
    (thinking, answer)
}

/// Extract the body of the first fenced code block.
///
/// With `lang = Some("json")` only blocks tagged `json` (case-insensitive)
/// match; with `None` any block does.
///
/// ```
/// use llm_chains::output_parser::extract::extract_code_block;
///
/// let input = "Here:\n```json\n{\"a\": 1}\n```";
/// assert_eq!(extract_code_block(input, Some("json")), Some("{\"a\": 1}"));
/// assert_eq!(extract_code_block(input, None), Some("{\"a\": 1}"));
/// ```
pub fn extract_code_block<'a>(text: &'a str, lang: Option<&str>) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find("```") {
        let after_ticks = search_from + offset + 3;
        let line_end = after_ticks + text[after_ticks..].find('\n')?;
        let tag = text[after_ticks..line_end].trim();
        let body_start = line_end + 1;
        let close = body_start + text[body_start..].find("```")?;

        if lang.map_or(true, |l| tag.eq_ignore_ascii_case(l)) {
            return Some(text[body_start..close].trim());
        }
        search_from = close + 3;
    }
    None
}

/// Find the last top-level region delimited by `open`/`close`.
///
/// Nesting-aware and skips delimiters inside JSON strings. The last region
/// wins because models tend to put the answer after the explanation.
///
/// ```
/// use llm_chains::output_parser::extract::find_bracketed;
///
/// let input = r#"Result: {"a": [1, 2]}"#;
/// assert_eq!(find_bracketed(input, '{', '}'), Some(r#"{"a": [1, 2]}"#));
/// ```
pub fn find_bracketed(text: &str, open: char, close: char) -> Option<&str> {
    let mut best = None;
    let mut scan_from = 0;

    while let Some(offset) = text[scan_from..].find(open) {
        let start = scan_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        for (i, ch) in text[start..].char_indices() {
            if escaped {
                escaped = false;
            } else if in_string {
                match ch {
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
            } else if ch == '"' {
                in_string = true;
            } else if ch == open {
                depth += 1;
            } else if ch == close {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + i);
                    break;
                }
            }
        }

        match end {
            Some(end) => {
                best = Some(&text[start..=end]);
                scan_from = end + close.len_utf8();
            }
            None => break,
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_multiple_blocks() {
        let input = "<think>a</think>mid<thinking>b</thinking>end";
        assert_eq!(strip_think_tags(input), "midend");
    }

    #[test]
    fn split_thinking_collects_reasoning() {
        let (thinking, answer) = split_thinking("<think>my reasoning</think>{\"x\": 1}");
        assert_eq!(thinking.as_deref(), Some("my reasoning"));
        assert_eq!(answer, "{\"x\": 1}");
    }

    #[test]
    fn split_thinking_empty_block() {
        let (thinking, answer) = split_thinking("<think>  </think>actual content");
        assert!(thinking.is_none());
        assert_eq!(answer, "actual content");
    }

    #[test]
    fn split_thinking_absent() {
        let (thinking, answer) = split_thinking("no tags here");
        assert!(thinking.is_none());
        assert_eq!(answer, "no tags here");
    }

    #[test]
    fn preprocess_strips_and_trims() {
        assert_eq!(preprocess("  <think>stuff</think>  hello world  "), "hello world");
    }

    #[test]
    fn code_block_wrong_lang() {
        let input = "```yaml\nname: test\n```";
        assert_eq!(extract_code_block(input, Some("json")), None);
        assert_eq!(extract_code_block(input, None), Some("name: test"));
    }

    #[test]
    fn code_block_skips_to_matching_lang() {
        let input = "```text\nhello\n```\nthen\n```json\n[1]\n```";
        assert_eq!(extract_code_block(input, Some("json")), Some("[1]"));
    }

    #[test]
    fn code_block_none() {
        assert!(extract_code_block("no code blocks here", None).is_none());
    }

    #[test]
    fn bracketed_prefers_later() {
        let input = r#"[1, 2] and then ["a", "b"]"#;
        assert_eq!(find_bracketed(input, '[', ']'), Some(r#"["a", "b"]"#));
    }

    #[test]
    fn bracketed_ignores_brackets_in_strings() {
        let input = r#"{"text": "hello {world"}"#;
        assert_eq!(find_bracketed(input, '{', '}'), Some(input));
    }

    #[test]
    fn bracketed_unbalanced() {
        assert!(find_bracketed("{\"a\": 1", '{', '}').is_none());
    }
}
