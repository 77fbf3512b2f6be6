//! Recover a JSON object from free-form model output.
//!
//! Strategies are tried in order and the first one that yields a JSON
//! object wins:
//!
//! 1. the whole response;
//! 2. the body of a fenced block labelled `json`;
//! 3. the body of any fenced block;
//! 4. the first balanced top-level `{...}` span.
//!
//! Arrays, strings and other scalars never count as success.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

fn json_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(.+?)\s*```").ok())
        .as_ref()
}

fn any_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.+?)\s*```").ok())
        .as_ref()
}

/// Return the first JSON object recoverable from `response`, if any.
pub fn extract_json_object(response: &str) -> Option<Map<String, Value>> {
    if let Some(obj) = parse_object(response) {
        return Some(obj);
    }

    for re in [json_fence(), any_fence()].into_iter().flatten() {
        for caps in re.captures_iter(response) {
            if let Some(obj) = caps.get(1).and_then(|m| parse_object(m.as_str())) {
                return Some(obj);
            }
        }
    }

    first_brace_span(response).and_then(parse_object)
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Locate the first balanced `{...}` span, ignoring braces inside string
/// literals. Returns `None` when the opening brace is never closed.
fn first_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(map: &Map<String, Value>, k: &str) -> String {
        map.get(k).and_then(Value::as_str).unwrap_or_default().to_string()
    }

    #[test]
    fn bare_object() {
        let obj = extract_json_object(r#"  {"a": "1"}  "#).unwrap();
        assert_eq!(key(&obj, "a"), "1");
    }

    #[test]
    fn labelled_fence_wins_over_surrounding_prose() {
        let text = "Here you go:\n```json\n{\"a\": \"fenced\"}\n```\nThanks!";
        assert_eq!(key(&extract_json_object(text).unwrap(), "a"), "fenced");
    }

    #[test]
    fn unlabelled_fence() {
        let text = "```\n{\"a\": \"plain\"}\n```";
        assert_eq!(key(&extract_json_object(text).unwrap(), "a"), "plain");
    }

    #[test]
    fn brace_scan_skips_braces_in_strings() {
        let text = r#"Result: {"a": "x } y", "b": {"c": "d"}} trailing {"#;
        let obj = extract_json_object(text).unwrap();
        assert_eq!(key(&obj, "a"), "x } y");
        assert!(obj.get("b").unwrap().is_object());
    }

    #[test]
    fn arrays_do_not_count() {
        assert!(extract_json_object(r#"["a", "b"]"#).is_none());
        assert!(extract_json_object("```json\n[1, 2]\n```").is_none());
    }

    #[test]
    fn garbage_yields_none() {
        assert!(extract_json_object("I could not find any fields.").is_none());
        assert!(extract_json_object("{ unterminated").is_none());
    }
}
