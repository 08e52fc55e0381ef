//! JSON extraction from agent responses.
//!
//! Agents rarely answer with bare JSON. A manifest may arrive inside a
//! markdown fence, after a paragraph of reasoning, or cut short by an output
//! limit. The extractor tries, in order:
//!
//! 1. a ```` ```json ```` fenced block
//! 2. a generic ```` ``` ```` fenced block
//! 3. the whole response, when it starts with `{`
//! 4. the last balanced `{ ... }` object that parses
//!
//! and reports truncation separately from "no JSON at all", so callers can
//! log something useful.
//!
//! ```
//! use course_forge::utils::json_extraction::extract_json_value;
//!
//! let value = extract_json_value("Sure! ```json\n{\"has_work\": true}\n```").unwrap();
//! assert_eq!(value["has_work"], true);
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Why no JSON value could be extracted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed braces. Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
    },
    #[error("No JSON content found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
}

/// Extracts and parses the most plausible JSON object in `content`.
pub fn extract_json_value(content: &str) -> Result<Value, JsonExtractionError> {
    let trimmed = content.trim();

    let fenced = [json_fence(), generic_fence()]
        .into_iter()
        .filter_map(|re| re.captures(trimmed))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()));
    for block in fenced {
        if let Some(value) = parse_object_prefix(&block) {
            return Ok(value);
        }
    }

    if trimmed.starts_with('{') {
        if let Some(value) = parse_object_prefix(trimmed) {
            return Ok(value);
        }
    }

    if let Some(value) = last_valid_object(trimmed) {
        return Ok(value);
    }

    match trimmed.find('{') {
        Some(start) => {
            let partial = &trimmed[start..];
            let unclosed = unclosed_braces(partial);
            if unclosed > 0 {
                Err(JsonExtractionError::Truncated {
                    partial_preview: preview(partial, 100),
                    unclosed_braces: unclosed,
                })
            } else {
                Err(JsonExtractionError::NotFound {
                    content_preview: preview(trimmed, 50),
                })
            }
        }
        None => Err(JsonExtractionError::NotFound {
            content_preview: preview(trimmed, 50),
        }),
    }
}

/// Returns the byte index of the brace closing the object that opens at the
/// start of `s`, honoring string literals and escapes.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn parse_object_prefix(s: &str) -> Option<Value> {
    if !s.starts_with('{') {
        return None;
    }
    let end = find_matching_brace(s)?;
    match serde_json::from_str::<Value>(&s[..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Bounds how often a brace left open by prose restarts the scan.
const MAX_RESCANS: usize = 16;

// Reasoning text often precedes the answer, so the last object wins.
fn last_valid_object(s: &str) -> Option<Value> {
    let mut spans = Vec::new();
    let mut from = 0;
    for _ in 0..=MAX_RESCANS {
        match top_level_objects(&s[from..], from, &mut spans) {
            Some(unclosed) => from = unclosed + 1,
            None => break,
        }
    }

    spans
        .into_iter()
        .rev()
        .filter_map(|(start, end)| serde_json::from_str::<Value>(&s[start..=end]).ok())
        .find(|value| value.as_object().map(|m| !m.is_empty()).unwrap_or(false))
}

/// Single pass collecting `(start, end)` byte spans of balanced top-level
/// objects, offset by `offset`. Returns the start of an object still open
/// at the end of `s`.
fn top_level_objects(s: &str, offset: usize, spans: &mut Vec<(usize, usize)>) -> Option<usize> {
    let mut depth = 0usize;
    let mut start = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if depth == 0 {
            if c == '{' {
                depth = 1;
                start = i;
            }
            continue;
        }
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    spans.push((offset + start, offset + i));
                }
            }
            _ => {}
        }
    }

    (depth > 0).then_some(offset + start)
}

fn unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}

fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn json_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").expect("json fence pattern is valid"))
}

fn generic_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```\w*\s*\n?([\s\S]*?)\n?```").expect("fence pattern is valid"))
}
