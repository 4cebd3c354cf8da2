use crate::domain::errors::DecodeError;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Extracts a JSON object from an arbitrary model response.
///
/// Model output is adversarial in practice: markdown fences, language tags,
/// truncation, trailing commentary. Every LLM-consuming caller goes through
/// this decoder; for any input it either returns a JSON value or fails with
/// `EmptyResponse`/`MalformedJson`, never with an indexing error.
#[derive(Debug, Clone, Default)]
pub struct RobustJsonDecoder {
    debug_dir: Option<PathBuf>,
}

impl RobustJsonDecoder {
    pub fn new() -> Self {
        Self { debug_dir: None }
    }

    /// Undecodable raw responses are persisted under `dir` keyed by timestamp.
    pub fn with_debug_dir(dir: PathBuf) -> Self {
        Self {
            debug_dir: Some(dir),
        }
    }

    pub fn decode(&self, text: &str, now: DateTime<Utc>) -> Result<serde_json::Value, DecodeError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(DecodeError::EmptyResponse);
        }

        let unfenced = strip_code_fences(trimmed);
        let candidate = extract_object(unfenced).unwrap_or(unfenced);

        match serde_json::from_str::<serde_json::Value>(candidate) {
            Ok(value) if value.is_object() => Ok(value),
            Ok(value) => {
                self.persist_raw(text, now);
                Err(malformed(
                    format!("expected a JSON object, got {}", json_kind(&value)),
                    text,
                ))
            }
            Err(e) => {
                self.persist_raw(text, now);
                Err(malformed(e.to_string(), text))
            }
        }
    }

    fn persist_raw(&self, text: &str, now: DateTime<Utc>) {
        let Some(dir) = &self.debug_dir else {
            return;
        };
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("RobustJsonDecoder: cannot create debug dir {:?}: {}", dir, e);
            return;
        }
        let path = dir.join(format!("raw_response_{}.txt", now.format("%Y%m%dT%H%M%S%f")));
        match fs::write(&path, text) {
            Ok(()) => debug!("RobustJsonDecoder: raw response saved to {:?}", path),
            Err(e) => warn!("RobustJsonDecoder: failed to save raw response: {}", e),
        }
    }
}

/// Strips at most one leading and one trailing markdown fence, tolerating a
/// language tag after the opening fence. Works for 1, 2, or 3+ fence-split
/// segments without assuming any particular count.
fn strip_code_fences(text: &str) -> &str {
    let mut s = text;

    if let Some(rest) = s.strip_prefix("```") {
        // Drop the rest of the fence line ("json", "JSON", or nothing).
        s = match rest.split_once('\n') {
            Some((_, body)) => body,
            // A fence with no newline after it ("```json{...}") keeps the
            // remainder unless it is just a language tag.
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
    }

    if let Some(idx) = s.rfind("```") {
        s = &s[..idx];
    }

    s.trim()
}

/// Slices from the first `{` through its matching `}`, string- and
/// escape-aware. Falls back to the last `}` for truncated nesting, and to
/// `None` when no object is present at all.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }

    // Truncated response: take everything through the last closing brace and
    // let the parser produce the real error.
    text.rfind('}').filter(|&end| end > start).map(|end| &text[start..=end])
}

fn malformed(reason: String, raw: &str) -> DecodeError {
    DecodeError::MalformedJson {
        reason,
        head: raw.chars().take(500).collect(),
        tail: tail_chars(raw, 200),
    }
}

fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
