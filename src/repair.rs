//! Layered JSON recovery for model output.
//!
//! Backend models are asked for JSON but return it wrapped in prose, fenced
//! in markdown, or cut off mid-generation when they hit a token limit. This
//! module turns such a blob into a `serde_json::Value` through an explicitly
//! ordered sequence of strategies, each falling through to the next:
//!
//! 1. Strict parse of the text as-is.
//! 2. Strip fenced code-block markers and re-parse.
//! 3. Extract the first balanced JSON value by delimiter counting (skipping
//!    delimiters inside string literals) and parse that substring.
//! 4. Repair a truncated value: cut back to the last clean nesting boundary
//!    and re-close the root delimiter.
//! 5. If a specific named sub-field is expected, locate and parse just that
//!    sub-field's value and return it re-wrapped in an envelope object.
//!
//! When everything fails the caller gets a typed failure carrying a bounded
//! excerpt of the raw text, never the full blob.

use serde_json::Value;

/// Upper bound on the raw-text excerpt carried by a parse failure.
pub const EXCERPT_MAX_CHARS: usize = 500;

/// Why a response could not be turned into structured data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailureKind {
    /// Input was empty or whitespace-only; no recovery was attempted.
    Empty,
    /// Every recovery strategy failed.
    Malformed,
}

/// A failed parse, with a bounded diagnostic excerpt of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub kind: ParseFailureKind,
    pub excerpt: String,
}

impl ParseFailure {
    fn empty() -> Self {
        Self {
            kind: ParseFailureKind::Empty,
            excerpt: String::new(),
        }
    }

    fn malformed(raw: &str) -> Self {
        Self {
            kind: ParseFailureKind::Malformed,
            excerpt: raw.chars().take(EXCERPT_MAX_CHARS).collect(),
        }
    }
}

/// Parse a raw model response into JSON, repairing it if necessary.
///
/// `expected_field` names a sub-field worth salvaging on its own when the
/// envelope is beyond repair (strategy 5). This function never panics and
/// never returns more than [`EXCERPT_MAX_CHARS`] characters of the input
/// inside an error.
pub fn repair_parse(raw: &str, expected_field: Option<&str>) -> Result<Value, ParseFailure> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseFailure::empty());
    }

    // 1. Strict parse.
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    // 2. Strip code fences.
    let unfenced = strip_code_fences(trimmed);
    if let Some(inner) = unfenced {
        if let Ok(value) = serde_json::from_str::<Value>(inner) {
            return Ok(value);
        }
    }
    let search = unfenced.unwrap_or(trimmed);

    // 3. Balanced-value extraction (drops surrounding prose).
    if let Some(candidate) = balanced_value(search) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Ok(value);
        }
    }

    // 4. Truncation repair.
    if let Some(repaired) = close_truncated(search) {
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            return Ok(value);
        }
    }

    // 5. Salvage the expected sub-field alone.
    if let Some(field) = expected_field {
        if let Some(value) = extract_field(search, field) {
            return Ok(value);
        }
    }

    Err(ParseFailure::malformed(raw))
}

/// Strip markdown code-fence markers, returning the fenced body.
fn strip_code_fences(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
        // Opening fence without a closing one: the body may still be usable.
        return Some(body.trim());
    }
    if let Some(stripped) = text.strip_prefix("```") {
        let stripped = stripped.strip_suffix("```").unwrap_or(stripped);
        return Some(stripped.trim());
    }
    None
}

/// Find the first balanced JSON value in `text` by delimiter counting.
///
/// Delimiters inside string literals are ignored. Returns `None` when no
/// opening delimiter exists or the value never closes.
fn balanced_value(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let body = &text[start..];

    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push(b'}'),
            '[' => stack.push(b']'),
            '}' | ']' => {
                match stack.pop() {
                    Some(expected) if expected == c as u8 => {}
                    // Mismatched closer: the text is not a JSON value.
                    _ => return None,
                }
                if stack.is_empty() {
                    return Some(&body[..i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Repair a truncated JSON value by cutting back to the last position where
/// nesting returned to the root level, then re-closing the root delimiter.
///
/// Returns `None` when the text is not truncated (it is balanced, or has no
/// opening delimiter, or no clean cut point exists).
fn close_truncated(text: &str) -> Option<String> {
    let start = text.find(['{', '['])?;
    let body = &text[start..];
    let root_closer = if body.starts_with('{') { '}' } else { ']' };

    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    // End offset (exclusive) of the last complete root-level member.
    let mut cut: Option<usize> = None;

    for (i, c) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                if depth == 0 {
                    return None;
                }
                depth -= 1;
                if depth == 0 {
                    // The value is balanced after all; nothing to repair.
                    return None;
                }
                if depth == 1 {
                    cut = Some(i + c.len_utf8());
                }
            }
            ',' if depth == 1 => cut = Some(i),
            _ => {}
        }
    }

    let cut = cut?;
    let kept = body[..cut].trim_end().trim_end_matches(',');
    let mut repaired = String::with_capacity(kept.len() + 1);
    repaired.push_str(kept);
    repaired.push(root_closer);
    Some(repaired)
}

/// Locate `"field"` in the text, parse just its value, and return it wrapped
/// back in a single-field envelope object.
fn extract_field(text: &str, field: &str) -> Option<Value> {
    let needle = format!("\"{field}\"");
    let key_at = text.find(&needle)?;
    let after_key = &text[key_at + needle.len()..];
    let value_at = after_key.find(['{', '['])?;
    let candidate = balanced_value(&after_key[value_at..])?;
    let value: Value = serde_json::from_str(candidate).ok()?;

    let mut envelope = serde_json::Map::new();
    envelope.insert(field.to_string(), value);
    Some(Value::Object(envelope))
}
