//! Turns raw model output into an [`AgentResponse`].
//!
//! Models wrap their JSON in markdown fences, prefix it with prose, or get cut
//! off mid-object. Extraction tries progressively looser strategies and never
//! fails: the last resort is the `parse_error` sentinel.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::agent::AgentResponse;

pub const UNKNOWN_ACTION: &str = "unknown";
pub const NO_REASONING: &str = "No reasoning provided";
pub const EMPTY_CONFIG: &str = "{}";

const RAW_PREVIEW_CHARS: usize = 500;
const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

static LINE_START_BRACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*\{").expect("valid brace regex"));

static SELECTED_ACTION_FIELD: Lazy<Regex> = Lazy::new(|| field_regex("selected_action"));
static REASONING_FIELD: Lazy<Regex> = Lazy::new(|| field_regex("reasoning"));
static PROPOSED_CONFIG_FIELD: Lazy<Regex> = Lazy::new(|| field_regex("proposed_config"));

fn field_regex(field: &str) -> Regex {
    Regex::new(&format!(r#""{field}"\s*:\s*"((?:[^"\\]|\\.)*)""#)).expect("valid field regex")
}

pub fn extract_response(raw: &str) -> AgentResponse {
    let candidate = candidate_json(raw);

    let error = match parse_candidate(&candidate) {
        Ok(response) => return response,
        Err(error) => error,
    };

    tracing::debug!(%error, "agent output is not valid JSON, falling back to field extraction");

    if let Some(response) = recover_fields(raw, &error) {
        return response;
    }

    let preview: String = raw.chars().take(RAW_PREVIEW_CHARS).collect();
    AgentResponse::new(
        AgentResponse::PARSE_ERROR,
        format!("Failed to parse agent output: {error}\nRaw output: {preview}"),
        EMPTY_CONFIG,
    )
}

/// Picks the text most likely to hold the JSON object.
pub fn candidate_json(raw: &str) -> String {
    json_fence(raw)
        .or_else(|| any_fence(raw))
        .or_else(|| line_start_brace(raw))
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Body of the first ```json fence. An unclosed fence runs to the end of the text.
pub fn json_fence(raw: &str) -> Option<String> {
    let start = raw.find(JSON_FENCE)? + JSON_FENCE.len();
    Some(fence_body(&raw[start..]))
}

/// Body of the first fence of any kind.
pub fn any_fence(raw: &str) -> Option<String> {
    let start = raw.find(FENCE)? + FENCE.len();
    Some(fence_body(&raw[start..]))
}

fn fence_body(rest: &str) -> String {
    match rest.find(FENCE) {
        Some(end) => rest[..end].trim().to_string(),
        None => rest.trim().to_string(),
    }
}

/// Remainder of the text from the first brace that opens a line.
pub fn line_start_brace(raw: &str) -> Option<String> {
    let found = LINE_START_BRACE.find(raw)?;
    Some(raw[found.start()..].trim().to_string())
}

fn parse_candidate(candidate: &str) -> Result<AgentResponse, String> {
    let value: Value = serde_json::from_str(candidate).map_err(|error| error.to_string())?;
    let object = value
        .as_object()
        .ok_or_else(|| format!("expected a JSON object, found {}", json_kind(&value)))?;

    let selected_action = object
        .get("selected_action")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_ACTION);
    let reasoning = object
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or(NO_REASONING);
    let proposed_config = match object.get("proposed_config") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => EMPTY_CONFIG.to_string(),
        Some(other) => other.to_string(),
    };

    Ok(AgentResponse::new(selected_action, reasoning, proposed_config))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Best-effort recovery for truncated or malformed objects. Only succeeds
/// when `selected_action` can be found.
fn recover_fields(raw: &str, error: &str) -> Option<AgentResponse> {
    let selected_action = extract_field(&SELECTED_ACTION_FIELD, raw)?;
    let reasoning = extract_field(&REASONING_FIELD, raw)
        .unwrap_or_else(|| format!("Parse failed: {error}"));
    let proposed_config =
        extract_field(&PROPOSED_CONFIG_FIELD, raw).unwrap_or_else(|| EMPTY_CONFIG.to_string());

    Some(AgentResponse::new(selected_action, reasoning, proposed_config))
}

fn extract_field(pattern: &Regex, raw: &str) -> Option<String> {
    pattern
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map(|value| unescape(value.as_str()))
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}
