//! Lenient parsing of model output into a JSON array.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static FENCED_ARRAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```(?:json)?\s*(\[.*?\])\s*```").expect("fenced block pattern")
});
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*\]").expect("array pattern"));

/// Parse a model response into a list of items.
///
/// Tries, in order: the whole response as a JSON array, the array inside a
/// fenced code block, and the span from the first `[` to the last `]`.
/// Returns an empty list when nothing parses; this never fails.
pub fn parse_lenient(response: &str) -> Vec<Value> {
    if let Some(items) = parse_array(response.trim()) {
        return items;
    }

    if let Some(items) = FENCED_ARRAY
        .captures(response)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_array(m.as_str()))
    {
        return items;
    }

    BRACKETED
        .find(response)
        .and_then(|m| parse_array(m.as_str()))
        .unwrap_or_default()
}

fn parse_array(text: &str) -> Option<Vec<Value>> {
    match serde_json::from_str(text) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// The id of a response item. Models sometimes echo string ids as numbers.
pub fn item_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
