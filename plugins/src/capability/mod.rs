pub mod command;
pub mod http;

pub use command::CommandCapability;
pub use http::{CapabilityHttpError, CapabilityHttpErrorKind, HttpCapability};

use mare_core::api::CapabilityResponse;
use serde_json::Value;

const OUTPUT_KEYS: [&str; 3] = ["output", "text", "stdout"];

/// Reads a structured reply. Returns `None` when the value carries none of
/// the recognised fields, so callers can fall back to the raw body.
pub(crate) fn response_from_json(value: &Value) -> Option<CapabilityResponse> {
    let obj = value.as_object()?;

    let output = OUTPUT_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .or_else(|| {
            value
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
        })
        .map(str::to_string);
    let confidence = obj.get("confidence").and_then(Value::as_f64);
    let error = match obj.get("error") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(o)) => o
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(Value::Object(o.clone()).to_string())),
        _ => None,
    };

    if output.is_none() && confidence.is_none() && error.is_none() {
        return None;
    }
    Some(CapabilityResponse {
        output: output.unwrap_or_default(),
        confidence,
        error,
    })
}

/// Last `max_lines` lines of `text`.
pub(crate) fn tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
