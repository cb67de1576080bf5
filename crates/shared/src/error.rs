use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("response is missing field `{0}`")]
    MissingField(&'static str),
}

/// Pulls a human readable message out of an error response body.
///
/// Backends answer with `{"detail": ..}` (FastAPI style) or `{"message": ..}`;
/// anything else falls back to the raw text. Empty bodies yield `None`.
pub fn error_message_from_body(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(parsed) = serde_json::from_str::<Value>(trimmed) else {
        return Some(trimmed.to_string());
    };

    for key in ["detail", "message"] {
        match parsed.get(key) {
            Some(Value::String(text)) if text.is_empty() => {}
            Some(Value::String(text)) => return Some(text.clone()),
            Some(Value::Null) | None => {}
            Some(other) => return Some(other.to_string()),
        }
    }

    Some(trimmed.to_string())
}
