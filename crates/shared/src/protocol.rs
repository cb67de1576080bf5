use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

const ID_KEYS: &[&str] = &["id", "_id", "mid"];
const SENDER_KEYS: &[&str] = &["from", "sender", "from_user"];
const TEXT_KEYS: &[&str] = &["text", "body", "message"];
const TIME_KEYS: &[&str] = &["time", "timestamp", "ts"];
const IDENTITY_KEYS: &[&str] = &["username", "name", "email"];

/// Epoch values below this are read as seconds rather than milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendSharedRequest {
    pub text: String,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDirectRequest {
    pub to: String,
    pub text: String,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessageRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub token: String,
    pub username: Option<String>,
}

impl AuthResponse {
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        if !value.is_object() {
            return Err(ProtocolError::NotAnObject);
        }
        let token = first_string(value, &["token"]).ok_or(ProtocolError::MissingField("token"))?;
        Ok(Self {
            token,
            username: first_string(value, &["username"]),
        })
    }
}

/// `GET /api/me` style payloads name the caller in one of several fields.
pub fn identity_from_value(value: &Value) -> Option<String> {
    first_string(value, IDENTITY_KEYS)
}

/// A message as the backend reported it, before any client-side decisions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WireMessage {
    pub id: Option<String>,
    pub sender: Option<String>,
    pub text: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub mine: bool,
    pub client_id: Option<String>,
}

impl WireMessage {
    pub fn from_value(value: &Value) -> Self {
        let text = first_string(value, TEXT_KEYS).unwrap_or_else(|| value.to_string());
        let sent_at = TIME_KEYS
            .iter()
            .filter_map(|key| value.get(*key))
            .find_map(parse_timestamp);

        Self {
            id: first_string(value, ID_KEYS),
            sender: first_string(value, SENDER_KEYS),
            text,
            sent_at,
            mine: value.get("mine").and_then(Value::as_bool).unwrap_or(false),
            client_id: first_string(value, &["client_id"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WireUser {
    pub id: Option<String>,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl WireUser {
    pub fn from_value(value: &Value) -> Self {
        Self {
            id: first_string(value, &["id"]),
            handle: first_string(value, IDENTITY_KEYS),
            display_name: first_string(value, &["display_name"]),
            email: first_string(value, &["email"]),
        }
    }
}

/// First non-empty string (or number, stringified) among `keys`.
pub fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .and_then(from_epoch),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            text.parse::<i64>().ok().and_then(from_epoch)
        }
        _ => None,
    }
}

fn from_epoch(raw: i64) -> Option<DateTime<Utc>> {
    if raw.abs() < EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp(raw, 0)
    } else {
        DateTime::from_timestamp_millis(raw)
    }
}
