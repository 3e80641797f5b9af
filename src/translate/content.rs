//! Flattening of heterogeneous message content into plain text.
//!
//! Callers and the upstream both send content as a bare string, a list of
//! typed parts, or a single part object. [`Content::from_value`] sniffs the
//! shape once; everything downstream works on the flattened string.

use serde_json::{Map, Value};

/// Keys consulted on a content part, highest priority first.
const TEXT_KEYS: [&str; 4] = ["text", "output_text", "input_text", "content"];

/// Message content as it arrived on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    PartList(Vec<Value>),
    SinglePart(Map<String, Value>),
    Empty,
}

impl Content {
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Content::Text(s.clone()),
            Value::Array(parts) => Content::PartList(parts.clone()),
            Value::Object(part) => Content::SinglePart(part.clone()),
            _ => Content::Empty,
        }
    }

    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Content::Text(s) => s,
            Content::PartList(parts) => parts.iter().map(part_text).collect(),
            Content::SinglePart(part) => object_text(&part),
            Content::Empty => String::new(),
        }
    }
}

/// Best-effort text of any JSON value. Total: never fails, worst case `""`.
#[must_use]
pub fn extract_text(value: &Value) -> String {
    Content::from_value(value).into_text()
}

fn part_text(part: &Value) -> String {
    match part {
        Value::String(s) => s.clone(),
        Value::Object(obj) => object_text(obj),
        _ => String::new(),
    }
}

fn object_text(obj: &Map<String, Value>) -> String {
    for key in TEXT_KEYS {
        match obj.get(key) {
            Some(Value::String(s)) => return s.clone(),
            // Nested parts, e.g. `{type: "message", content: [...]}`
            Some(nested @ (Value::Array(_) | Value::Object(_))) if key == "content" => {
                return extract_text(nested);
            }
            _ => {}
        }
    }
    String::new()
}
