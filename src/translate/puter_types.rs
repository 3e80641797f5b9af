//! Wire types for the Puter drivers API (`POST /drivers/call`).
//!
//! Requests are strongly typed. Replies are kept as raw JSON because the
//! shape of `result` depends on which driver served the call; the parsed view
//! only pulls out the assistant message and token usage.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::content::extract_text;
use super::request::Message;
use crate::error::{ProxyError, Result};

pub const CHAT_INTERFACE: &str = "puter-chat-completion";
pub const CHAT_METHOD: &str = "complete";

// ---------------------------------------------------------------------------
// Request types (what we send TO Puter)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DriverCallRequest<'a> {
    pub interface: &'static str,
    pub driver: &'a str,
    pub test_mode: bool,
    pub method: &'static str,
    pub args: ChatArgs<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatArgs<'a> {
    pub messages: &'a [Message],
    pub model: &'a str,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Reply types (what Puter sends back)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Read usage from any of the shapes drivers report; unknown shapes are zero.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(obj) => Self {
                input_tokens: first_u64(obj, &["input_tokens", "prompt_tokens"]),
                output_tokens: first_u64(obj, &["output_tokens", "completion_tokens"]),
            },
            // Puter metering form: [{type: "prompt", amount}, {type: "completion", amount}]
            Value::Array(items) => items.iter().fold(Self::default(), |mut acc, item| {
                let amount = item.get("amount").and_then(Value::as_u64).unwrap_or(0);
                match item.get("type").and_then(Value::as_str) {
                    Some("prompt" | "input") => {
                        acc.input_tokens = acc.input_tokens.saturating_add(amount)
                    }
                    Some("completion" | "output") => {
                        acc.output_tokens = acc.output_tokens.saturating_add(amount)
                    }
                    _ => {}
                }
                acc
            }),
            _ => Self::default(),
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

fn first_u64(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> u64 {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_u64))
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyMessage {
    pub id: Option<String>,
    pub role: String,
    pub content: Value,
}

/// A completed, non-streaming upstream reply.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    /// The driver's `result` object, untouched.
    pub raw: Value,
    pub message: ReplyMessage,
    pub usage: TokenUsage,
}

impl UpstreamReply {
    /// Parse a `/drivers/call` response body.
    ///
    /// Bodies with `success: false` are reported as upstream errors carrying
    /// `status`, since Puter signals some failures with a 2xx.
    pub fn from_body(status: u16, body: Value) -> Result<Self> {
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("error")
                .map(error_message)
                .unwrap_or_else(|| body.to_string());
            return Err(ProxyError::upstream(status, message));
        }

        let raw = match body {
            Value::Object(mut obj) if obj.contains_key("result") => {
                obj.remove("result").unwrap_or(Value::Null)
            }
            other => other,
        };

        let message_value = raw
            .get("message")
            .or_else(|| raw.pointer("/choices/0/message"))
            .cloned()
            .unwrap_or(Value::Null);

        let message = ReplyMessage {
            id: message_value
                .get("id")
                .and_then(Value::as_str)
                .map(String::from),
            role: message_value
                .get("role")
                .and_then(Value::as_str)
                .unwrap_or("assistant")
                .to_string(),
            content: message_value.get("content").cloned().unwrap_or(Value::Null),
        };

        let usage = raw.get("usage").map(TokenUsage::from_value).unwrap_or_default();

        Ok(Self {
            raw,
            message,
            usage,
        })
    }

    /// Flattened assistant text.
    #[must_use]
    pub fn text(&self) -> String {
        extract_text(&self.message.content)
    }
}

/// Text of an error value, which drivers send as a string or `{message, code}`.
#[must_use]
pub fn error_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// One decoded line of a streamed upstream body.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    Usage(TokenUsage),
    Error(String),
    Done,
}

impl StreamChunk {
    /// Decode a newline-delimited JSON line (an optional SSE `data:` prefix is
    /// tolerated). Blank or unparseable lines, and objects that carry nothing
    /// we forward, decode to no chunks.
    ///
    /// A driver that ignores `stream: true` answers with one buffered
    /// `{success, result}` envelope; its text and usage both come through.
    #[must_use]
    pub fn from_line(line: &str) -> Vec<Self> {
        let line = line.trim();
        let data = line
            .strip_prefix("data:")
            .map(str::trim)
            .unwrap_or(line);

        if data.is_empty() {
            return Vec::new();
        }
        if data == "[DONE]" {
            return vec![StreamChunk::Done];
        }

        let Ok(value) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };

        if value.get("success").and_then(Value::as_bool) == Some(false) {
            let message = value.get("error").map(error_message).unwrap_or_default();
            return vec![StreamChunk::Error(message)];
        }
        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            return vec![StreamChunk::Error(error_message(err))];
        }

        let value = match value {
            Value::Object(mut obj) if obj.contains_key("result") => {
                obj.remove("result").unwrap_or(Value::Null)
            }
            other => other,
        };

        let mut chunks = Vec::new();
        let text = stream_text(&value);
        if !text.is_empty() {
            chunks.push(StreamChunk::Text(text));
        }
        if let Some(usage) = value.get("usage") {
            chunks.push(StreamChunk::Usage(TokenUsage::from_value(usage)));
        }
        chunks
    }
}

fn stream_text(value: &Value) -> String {
    if value.get("type").and_then(Value::as_str) == Some("usage") {
        return String::new();
    }
    let direct = extract_text(value);
    if !direct.is_empty() {
        return direct;
    }
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| value.pointer("/choices/0/delta/content"))
        .map(extract_text)
        .unwrap_or_default()
}
