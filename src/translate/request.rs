//! Normalize the three inbound request shapes into canonical messages.
//!
//! Each normalizer flattens content through [`super::content`] and returns an
//! ordered, never-empty list of [`Message`]. A missing or empty primary field
//! (`messages`, `input`, or `messages`/`prompt`) is handled by the configured
//! [`InputPolicy`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::anthropic_types::MessagesRequest;
use super::content::extract_text;
use super::openai_types::{ChatCompletionRequest, ResponsesRequest};
use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Map a caller-supplied role. `developer` is a system role; anything
    /// unrecognised (including `tool`) is sent as user text.
    #[must_use]
    pub fn parse(role: &str) -> Self {
        match role.to_ascii_lowercase().as_str() {
            "system" | "developer" => Role::System,
            "assistant" | "model" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// Canonical message: role plus flattened text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// One upstream chat call, built fresh per inbound request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub stream: bool,
}

/// What to do when the primary input field is missing or empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputPolicy {
    /// Reject with `invalid_request_error`.
    #[default]
    Strict,
    /// Substitute a single empty user message.
    Lenient,
}

impl InputPolicy {
    fn fallback(self, field: &str) -> Result<Vec<Message>> {
        match self {
            InputPolicy::Strict => Err(ProxyError::invalid_request(format!(
                "'{field}' is required and must not be empty"
            ))),
            InputPolicy::Lenient => Ok(vec![Message::user("")]),
        }
    }
}

/// OpenAI Chat Completions: `messages` plus an optional top-level `system`.
pub fn normalize_chat(req: &ChatCompletionRequest, policy: InputPolicy) -> Result<Vec<Message>> {
    let body = match message_list(req.messages.as_ref()) {
        Some(messages) => messages,
        None => policy.fallback("messages")?,
    };
    Ok(with_system(req.system.as_ref(), body))
}

/// OpenAI Responses: `input` as a string or a list of items, plus optional
/// `instructions`.
pub fn normalize_responses(req: &ResponsesRequest, policy: InputPolicy) -> Result<Vec<Message>> {
    let body = match req.input.as_ref() {
        Some(Value::String(s)) if !s.is_empty() => vec![Message::user(s.clone())],
        other => match message_list(other) {
            Some(messages) => messages,
            None => policy.fallback("input")?,
        },
    };
    Ok(with_system(req.instructions.as_ref(), body))
}

/// Anthropic Messages: `messages`, falling back to `prompt`, with an optional
/// `system` prepended.
pub fn normalize_messages(req: &MessagesRequest, policy: InputPolicy) -> Result<Vec<Message>> {
    let body = message_list(req.messages.as_ref()).or_else(|| {
        req.prompt
            .as_ref()
            .map(extract_text)
            .filter(|p| !p.is_empty())
            .map(|p| vec![Message::user(p)])
    });

    match body {
        Some(messages) => Ok(with_system(req.system.as_ref(), messages)),
        None => {
            let fallback = policy.fallback("messages")?;
            // Lenient: a lone system prompt is already a non-empty conversation.
            let system_only = with_system(req.system.as_ref(), Vec::new());
            Ok(if system_only.is_empty() {
                fallback
            } else {
                system_only
            })
        }
    }
}

/// `None` when the value is absent, not an array, or an empty array.
fn message_list(value: Option<&Value>) -> Option<Vec<Message>> {
    match value {
        Some(Value::Array(items)) if !items.is_empty() => {
            Some(items.iter().map(message_from_item).collect())
        }
        _ => None,
    }
}

fn message_from_item(item: &Value) -> Message {
    match item {
        Value::Object(obj) => {
            let role = obj
                .get("role")
                .and_then(Value::as_str)
                .map_or(Role::User, Role::parse);
            // Role-less typed parts (`{type: "input_text", text}`) carry their own text.
            let content = match obj.get("content") {
                Some(content) => extract_text(content),
                None => extract_text(item),
            };
            Message::new(role, content)
        }
        other => Message::user(extract_text(other)),
    }
}

fn with_system(system: Option<&Value>, mut messages: Vec<Message>) -> Vec<Message> {
    if let Some(text) = system.map(extract_text).filter(|t| !t.is_empty()) {
        messages.insert(0, Message::system(text));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat(body: Value) -> ChatCompletionRequest {
        serde_json::from_value(body).unwrap()
    }

    fn responses(body: Value) -> ResponsesRequest {
        serde_json::from_value(body).unwrap()
    }

    fn anthropic(body: Value) -> MessagesRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_chat_with_system_and_parts() {
        let req = chat(json!({
            "system": "Be brief",
            "messages": [
                {"role": "developer", "content": "house rules"},
                {"role": "user", "content": [{"type": "text", "text": "hi "}, {"type": "text", "text": "there"}]},
                {"role": "assistant", "content": "hello"},
                {"role": "tool", "content": "42"}
            ]
        }));

        let messages = normalize_chat(&req, InputPolicy::Strict).unwrap();
        assert_eq!(
            messages,
            vec![
                Message::system("Be brief"),
                Message::system("house rules"),
                Message::user("hi there"),
                Message::new(Role::Assistant, "hello"),
                Message::user("42"),
            ]
        );
    }

    #[test]
    fn test_chat_missing_messages_per_policy() {
        for body in [json!({}), json!({"messages": null}), json!({"messages": "hi"}), json!({"messages": []})] {
            let req = chat(body);
            let err = normalize_chat(&req, InputPolicy::Strict).unwrap_err();
            assert_eq!(err.status_code(), 400);

            let messages = normalize_chat(&req, InputPolicy::Lenient).unwrap();
            assert_eq!(messages, vec![Message::user("")]);
        }
    }

    #[test]
    fn test_responses_string_input() {
        let req = responses(json!({"input": "What is Rust?", "instructions": "Answer in one line"}));
        let messages = normalize_responses(&req, InputPolicy::Strict).unwrap();
        assert_eq!(
            messages,
            vec![Message::system("Answer in one line"), Message::user("What is Rust?")]
        );
    }

    #[test]
    fn test_responses_item_list_flattens_nested_parts() {
        let req = responses(json!({
            "input": [
                {"role": "user", "content": [{"type": "input_text", "text": "first"}]},
                {"type": "message", "role": "assistant", "content": [{"type": "output_text", "text": "second"}]},
                {"type": "input_text", "text": "third"},
                "fourth"
            ]
        }));
        let messages = normalize_responses(&req, InputPolicy::Strict).unwrap();
        assert_eq!(
            messages,
            vec![
                Message::user("first"),
                Message::new(Role::Assistant, "second"),
                Message::user("third"),
                Message::user("fourth"),
            ]
        );
    }

    #[test]
    fn test_responses_null_input_is_rejected_when_strict() {
        for body in [json!({"input": null}), json!({}), json!({"input": ""}), json!({"input": 7})] {
            let req = responses(body);
            let err = normalize_responses(&req, InputPolicy::Strict).unwrap_err();
            assert_eq!(err.error_type(), "invalid_request_error");

            let messages = normalize_responses(&req, InputPolicy::Lenient).unwrap();
            assert_eq!(messages, vec![Message::user("")]);
        }
    }

    #[test]
    fn test_messages_prompt_fallback() {
        let req = anthropic(json!({"prompt": "Tell me a story", "system": [{"type": "text", "text": "You narrate"}]}));
        let messages = normalize_messages(&req, InputPolicy::Strict).unwrap();
        assert_eq!(
            messages,
            vec![Message::system("You narrate"), Message::user("Tell me a story")]
        );
    }

    #[test]
    fn test_messages_prefers_messages_over_prompt() {
        let req = anthropic(json!({
            "prompt": "ignored",
            "messages": [{"role": "user", "content": "used"}]
        }));
        let messages = normalize_messages(&req, InputPolicy::Strict).unwrap();
        assert_eq!(messages, vec![Message::user("used")]);
    }

    #[test]
    fn test_messages_empty_per_policy() {
        let req = anthropic(json!({"system": "sys only"}));
        assert!(normalize_messages(&req, InputPolicy::Strict).is_err());
        assert_eq!(
            normalize_messages(&req, InputPolicy::Lenient).unwrap(),
            vec![Message::system("sys only")]
        );

        let req = anthropic(json!({"messages": []}));
        assert_eq!(
            normalize_messages(&req, InputPolicy::Lenient).unwrap(),
            vec![Message::user("")]
        );
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(Role::parse("SYSTEM"), Role::System);
        assert_eq!(Role::parse("assistant"), Role::Assistant);
        assert_eq!(Role::parse("function"), Role::User);
    }
}
