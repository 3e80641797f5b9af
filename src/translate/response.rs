//! Reshape an upstream reply into each caller-facing envelope.
//!
//! All formatters are pure given the [`ResponseMeta`]; ids are derived from
//! its timestamp and never correlate with anything upstream.

use chrono::{DateTime, Utc};

use super::anthropic_types::{MessagesResponse, ResponseContentBlock, Usage};
use super::openai_types::{
    ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage, OutputContent, OutputItem,
    ResponseObject, ResponseUsage,
};
use super::puter_types::{TokenUsage, UpstreamReply};

/// Per-request values that end up in the envelope.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub timestamp: DateTime<Utc>,
    pub previous_response_id: Option<String>,
}

impl ResponseMeta {
    #[must_use]
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            previous_response_id: None,
        }
    }

    #[must_use]
    pub fn with_previous_response_id(mut self, id: Option<String>) -> Self {
        self.previous_response_id = id;
        self
    }

    /// Opaque, timestamp-derived id such as `chatcmpl-1718000000000`.
    #[must_use]
    pub fn id(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.timestamp.timestamp_millis())
    }

    /// Unix seconds.
    #[must_use]
    pub fn created(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

pub fn chat_usage(usage: TokenUsage) -> ChatUsage {
    ChatUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total(),
    }
}

/// OpenAI `chat.completion` envelope.
pub fn to_chat_completion(
    reply: &UpstreamReply,
    model: &str,
    meta: &ResponseMeta,
) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: meta.id("chatcmpl-"),
        object: "chat.completion".to_string(),
        created: meta.created(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: reply.text(),
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: chat_usage(reply.usage),
    }
}

/// OpenAI Responses `response` envelope.
pub fn to_response(reply: &UpstreamReply, model: &str, meta: &ResponseMeta) -> ResponseObject {
    let item_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
    response_object(&item_id, reply.text(), reply.usage, model, meta, "completed")
}

/// Build a Responses envelope from already-extracted parts. The streaming
/// path uses this for both the opening and the closing event.
pub fn response_object(
    item_id: &str,
    text: String,
    usage: TokenUsage,
    model: &str,
    meta: &ResponseMeta,
    status: &str,
) -> ResponseObject {
    let output = if status == "completed" {
        vec![OutputItem::Message {
            id: item_id.to_string(),
            status: "completed".to_string(),
            role: "assistant".to_string(),
            content: vec![OutputContent::OutputText {
                text: text.clone(),
                annotations: Vec::new(),
            }],
        }]
    } else {
        Vec::new()
    };

    ResponseObject {
        id: meta.id("resp_"),
        object: "response".to_string(),
        created: meta.created(),
        created_at: meta.created(),
        status: status.to_string(),
        model: model.to_string(),
        output,
        output_text: text,
        usage: ResponseUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total(),
        },
        previous_response_id: meta.previous_response_id.clone(),
    }
}

/// Anthropic `message` envelope. Empty text yields an empty content array.
pub fn to_anthropic_message(
    reply: &UpstreamReply,
    model: &str,
    meta: &ResponseMeta,
) -> MessagesResponse {
    let text = reply.text();
    let content = if text.is_empty() {
        Vec::new()
    } else {
        vec![ResponseContentBlock::Text { text }]
    };

    MessagesResponse {
        id: reply.message.id.clone().unwrap_or_else(|| meta.id("msg_")),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason: Some("end_turn".to_string()),
        stop_sequence: None,
        usage: Usage {
            input_tokens: reply.usage.input_tokens,
            output_tokens: reply.usage.output_tokens,
        },
    }
}
