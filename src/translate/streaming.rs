//! State machine for re-framing upstream text chunks as caller-facing SSE.
//!
//! The [`StreamTranslator`] consumes decoded upstream chunks one at a time and
//! emits the event sequence each protocol expects: `chat.completion.chunk`
//! frames ending in `[DONE]`, Responses `response.*` events, or Anthropic
//! `message_*` / `content_block_*` events.

use serde::Serialize;
use serde_json::json;

use super::anthropic_types::{
    Delta, DeltaUsage, ErrorResponse, MessageDeltaBody, MessagesResponse, ResponseContentBlock,
    StreamEvent, Usage,
};
use super::openai_types::{
    ChatCompletionChunk, ChatErrorResponse, ChunkChoice, ChunkDelta, ResponseObject,
    ResponseStreamEvent,
};
use super::puter_types::{StreamChunk, TokenUsage};
use super::response::{chat_usage, response_object, ResponseMeta};

/// One server-sent event, ready to be written as `event:`/`data:` lines.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    fn json(event: Option<&str>, payload: &impl Serialize) -> Option<Self> {
        serde_json::to_string(payload).ok().map(|data| Self {
            event: event.map(String::from),
            data,
        })
    }
}

/// Which inbound API the stream is answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    ChatCompletion,
    Response,
    AnthropicMessage,
}

/// Usage:
///   let mut translator = StreamTranslator::new(StreamFormat::Response, "gpt-5-nano", ResponseMeta::now());
///   for chunk in upstream_chunks {
///       let frames = translator.process_chunk(&chunk);
///       // write each frame
///   }
///   let final_frames = translator.finish();
#[derive(Debug)]
pub struct StreamTranslator {
    format: StreamFormat,
    model: String,
    meta: ResponseMeta,
    item_id: String,
    started: bool,
    finished: bool,
    in_text_block: bool,
    text: String,
    usage: TokenUsage,
}

impl StreamTranslator {
    pub fn new(format: StreamFormat, model: &str, meta: ResponseMeta) -> Self {
        Self {
            format,
            model: model.to_string(),
            meta,
            item_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            started: false,
            finished: false,
            in_text_block: false,
            text: String::new(),
            usage: TokenUsage::default(),
        }
    }

    /// Translate one upstream chunk into zero or more frames.
    pub fn process_chunk(&mut self, chunk: &StreamChunk) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }

        match chunk {
            StreamChunk::Usage(usage) => {
                self.usage = *usage;
                Vec::new()
            }
            StreamChunk::Text(text) => {
                let mut frames = self.start_frames();
                frames.extend(self.text_frames(text));
                self.text.push_str(text);
                frames
            }
            StreamChunk::Error(message) => self.fail(message),
            StreamChunk::Done => self.finish(),
        }
    }

    /// Close the stream. Safe to call more than once.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }

        let mut frames = self.start_frames();
        self.finished = true;

        match self.format {
            StreamFormat::ChatCompletion => {
                frames.extend(SseFrame::json(
                    None,
                    &self.chat_chunk(ChunkDelta::default(), Some("stop"), true),
                ));
                frames.push(SseFrame {
                    event: None,
                    data: "[DONE]".to_string(),
                });
            }
            StreamFormat::Response => {
                let done = ResponseStreamEvent::OutputTextDone {
                    item_id: self.item_id.clone(),
                    output_index: 0,
                    content_index: 0,
                    text: self.text.clone(),
                };
                let completed = ResponseStreamEvent::Completed {
                    response: self.response_snapshot("completed"),
                };
                frames.extend(response_frame(&done));
                frames.extend(response_frame(&completed));
            }
            StreamFormat::AnthropicMessage => {
                if self.in_text_block {
                    frames.extend(anthropic_frame(&StreamEvent::ContentBlockStop { index: 0 }));
                    self.in_text_block = false;
                }
                frames.extend(anthropic_frame(&StreamEvent::MessageDelta {
                    delta: MessageDeltaBody {
                        stop_reason: Some("end_turn".to_string()),
                        stop_sequence: None,
                    },
                    usage: DeltaUsage {
                        output_tokens: self.usage.output_tokens,
                    },
                }));
                frames.extend(anthropic_frame(&StreamEvent::MessageStop));
            }
        }

        frames
    }

    /// Emit the protocol's error frame and stop; no completion frames follow.
    pub fn fail(&mut self, message: &str) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let frame = match self.format {
            StreamFormat::ChatCompletion => {
                SseFrame::json(None, &ChatErrorResponse::new("provider_error", message))
            }
            StreamFormat::Response => SseFrame::json(
                Some("error"),
                &json!({"type": "error", "code": "provider_error", "message": message}),
            ),
            StreamFormat::AnthropicMessage => {
                SseFrame::json(Some("error"), &ErrorResponse::new("provider_error", message))
            }
        };
        frame.into_iter().collect()
    }

    fn start_frames(&mut self) -> Vec<SseFrame> {
        if self.started {
            return Vec::new();
        }
        self.started = true;

        match self.format {
            StreamFormat::ChatCompletion => {
                let delta = ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: Some(String::new()),
                };
                SseFrame::json(None, &self.chat_chunk(delta, None, false))
                    .into_iter()
                    .collect()
            }
            StreamFormat::Response => response_frame(&ResponseStreamEvent::Created {
                response: self.response_snapshot("in_progress"),
            })
            .into_iter()
            .collect(),
            StreamFormat::AnthropicMessage => {
                let start = StreamEvent::MessageStart {
                    message: MessagesResponse {
                        id: self.meta.id("msg_"),
                        response_type: "message".to_string(),
                        role: "assistant".to_string(),
                        content: Vec::new(),
                        model: self.model.clone(),
                        stop_reason: None,
                        stop_sequence: None,
                        usage: Usage {
                            input_tokens: self.usage.input_tokens,
                            output_tokens: 0,
                        },
                    },
                };
                [start, StreamEvent::Ping]
                    .iter()
                    .filter_map(anthropic_frame)
                    .collect()
            }
        }
    }

    fn text_frames(&mut self, text: &str) -> Vec<SseFrame> {
        match self.format {
            StreamFormat::ChatCompletion => {
                let delta = ChunkDelta {
                    role: None,
                    content: Some(text.to_string()),
                };
                SseFrame::json(None, &self.chat_chunk(delta, None, false))
                    .into_iter()
                    .collect()
            }
            StreamFormat::Response => response_frame(&ResponseStreamEvent::OutputTextDelta {
                item_id: self.item_id.clone(),
                output_index: 0,
                content_index: 0,
                delta: text.to_string(),
            })
            .into_iter()
            .collect(),
            StreamFormat::AnthropicMessage => {
                let mut frames = Vec::new();
                if !self.in_text_block {
                    frames.extend(anthropic_frame(&StreamEvent::ContentBlockStart {
                        index: 0,
                        content_block: ResponseContentBlock::Text {
                            text: String::new(),
                        },
                    }));
                    self.in_text_block = true;
                }
                frames.extend(anthropic_frame(&StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: Delta::TextDelta {
                        text: text.to_string(),
                    },
                }));
                frames
            }
        }
    }

    fn chat_chunk(
        &self,
        delta: ChunkDelta,
        finish_reason: Option<&str>,
        with_usage: bool,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.meta.id("chatcmpl-"),
            object: "chat.completion.chunk".to_string(),
            created: self.meta.created(),
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(String::from),
            }],
            usage: with_usage.then(|| chat_usage(self.usage)),
        }
    }

    fn response_snapshot(&self, status: &str) -> ResponseObject {
        response_object(
            &self.item_id,
            self.text.clone(),
            self.usage,
            &self.model,
            &self.meta,
            status,
        )
    }
}

fn response_frame(event: &ResponseStreamEvent) -> Option<SseFrame> {
    SseFrame::json(Some(event.event_name()), event)
}

fn anthropic_frame(event: &StreamEvent) -> Option<SseFrame> {
    SseFrame::json(Some(event.event_name()), event)
}
