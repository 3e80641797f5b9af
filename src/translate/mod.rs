//! Translation between the caller-facing APIs and the Puter drivers API.
//!
//! Inbound OpenAI Chat Completions, OpenAI Responses and Anthropic Messages
//! bodies are normalized into one canonical message list; upstream replies
//! are reshaped back into each caller's envelope, streamed or not. Nothing in
//! here performs I/O.

pub mod anthropic_types;
pub mod content;
pub mod openai_types;
pub mod puter_types;
pub mod request;
pub mod response;
pub mod streaming;
