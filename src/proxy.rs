//! Client for the Puter drivers API.
//!
//! One outbound call per inbound request, no retries. The token and base URL
//! are fixed when the client is built; handlers never read them from the
//! environment.

use crate::config::UpstreamConfig;
use crate::error::{ProxyError, Result};
use crate::logging::SharedLogger;
use crate::providers::DriverPreset;
use crate::translate::puter_types::{
    error_message, ChatArgs, DriverCallRequest, StreamChunk, UpstreamReply, CHAT_INTERFACE,
    CHAT_METHOD,
};
use crate::translate::request::ChatRequest;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

/// Decoded chunks of a streamed upstream body.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

#[derive(Debug, Clone)]
pub struct PuterClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    driver_override: Option<String>,
}

impl PuterClient {
    pub fn new(http: reqwest::Client, config: &UpstreamConfig, token: Option<String>) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            driver_override: config.driver.clone(),
        }
    }

    /// Build a client with its own connection pool and the configured timeout.
    pub fn from_config(config: &UpstreamConfig, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::new(http, config, token))
    }

    pub fn endpoint(&self) -> String {
        format!("{}/drivers/call", self.base_url)
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Puter driver that serves `model`.
    pub fn driver_for<'a>(&'a self, model: &str) -> &'a str {
        self.driver_override
            .as_deref()
            .unwrap_or_else(|| DriverPreset::for_model(model).driver)
    }

    fn request(&self, req: &ChatRequest, stream: bool) -> reqwest::RequestBuilder {
        let body = DriverCallRequest {
            interface: CHAT_INTERFACE,
            driver: self.driver_for(&req.model),
            test_mode: false,
            method: CHAT_METHOD,
            args: ChatArgs {
                messages: &req.messages,
                model: &req.model,
                stream,
                temperature: req.temperature,
                max_tokens: req.max_tokens,
            },
        };

        let mut builder = self.http.post(self.endpoint()).json(&body);
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Non-streaming call: waits for the full body and parses the reply.
    pub async fn chat(&self, req: &ChatRequest, logger: &SharedLogger) -> Result<UpstreamReply> {
        let response = self
            .request(req, false)
            .send()
            .await
            .map_err(|e| ProxyError::provider(format!("Request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            ProxyError::provider(format!("Failed to read response body: {}", e))
        })?;

        logger.debug(
            "proxy",
            format!("Response status={} body_len={}", status, body.len()),
        );

        if !(200..300).contains(&status) {
            return Err(ProxyError::upstream(status, upstream_error_text(&body)));
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            ProxyError::translation(format!(
                "Failed to parse upstream response: {}. Body: {}",
                e,
                truncate(&body, 300)
            ))
        })?;

        UpstreamReply::from_body(status, value)
    }

    /// Streaming call. Errors before the first body byte are returned
    /// directly; later failures arrive as [`StreamChunk::Error`].
    pub async fn chat_stream(&self, req: &ChatRequest, logger: &SharedLogger) -> Result<ChunkStream> {
        let response = self
            .request(req, true)
            .send()
            .await
            .map_err(|e| ProxyError::provider(format!("Streaming request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            logger.warn(
                "proxy",
                format!("Streaming error status={}: {}", status, truncate(&body, 300)),
            );
            return Err(ProxyError::upstream(status, upstream_error_text(&body)));
        }

        Ok(Box::pin(decode_lines(response.bytes_stream(), logger.clone())))
    }
}

/// Split a byte stream into lines and decode each as a [`StreamChunk`].
///
/// Lines are cut on raw bytes so multi-byte characters split across network
/// chunks survive intact.
pub fn decode_lines<E: std::fmt::Display + Send + 'static>(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    logger: SharedLogger,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();

        tokio::pin!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    logger.error("stream", format!("Byte stream error: {}", e));
                    yield StreamChunk::Error(format!("Upstream stream interrupted: {}", e));
                    return;
                }
            };

            buffer.extend_from_slice(&chunk);

            while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                let line = String::from_utf8_lossy(&line);

                let decoded = StreamChunk::from_line(&line);
                if decoded.is_empty() && !line.trim().is_empty() {
                    logger.debug("stream", format!("Skipping unparseable line: {}", truncate(line.trim(), 200)));
                }
                for chunk in decoded {
                    let done = chunk == StreamChunk::Done;
                    yield chunk;
                    if done {
                        return;
                    }
                }
            }
        }

        // Final line without a trailing newline
        for decoded in StreamChunk::from_line(&String::from_utf8_lossy(&buffer)) {
            yield decoded;
        }

        logger.debug("stream", "Upstream stream completed");
    }
}

/// Prefer the driver's error message over the raw body.
fn upstream_error_text(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").map(error_message))
        .unwrap_or_else(|| truncate(body, 500).to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
