use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::SharedLogger;
use crate::models::resolve_model;
use crate::providers::DriverPreset;
use crate::proxy::PuterClient;
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest};
use crate::translate::openai_types::{ChatCompletionRequest, ChatErrorResponse, ResponsesRequest};
use crate::translate::puter_types::{StreamChunk, TokenUsage, UpstreamReply};
use crate::translate::request::{
    normalize_chat, normalize_messages, normalize_responses, ChatRequest, Message,
};
use crate::translate::response::{
    to_anthropic_message, to_chat_completion, to_response, ResponseMeta,
};
use crate::translate::streaming::{SseFrame, StreamFormat, StreamTranslator};

use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, MatchedPath, Query, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Largest accepted request body.
pub const BODY_LIMIT: usize = 50 * 1024 * 1024;

/// Anthropic callers that omit `max_tokens` get this cap.
const DEFAULT_MESSAGES_MAX_TOKENS: u64 = 4096;

/// Entries returned by `GET /logs` when no `limit` is given.
const DEFAULT_LOG_LIMIT: usize = 100;

/// Request body as handed to the route handlers; a rejection (oversized or
/// unreadable body) is rendered in the route's own error envelope.
type Body = std::result::Result<Bytes, BytesRejection>;

const ENDPOINTS: &[&str] = &[
    "GET /health",
    "GET /v1/models",
    "GET /logs",
    "POST /v1/chat/completions",
    "POST /v1/responses",
    "POST /v1/messages",
    "POST /chat",
];

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub upstream: PuterClient,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_health))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/models", get(handle_models))
        .route("/logs", get(handle_logs))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/responses", post(handle_responses))
        .route("/responses", post(handle_responses))
        .route("/v1/messages", post(handle_messages))
        .route("/chat", post(handle_chat))
        .fallback(handle_not_found)
        .layer(middleware::from_fn(answer_options))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error envelope family for a route.
#[derive(Debug, Clone, Copy)]
enum ErrorShape {
    /// `{error:{message, type, code}}`
    OpenAi,
    /// `{type:"error", error:{type, message}}`
    Anthropic,
    /// `{error, type}`
    Plain,
}

impl ErrorShape {
    fn render(self, err: &ProxyError) -> Response {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match err {
            ProxyError::Upstream { body, .. } => body.clone(),
            other => other.to_string(),
        };

        match self {
            ErrorShape::OpenAi => {
                (status, Json(ChatErrorResponse::new(err.error_type(), message))).into_response()
            }
            ErrorShape::Anthropic => {
                (status, Json(ErrorResponse::new(err.error_type(), message))).into_response()
            }
            ErrorShape::Plain => (
                status,
                Json(serde_json::json!({ "error": message, "type": err.error_type() })),
            )
                .into_response(),
        }
    }
}

impl AppState {
    /// Resolve the model, log the request and assemble the upstream call.
    fn chat_request(
        &self,
        route: &str,
        messages: Vec<Message>,
        requested_model: Option<&str>,
        temperature: Option<f64>,
        max_tokens: Option<u64>,
        stream: bool,
    ) -> ChatRequest {
        self.logger
            .request_received(route, requested_model, stream, messages.len());

        let model = resolve_model(&self.config.routing, &messages, requested_model);
        ChatRequest {
            messages,
            model,
            temperature,
            max_tokens,
            stream,
        }
    }

    async fn complete(&self, req: &ChatRequest) -> Result<UpstreamReply> {
        self.logger
            .upstream_call(&req.model, self.upstream.driver_for(&req.model), false);
        let reply = self.upstream.chat(req, &self.logger).await?;
        self.logger.upstream_completed(&req.model, reply.usage);
        Ok(reply)
    }

    /// Open the upstream stream and re-frame it for the caller. Errors before
    /// the first upstream byte are returned for the caller's error envelope.
    async fn stream(
        &self,
        req: &ChatRequest,
        format: StreamFormat,
        meta: ResponseMeta,
    ) -> Result<Response> {
        self.logger
            .upstream_call(&req.model, self.upstream.driver_for(&req.model), true);
        let mut chunks = self.upstream.chat_stream(req, &self.logger).await?;

        let mut translator = StreamTranslator::new(format, &req.model, meta);
        let logger = self.logger.clone();
        let model = req.model.clone();

        let events = async_stream::stream! {
            let mut usage = TokenUsage::default();
            let mut failed = false;

            while let Some(chunk) = chunks.next().await {
                match chunk {
                    StreamChunk::Usage(u) => usage = u,
                    StreamChunk::Error(ref message) => {
                        logger.warn("stream", format!("Upstream stream failed model={}: {}", model, message));
                        failed = true;
                    }
                    _ => {}
                }
                for frame in translator.process_chunk(&chunk) {
                    yield Ok::<_, Infallible>(sse_event(frame));
                }
            }

            for frame in translator.finish() {
                yield Ok(sse_event(frame));
            }

            if !failed {
                logger.upstream_completed(&model, usage);
            }
        };

        Ok((
            [(header::CONNECTION, "keep-alive")],
            Sse::new(events).keep_alive(KeepAlive::default()),
        )
            .into_response())
    }
}

fn sse_event(frame: SseFrame) -> Event {
    let event = Event::default().data(frame.data);
    match frame.event {
        Some(name) => event.event(name),
        None => event,
    }
}

fn parse_body<T: DeserializeOwned>(body: Body) -> Result<T> {
    let body = body.map_err(|rejection| {
        ProxyError::request_body(rejection.status().as_u16(), rejection.body_text())
    })?;
    serde_json::from_slice(&body)
        .map_err(|e| ProxyError::invalid_request(format!("Invalid JSON body: {}", e)))
}

fn respond(state: &AppState, route: &str, shape: ErrorShape, result: Result<Response>) -> Response {
    result.unwrap_or_else(|err| {
        state.logger.request_failed(route, &err);
        shape.render(&err)
    })
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Body) -> Response {
    const ROUTE: &str = "/v1/chat/completions";
    let result = chat_completions(&state, ROUTE, body).await;
    respond(&state, ROUTE, ErrorShape::OpenAi, result)
}

async fn chat_completions(state: &AppState, route: &str, body: Body) -> Result<Response> {
    let req: ChatCompletionRequest = parse_body(body)?;
    let messages = normalize_chat(&req, state.config.input_policy)?;
    let chat = state.chat_request(
        route,
        messages,
        req.model.as_deref(),
        req.temperature,
        req.max_completion_tokens.or(req.max_tokens),
        req.stream.unwrap_or(false),
    );

    let meta = ResponseMeta::now();
    if chat.stream {
        return state.stream(&chat, StreamFormat::ChatCompletion, meta).await;
    }

    let reply = state.complete(&chat).await?;
    Ok(Json(to_chat_completion(&reply, &chat.model, &meta)).into_response())
}

/// Serves both `/v1/responses` and `/responses`; the matched path is what
/// gets logged.
async fn handle_responses(
    State(state): State<Arc<AppState>>,
    matched: MatchedPath,
    body: Body,
) -> Response {
    let route = matched.as_str();
    let result = responses(&state, route, body).await;
    respond(&state, route, ErrorShape::OpenAi, result)
}

async fn responses(state: &AppState, route: &str, body: Body) -> Result<Response> {
    let req: ResponsesRequest = parse_body(body)?;
    let messages = normalize_responses(&req, state.config.input_policy)?;
    let chat = state.chat_request(
        route,
        messages,
        req.model.as_deref(),
        req.temperature,
        req.max_output_tokens,
        req.stream.unwrap_or(false),
    );

    let meta = ResponseMeta::now().with_previous_response_id(req.previous_response_id.clone());
    if chat.stream {
        return state.stream(&chat, StreamFormat::Response, meta).await;
    }

    let reply = state.complete(&chat).await?;
    Ok(Json(to_response(&reply, &chat.model, &meta)).into_response())
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Body) -> Response {
    const ROUTE: &str = "/v1/messages";
    let result = messages(&state, ROUTE, body).await;
    respond(&state, ROUTE, ErrorShape::Anthropic, result)
}

async fn messages(state: &AppState, route: &str, body: Body) -> Result<Response> {
    let req: MessagesRequest = parse_body(body)?;
    let messages = normalize_messages(&req, state.config.input_policy)?;
    let chat = state.chat_request(
        route,
        messages,
        req.model.as_deref(),
        req.temperature,
        Some(req.max_tokens.unwrap_or(DEFAULT_MESSAGES_MAX_TOKENS)),
        req.stream.unwrap_or(false),
    );

    let meta = ResponseMeta::now();
    if chat.stream {
        return state.stream(&chat, StreamFormat::AnthropicMessage, meta).await;
    }

    let reply = state.complete(&chat).await?;
    Ok(Json(to_anthropic_message(&reply, &chat.model, &meta)).into_response())
}

async fn handle_chat(State(state): State<Arc<AppState>>, body: Body) -> Response {
    const ROUTE: &str = "/chat";
    let result = chat_passthrough(&state, ROUTE, body).await;
    respond(&state, ROUTE, ErrorShape::Plain, result)
}

/// Chat Completions input, upstream `result` returned untouched. Always
/// non-streaming.
async fn chat_passthrough(state: &AppState, route: &str, body: Body) -> Result<Response> {
    let req: ChatCompletionRequest = parse_body(body)?;
    let messages = normalize_chat(&req, state.config.input_policy)?;
    let chat = state.chat_request(
        route,
        messages,
        req.model.as_deref(),
        req.temperature,
        req.max_completion_tokens.or(req.max_tokens),
        false,
    );

    let reply = state.complete(&chat).await?;
    Ok(Json(reply.raw).into_response())
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "upstream": state.upstream.endpoint(),
        "authenticated": state.upstream.has_token(),
        "input_policy": state.config.input_policy,
        "endpoints": ENDPOINTS,
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .config
        .models
        .iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "object": "model",
                "owned_by": DriverPreset::for_model(id).owned_by,
            })
        })
        .collect();

    Json(serde_json::json!({ "object": "list", "data": models }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

/// Most recent request-log entries, newest first.
async fn handle_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let entries = state
        .logger
        .recent(query.limit.unwrap_or(DEFAULT_LOG_LIMIT));
    Json(serde_json::json!({ "object": "list", "data": entries }))
}

async fn handle_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found", "type": "invalid_request_error" })),
    )
        .into_response()
}

/// Answer every `OPTIONS` request with 200; CORS headers are added by the
/// outer layer.
async fn answer_options(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(req).await
}
