use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use puter_proxy::config::UpstreamConfig;
use puter_proxy::{build_router, AppState, ProxyConfig, PuterClient, SharedLogger};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const BUILDING_MODEL: &str = "builder-model";
const BROKEN_MODEL: &str = "broken-model";

/// Stand-in for the Puter `/drivers/call` endpoint.
#[derive(Default)]
struct MockPuter {
    calls: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
    auth: Mutex<Vec<String>>,
}

impl MockPuter {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_body(&self) -> Value {
        self.bodies.lock().unwrap().last().cloned().unwrap_or(Value::Null)
    }
}

async fn drivers_call(
    State(mock): State<Arc<MockPuter>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        mock.auth.lock().unwrap().push(auth.to_string());
    }
    mock.bodies.lock().unwrap().push(body.clone());

    if body["args"]["model"] == BROKEN_MODEL {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"success": false, "error": {"message": "driver unavailable"}})),
        )
            .into_response();
    }

    if body["args"]["stream"] == true {
        let lines = concat!(
            "{\"type\":\"text\",\"text\":\"Hel\"}\n",
            "{\"type\":\"text\",\"text\":\"lo\"}\n",
            "{\"type\":\"usage\",\"usage\":{\"input_tokens\":3,\"output_tokens\":2}}\n",
        );
        return ([("content-type", "application/x-ndjson")], lines).into_response();
    }

    Json(json!({
        "success": true,
        "result": {
            "message": {"role": "assistant", "content": [{"type": "text", "text": "hello"}]},
            "usage": [
                {"type": "prompt", "model": "x", "amount": 3},
                {"type": "completion", "model": "x", "amount": 2}
            ],
            "via_ai_chat_service": true
        }
    }))
    .into_response()
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Start a mock upstream and a proxy pointed at it.
async fn start() -> (SocketAddr, Arc<MockPuter>) {
    let mock = Arc::new(MockPuter::default());
    let upstream_app = Router::new()
        .route("/drivers/call", post(drivers_call))
        .with_state(mock.clone());
    let upstream_addr = spawn(upstream_app).await;

    let mut config = ProxyConfig {
        port: 0,
        upstream: UpstreamConfig {
            base_url: format!("http://{upstream_addr}"),
            ..UpstreamConfig::default()
        },
        ..ProxyConfig::default()
    };
    config.routing.models.building = BUILDING_MODEL.to_string();

    let upstream = PuterClient::from_config(&config.upstream, Some("test-token".to_string())).unwrap();
    let state = Arc::new(AppState {
        config,
        upstream,
        logger: SharedLogger::in_memory(),
    });

    let proxy_addr = spawn(build_router(state)).await;
    (proxy_addr, mock)
}

#[tokio::test]
async fn test_chat_completions_routes_building_intent() {
    let (addr, mock) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"messages": [{"role": "user", "content": "fix this bug"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], BUILDING_MODEL);
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "hello");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["prompt_tokens"], 3);
    assert_eq!(body["usage"]["total_tokens"], 5);
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));

    assert_eq!(mock.calls(), 1);
    let sent = mock.last_body();
    assert_eq!(sent["interface"], "puter-chat-completion");
    assert_eq!(sent["method"], "complete");
    assert_eq!(sent["driver"], "openai-completion");
    assert_eq!(sent["args"]["model"], BUILDING_MODEL);
    assert_eq!(sent["args"]["messages"], json!([{"role": "user", "content": "fix this bug"}]));
    assert_eq!(mock.auth.lock().unwrap().as_slice(), ["Bearer test-token"]);
}

#[tokio::test]
async fn test_strict_policy_rejects_missing_input_without_upstream_call() {
    let (addr, mock) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/responses"))
        .json(&json!({"input": null}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(body["error"]["code"].is_null());
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let (addr, mock) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_responses_alias_and_envelope() {
    let (addr, mock) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/responses"))
        .json(&json!({
            "model": "deepseek-chat",
            "input": "hi",
            "instructions": "be brief",
            "previous_response_id": "resp_1"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "response");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["model"], "deepseek-chat");
    assert_eq!(body["output_text"], "hello");
    assert_eq!(body["output"][0]["content"][0]["type"], "output_text");
    assert_eq!(body["previous_response_id"], "resp_1");

    let sent = mock.last_body();
    assert_eq!(sent["driver"], "deepseek");
    assert_eq!(sent["args"]["messages"][0], json!({"role": "system", "content": "be brief"}));
    assert_eq!(sent["args"]["messages"][1], json!({"role": "user", "content": "hi"}));
}

#[tokio::test]
async fn test_messages_envelope_and_default_max_tokens() {
    let (addr, mock) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .json(&json!({
            "model": "claude-sonnet-4-5",
            "system": [{"type": "text", "text": "You are terse."}],
            "messages": [{"role": "user", "content": [{"type": "text", "text": "Say hello"}]}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["content"], json!([{"type": "text", "text": "hello"}]));
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["usage"], json!({"input_tokens": 3, "output_tokens": 2}));

    let sent = mock.last_body();
    assert_eq!(sent["driver"], "claude");
    assert_eq!(sent["args"]["max_tokens"], 4096);
    assert_eq!(sent["args"]["messages"][0]["content"], "You are terse.");
    assert_eq!(sent["args"]["messages"][1]["content"], "Say hello");
}

#[tokio::test]
async fn test_chat_passthrough_returns_raw_result() {
    let (addr, _mock) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/chat"))
        .json(&json!({"model": "gpt-5-nano", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["via_ai_chat_service"], true);
    assert_eq!(body["message"]["content"][0]["text"], "hello");
}

#[tokio::test]
async fn test_upstream_error_status_passes_through() {
    let (addr, mock) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": BROKEN_MODEL, "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "provider_error");
    assert_eq!(body["error"]["message"], "driver unavailable");

    let resp = client
        .post(format!("http://{addr}/chat"))
        .json(&json!({"model": BROKEN_MODEL, "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "driver unavailable");
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn test_streaming_chat_completions() {
    let (addr, _mock) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-5-nano",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = resp.text().await.unwrap();
    let data: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data:").map(str::trim))
        .collect();

    assert_eq!(data.last(), Some(&"[DONE]"));
    let chunks: Vec<Value> = data[..data.len() - 1]
        .iter()
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();

    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    let content: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, "Hello");
    let last = chunks.last().unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert_eq!(last["usage"]["total_tokens"], 5);
}

#[tokio::test]
async fn test_streaming_messages_event_sequence() {
    let (addr, _mock) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .json(&json!({
            "model": "claude-sonnet-4-5",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    let events: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("event:").map(str::trim))
        .collect();

    assert_eq!(
        events,
        vec![
            "message_start",
            "ping",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
}

#[tokio::test]
async fn test_streaming_upstream_error_returns_json_error() {
    let (addr, _mock) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/responses"))
        .json(&json!({"model": BROKEN_MODEL, "stream": true, "input": "hi"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "driver unavailable");
}

#[tokio::test]
async fn test_info_models_and_options() {
    let (addr, mock) = start().await;
    let client = reqwest::Client::new();

    for path in ["/", "/health"] {
        let resp = client.get(format!("http://{addr}{path}")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["name"], "puter-proxy");
    }

    for path in ["/v1/models", "/models"] {
        let resp = client.get(format!("http://{addr}{path}")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["object"], "list");
        let data = body["data"].as_array().unwrap();
        assert!(data.iter().any(|m| m["id"] == "deepseek-chat" && m["owned_by"] == "deepseek"));
        assert!(data.iter().all(|m| m["object"] == "model"));
    }

    for path in ["/v1/chat/completions", "/v1/messages", "/anything"] {
        let resp = client
            .request(reqwest::Method::OPTIONS, format!("http://{addr}{path}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_oversized_body_gets_json_error() {
    let (addr, mock) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .header("content-type", "application/json")
        .body(vec![b' '; 51 * 1024 * 1024])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 413);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(!body["error"]["message"].as_str().unwrap().is_empty());
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_logs_record_the_matched_route() {
    let (addr, _mock) = start().await;
    let client = reqwest::Client::new();

    for path in ["/responses", "/v1/responses"] {
        let resp = client
            .post(format!("http://{addr}{path}"))
            .json(&json!({"model": "deepseek-chat", "input": "hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let body: Value = client
        .get(format!("http://{addr}/logs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["object"], "list");
    let routes: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|entry| entry["context"]["route"].as_str())
        .collect();
    // Newest first
    assert_eq!(routes, vec!["/v1/responses", "/responses"]);

    let body: Value = client
        .get(format!("http://{addr}/logs?limit=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}
