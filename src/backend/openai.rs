//! OpenAI-compatible chat completions dialect.
//!
//! Covers OpenAI itself and every relay that mimics it (vLLM, LM Studio,
//! OpenRouter-style gateways, self-hosted proxies).
//!
//! Endpoint: `/v1/chat/completions`.
//! Streaming: SSE with `data: {"choices": [{"delta": {"content": "token"}}]}`.

use super::{AdapterConfig, HttpRequest};
use crate::stream::StreamChunk;
use serde_json::{json, Value};

/// Build the messages array: system (when non-empty), then user.
fn build_messages(config: &AdapterConfig) -> Vec<Value> {
    let mut messages = Vec::with_capacity(2);
    if !config.system_prompt.is_empty() {
        messages.push(json!({"role": "system", "content": config.system_prompt}));
    }
    messages.push(json!({"role": "user", "content": config.user_prompt}));
    messages
}

/// Build the request body for `/v1/chat/completions`.
pub(crate) fn build_body(config: &AdapterConfig, stream: bool) -> Value {
    // Effort has no portable encoding in this dialect; relays reject unknown
    // reasoning fields for non-reasoning models.
    json!({
        "model": config.model,
        "messages": build_messages(config),
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
        "stream": stream,
    })
}

pub(crate) fn build_request(base: &str, config: &AdapterConfig, stream: bool) -> HttpRequest {
    let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
    let mut req = HttpRequest::post(url, build_body(config, stream));
    if !config.api_key.is_empty() {
        req = req.with_header("Authorization", format!("Bearer {}", config.api_key));
    }
    if stream {
        req = req.with_header("Accept", "text/event-stream");
    }
    req
}

fn delta_str<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get(field))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// Non-empty `choices[0].delta.content` becomes text. Relays serving
/// reasoning models stream `delta.reasoning_content`, which becomes thinking.
pub(crate) fn map_record(record: &Value) -> Option<StreamChunk> {
    if let Some(content) = delta_str(record, "content") {
        return Some(StreamChunk::text(content));
    }
    delta_str(record, "reasoning_content").map(StreamChunk::thinking)
}

/// `choices[0].message.content` of a non-streaming response.
pub(crate) fn completion_text(body: &Value) -> Option<String> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
