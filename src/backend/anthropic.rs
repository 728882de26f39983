//! Anthropic messages dialect.
//!
//! Endpoint: `/v1/messages`. The system prompt is a top-level field and the
//! conversation is a single user message.
//!
//! High and max effort turn on extended thinking with a 5000 / 10000 token
//! budget. The API only accepts temperature 1 in that mode and requires
//! `max_tokens` to exceed the budget.

use super::{AdapterConfig, HttpRequest};
use crate::stream::StreamChunk;
use serde_json::{json, Value};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Headroom kept above the thinking budget for the visible answer.
const ANSWER_HEADROOM: u32 = 1024;

pub(crate) fn build_body(config: &AdapterConfig, stream: bool) -> Value {
    let mut body = json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
        "messages": [{"role": "user", "content": config.user_prompt}],
        "stream": stream,
    });

    if !config.system_prompt.is_empty() {
        body["system"] = json!(config.system_prompt);
    }

    if let Some(budget) = config.effort.thinking_budget() {
        body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        body["temperature"] = json!(1);
        body["max_tokens"] = json!(config.max_tokens.max(budget + ANSWER_HEADROOM));
    }

    body
}

pub(crate) fn build_request(base: &str, config: &AdapterConfig, stream: bool) -> HttpRequest {
    let url = format!("{}/v1/messages", base.trim_end_matches('/'));
    let mut req = HttpRequest::post(url, build_body(config, stream))
        .with_header("x-api-key", config.api_key.clone())
        .with_header("anthropic-version", ANTHROPIC_VERSION);
    if stream {
        req = req.with_header("Accept", "text/event-stream");
    }
    req
}

/// `content_block_delta` records: `thinking_delta` becomes thinking,
/// `text_delta` becomes text. Every other event (message_start, ping,
/// signature deltas, ...) carries nothing for the caller.
pub(crate) fn map_record(record: &Value) -> Option<StreamChunk> {
    let delta = record.get("delta")?;
    match delta.get("type").and_then(|t| t.as_str())? {
        "thinking_delta" => delta
            .get("thinking")
            .and_then(|v| v.as_str())
            .map(StreamChunk::thinking),
        "text_delta" => delta
            .get("text")
            .and_then(|v| v.as_str())
            .map(StreamChunk::text),
        _ => None,
    }
}

/// Concatenated `text` blocks of a non-streaming response.
pub(crate) fn completion_text(body: &Value) -> Option<String> {
    let blocks = body.get("content")?.as_array()?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    Some(text)
}
