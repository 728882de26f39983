//! Google Gemini `generateContent` dialect.
//!
//! Streaming endpoint: `/v1beta/models/{model}:streamGenerateContent?alt=sse`,
//! which frames each `GenerateContentResponse` as an SSE `data:` line.

use super::{AdapterConfig, HttpRequest};
use crate::stream::StreamChunk;
use reqwest::Url;
use serde_json::{json, Value};

pub(crate) fn build_body(config: &AdapterConfig) -> Value {
    let mut body = json!({
        "contents": [{"role": "user", "parts": [{"text": config.user_prompt}]}],
        "generationConfig": {
            "temperature": config.temperature,
            "maxOutputTokens": config.max_tokens,
        },
    });
    if !config.system_prompt.is_empty() {
        body["systemInstruction"] = json!({"parts": [{"text": config.system_prompt}]});
    }
    body
}

/// `{base}/v1beta/models/{model}:{method}`, with the model id encoded as a
/// single path segment.
fn model_url(base: &str, model: &str, method: &str) -> String {
    let model = model.strip_prefix("models/").unwrap_or(model);
    let segment = format!("{}:{}", model, method);
    match Url::parse(base) {
        Ok(mut url) => {
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.pop_if_empty().extend(["v1beta", "models", segment.as_str()]);
            }
            url.to_string()
        }
        // unparseable base
        Err(_) => format!("{}/v1beta/models/{}", base.trim_end_matches('/'), segment),
    }
}

pub(crate) fn build_request(base: &str, config: &AdapterConfig, stream: bool) -> HttpRequest {
    let url = if stream {
        format!("{}?alt=sse", model_url(base, &config.model, "streamGenerateContent"))
    } else {
        model_url(base, &config.model, "generateContent")
    };
    HttpRequest::post(url, build_body(config)).with_header("x-goog-api-key", config.api_key.clone())
}

fn first_part_text(record: &Value) -> Option<&str> {
    record
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
}

/// Non-empty `candidates[0].content.parts[0].text` becomes text.
pub(crate) fn map_record(record: &Value) -> Option<StreamChunk> {
    first_part_text(record)
        .filter(|t| !t.is_empty())
        .map(StreamChunk::text)
}

pub(crate) fn completion_text(body: &Value) -> Option<String> {
    first_part_text(body).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_config;

    #[test]
    fn test_body_fields() {
        let body = build_body(&test_config());
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are terse.");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Why is the sky blue?");
        assert_eq!(body["generationConfig"]["temperature"], 0.5);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_no_system_instruction_when_empty() {
        let mut config = test_config();
        config.system_prompt.clear();
        assert!(build_body(&config).get("systemInstruction").is_none());
    }

    #[test]
    fn test_urls() {
        let base = "https://generativelanguage.googleapis.com";
        let streaming = build_request(base, &test_config(), true);
        assert_eq!(
            streaming.url,
            "https://generativelanguage.googleapis.com/v1beta/models/model-x:streamGenerateContent?alt=sse"
        );
        assert_eq!(streaming.header("x-goog-api-key"), Some("sk-test-1234567890"));

        let oneshot = build_request(base, &test_config(), false);
        assert!(oneshot.url.ends_with("/v1beta/models/model-x:generateContent"));
    }

    #[test]
    fn test_model_id_is_one_path_segment() {
        let base = "https://generativelanguage.googleapis.com";
        let mut config = test_config();
        config.model = "tuned/v2?x#y".into();
        assert_eq!(
            build_request(base, &config, false).url,
            "https://generativelanguage.googleapis.com/v1beta/models/tuned%2Fv2%3Fx%23y:generateContent"
        );

        config.model = "models/gemini-2.0-flash".into();
        assert_eq!(
            build_request(base, &config, true).url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn test_map_record() {
        let rec = json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hello"}]}}]});
        assert_eq!(map_record(&rec), Some(StreamChunk::text("Hello")));

        let empty = json!({"candidates": [{"content": {"parts": [{"text": ""}]}, "finishReason": "STOP"}]});
        assert_eq!(map_record(&empty), None);
        assert_eq!(map_record(&json!({"usageMetadata": {"promptTokenCount": 3}})), None);
    }

    #[test]
    fn test_completion_text() {
        let body = json!({"candidates": [{"content": {"parts": [{"text": "Improved"}]}}]});
        assert_eq!(completion_text(&body).as_deref(), Some("Improved"));
    }
}
