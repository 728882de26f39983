//! Model discovery against a provider's listing endpoint.

use crate::backend::{anthropic::ANTHROPIC_VERSION, base_url, is_relay, HttpRequest};
use crate::error::Result;
use crate::transport::Transport;
use crate::types::Provider;
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

/// Listings are capped at this many ids.
pub const MAX_MODELS: usize = 500;
/// Longer ids are dropped.
pub const MAX_MODEL_ID_CHARS: usize = 200;

/// Result of a listing call. Never an error: failures leave `models` empty
/// and explain themselves in `message`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelListing {
    pub models: Vec<String>,
    pub message: Option<String>,
}

fn listing_request(provider: Provider, credential: &str, endpoint: Option<&str>) -> HttpRequest {
    let base = base_url(provider, endpoint);
    if is_relay(provider, endpoint) {
        return HttpRequest::get(format!("{}/v1/models", base))
            .with_header("Authorization", format!("Bearer {}", credential));
    }
    match provider {
        Provider::OpenAi => HttpRequest::get(format!("{}/v1/models", base))
            .with_header("Authorization", format!("Bearer {}", credential)),
        Provider::Claude => HttpRequest::get(format!("{}/v1/models", base))
            .with_header("x-api-key", credential)
            .with_header("anthropic-version", ANTHROPIC_VERSION),
        Provider::Gemini => HttpRequest::get(format!("{}/v1beta/models", base))
            .with_header("x-goog-api-key", credential),
    }
}

fn entry_id(entry: &Value) -> Option<&str> {
    let raw = match entry {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => obj
            .get("id")
            .and_then(|v| v.as_str())
            .or_else(|| obj.get("name").and_then(|v| v.as_str()))?,
        _ => return None,
    };
    Some(raw.strip_prefix("models/").unwrap_or(raw).trim())
}

/// Extract model ids from `{data: [...]}`, `{models: [...]}` or a bare array.
pub fn parse_model_list(body: &Value) -> Vec<String> {
    let entries = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => match obj
            .get("data")
            .or_else(|| obj.get("models"))
            .and_then(|v| v.as_array())
        {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(entry_id)
        .filter(|id| !id.is_empty() && id.chars().count() <= MAX_MODEL_ID_CHARS)
        .filter(|id| seen.insert(id.to_string()))
        .take(MAX_MODELS)
        .map(str::to_string)
        .collect()
}

async fn fetch(transport: &dyn Transport, request: &HttpRequest) -> Result<Vec<String>> {
    let response = transport.send(request).await?;
    if !response.is_success() {
        return Err(response.into_error().await);
    }
    Ok(parse_model_list(&response.json().await?))
}

/// List the models `credential` can use on `provider` (or its relay).
pub async fn list_models(
    transport: &dyn Transport,
    provider: Provider,
    credential: &str,
    endpoint: Option<&str>,
) -> ModelListing {
    if credential.trim().is_empty() {
        return ModelListing {
            models: Vec::new(),
            message: Some(format!("no credential configured for {}", provider)),
        };
    }

    let request = listing_request(provider, credential, endpoint);
    match fetch(transport, &request).await {
        Ok(models) if models.is_empty() => ModelListing {
            models,
            message: Some("provider returned no models".into()),
        },
        Ok(models) => ModelListing {
            models,
            message: None,
        },
        Err(e) => {
            warn!(%provider, error = %e, "model listing failed");
            ModelListing {
                models: Vec::new(),
                message: Some(format!("could not list models: {}", e)),
            }
        }
    }
}
