//! Provider adapters: backend-specific request building and record mapping.
//!
//! Each dialect module turns a provider-agnostic [`AdapterConfig`] into an
//! [`HttpRequest`] and maps the backend's streamed JSON records onto
//! canonical [`StreamChunk`]s. The engine never opens sockets itself; a
//! [`Transport`](crate::transport::Transport) sends what is built here.
//!
//! ## Relays
//!
//! ```text
//! build_request(provider, config)
//!        │
//!        ├── endpoint host official for provider? ──► native dialect
//!        │                                            openai / anthropic / gemini
//!        └── any other endpoint ─────────────────────► OpenAI-compatible
//! ```
//!
//! Third-party relays that front Claude or Gemini models almost always speak
//! the OpenAI chat-completions dialect, so a custom endpoint outside the
//! provider's official hosts is treated as one.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod sse;

use crate::stream::StreamChunk;
use crate::types::{Effort, Provider};
use reqwest::Url;
use serde_json::Value;
use std::fmt;

/// Generated text of a non-streaming response in `dialect`.
pub fn extract_completion_text(dialect: Dialect, body: &Value) -> Option<String> {
    dialect.completion_text(body)
}

/// Wire protocol spoken by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    OpenAi,
    Claude,
    Gemini,
}

impl Dialect {
    /// The native dialect of a provider's official API.
    pub fn native(provider: Provider) -> Self {
        match provider {
            Provider::OpenAi => Dialect::OpenAi,
            Provider::Claude => Dialect::Claude,
            Provider::Gemini => Dialect::Gemini,
        }
    }

    /// Map one parsed stream record to a canonical chunk, if it carries one.
    pub fn map_record(&self, record: &Value) -> Option<StreamChunk> {
        match self {
            Dialect::OpenAi => openai::map_record(record),
            Dialect::Claude => anthropic::map_record(record),
            Dialect::Gemini => gemini::map_record(record),
        }
    }

    /// Extract the generated text from a non-streaming response body.
    pub fn completion_text(&self, body: &Value) -> Option<String> {
        match self {
            Dialect::OpenAi => openai::completion_text(body),
            Dialect::Claude => anthropic::completion_text(body),
            Dialect::Gemini => gemini::completion_text(body),
        }
    }
}

/// Everything a dialect needs to build one chat request.
#[derive(Clone, PartialEq)]
pub struct AdapterConfig {
    pub api_key: String,
    /// Custom endpoint. `None` uses the provider's official API.
    pub endpoint: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub effort: Effort,
}

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("api_key", &redact(&self.api_key))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("system_prompt_len", &self.system_prompt.len())
            .field("user_prompt_len", &self.user_prompt.len())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("effort", &self.effort)
            .finish()
    }
}

/// HTTP method of a built request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully built backend request, ready for a transport.
#[derive(Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: vec![("content-type".into(), "application/json".into())],
            body: Some(body),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header with `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

const SECRET_HEADERS: [&str; 3] = ["authorization", "x-api-key", "x-goog-api-key"];

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, String)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let shown = if SECRET_HEADERS.iter().any(|s| k.eq_ignore_ascii_case(s)) {
                    redact(v)
                } else {
                    v.clone()
                };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Show only a short prefix of a secret.
pub(crate) fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(6).collect();
    if secret.chars().count() > 6 {
        format!("{}***", prefix)
    } else {
        "***".to_string()
    }
}

/// Official API hosts per provider. Any other host is a relay.
pub fn official_hosts(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::OpenAi => &["api.openai.com"],
        Provider::Claude => &["api.anthropic.com"],
        Provider::Gemini => &["generativelanguage.googleapis.com"],
    }
}

/// Default base URL of a provider's official API.
pub fn default_base_url(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "https://api.openai.com",
        Provider::Claude => "https://api.anthropic.com",
        Provider::Gemini => "https://generativelanguage.googleapis.com",
    }
}

/// Treat blank endpoints as absent.
pub(crate) fn custom_endpoint(endpoint: Option<&str>) -> Option<&str> {
    endpoint.map(str::trim).filter(|e| !e.is_empty())
}

/// Whether `endpoint` points somewhere other than `provider`'s official API.
///
/// No endpoint means the official API. An endpoint that does not parse as a
/// URL is a relay.
pub fn is_relay(provider: Provider, endpoint: Option<&str>) -> bool {
    let Some(endpoint) = custom_endpoint(endpoint) else {
        return false;
    };
    match Url::parse(endpoint) {
        Ok(url) => match url.host_str() {
            Some(host) => !official_hosts(provider)
                .iter()
                .any(|h| h.eq_ignore_ascii_case(host)),
            None => true,
        },
        Err(_) => true,
    }
}

/// Dialect used for both the request and the response stream.
pub fn resolve_stream_format(provider: Provider, endpoint: Option<&str>) -> Dialect {
    if is_relay(provider, endpoint) {
        Dialect::OpenAi
    } else {
        Dialect::native(provider)
    }
}

/// Strip known API path suffixes so dialects can append their own paths.
///
/// e.g. `https://relay.example.com/v1/` -> `https://relay.example.com`
pub fn normalize_base_url(url: &str) -> String {
    let mut trimmed = url.trim().trim_end_matches('/');
    // longest first
    for suffix in [
        "/v1/chat/completions",
        "/chat/completions",
        "/v1/messages",
        "/v1beta",
        "/v1",
    ] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            trimmed = stripped.trim_end_matches('/');
            break;
        }
    }
    trimmed.to_string()
}

/// Base URL a request for `provider` should go to.
pub(crate) fn base_url(provider: Provider, endpoint: Option<&str>) -> String {
    match custom_endpoint(endpoint) {
        Some(e) => normalize_base_url(e),
        None => default_base_url(provider).to_string(),
    }
}

/// Build the streaming chat request for `provider`.
///
/// Single entry point for request building: relays get an OpenAI-compatible
/// request whatever the nominal provider.
pub fn build_request(provider: Provider, config: &AdapterConfig) -> HttpRequest {
    build(provider, config, true)
}

/// Build a non-streaming request, used for one-shot round trips.
pub fn build_completion_request(provider: Provider, config: &AdapterConfig) -> HttpRequest {
    build(provider, config, false)
}

fn build(provider: Provider, config: &AdapterConfig, stream: bool) -> HttpRequest {
    let endpoint = config.endpoint.as_deref();
    let base = base_url(provider, endpoint);
    match resolve_stream_format(provider, endpoint) {
        Dialect::OpenAi => openai::build_request(&base, config, stream),
        Dialect::Claude => anthropic::build_request(&base, config, stream),
        Dialect::Gemini => gemini::build_request(&base, config, stream),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AdapterConfig {
    AdapterConfig {
        api_key: "sk-test-1234567890".into(),
        endpoint: None,
        model: "model-x".into(),
        system_prompt: "You are terse.".into(),
        user_prompt: "Why is the sky blue?".into(),
        temperature: 0.5,
        max_tokens: 1024,
        effort: Effort::Medium,
    }
}
