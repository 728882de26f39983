//! Provider-agnostic chat gateway.
//!
//! One call of [`Gateway::stream_chat`]:
//!
//! ```text
//! acquire slot ─► optimize prompt? ─► build_request ─► transport.send
//!                                                          │
//!         on_chunk ◄── normalize_stream(dialect) ◄─────────┘
//! ```
//!
//! Raw payloads from an untrusted surface go through
//! [`validate_chat_payload`] first; nothing is sent for a rejected payload.

use crate::backend::{
    build_completion_request, build_request, custom_endpoint, extract_completion_text, is_relay,
    redact, resolve_stream_format, AdapterConfig, HttpRequest,
};
use crate::error::{FlowError, Result};
use crate::exec_ctx::ExecCtx;
use crate::stream::{normalize_stream, ChunkKind, StreamChunk, StreamEnd};
use crate::transport::{HttpResponse, Transport};
use crate::types::{Effort, Provider};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Raw payloads above this size are rejected before parsing.
pub const MAX_BODY_BYTES: usize = 256 * 1024;
pub const MAX_MODEL_CHARS: usize = 200;
pub const MAX_API_KEY_CHARS: usize = 1024;
pub const MAX_ENDPOINT_CHARS: usize = 2048;
pub const MAX_SYSTEM_PROMPT_BYTES: usize = 32 * 1024;
pub const MAX_USER_PROMPT_BYTES: usize = 128 * 1024;
pub const MAX_OUTPUT_TOKENS: u64 = 131_072;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

const OPTIMIZER_INSTRUCTION: &str = "You are a prompt engineer. Rewrite the user's prompt so it is \
clear, specific and unambiguous. Keep its intent, its language and any output format it asks for. \
Reply with the rewritten prompt only, without preamble or commentary.";

/// Canonical request to the gateway. [`ChatRequest::validate`] bound-checks
/// every field; [`Gateway::stream_chat`] refuses a request that fails it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(default)]
    pub effort: Effort,
    #[serde(default)]
    pub optimize_prompt: bool,
}

impl ChatRequest {
    /// A request with default sampling settings.
    pub fn new(
        provider: Provider,
        model: impl Into<String>,
        api_key: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: api_key.into(),
            endpoint: None,
            system_prompt: String::new(),
            user_prompt: user_prompt.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            effort: Effort::default(),
            optimize_prompt: false,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = system.into();
        self
    }

    /// Check every field against the wire bounds, stopping at the first
    /// offending one.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(FlowError::invalid("model is required"));
        }
        check_chars("model", &self.model, MAX_MODEL_CHARS)?;

        if self.api_key.trim().is_empty() {
            return Err(FlowError::invalid("apiKey is required"));
        }
        check_chars("apiKey", &self.api_key, MAX_API_KEY_CHARS)?;

        if let Some(endpoint) = custom_endpoint(self.endpoint.as_deref()) {
            check_endpoint(endpoint)?;
        }

        check_bytes("systemPrompt", &self.system_prompt, MAX_SYSTEM_PROMPT_BYTES)?;

        if self.user_prompt.trim().is_empty() {
            return Err(FlowError::invalid("userPrompt is required"));
        }
        check_bytes("userPrompt", &self.user_prompt, MAX_USER_PROMPT_BYTES)?;

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(FlowError::invalid("temperature must be a number between 0 and 2"));
        }
        if !(1..=MAX_OUTPUT_TOKENS).contains(&u64::from(self.max_tokens)) {
            return Err(FlowError::invalid(format!(
                "maxTokens must be an integer between 1 and {}",
                MAX_OUTPUT_TOKENS
            )));
        }
        Ok(())
    }

    fn adapter_config(&self, user_prompt: String) -> AdapterConfig {
        AdapterConfig {
            api_key: self.api_key.clone(),
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            user_prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            effort: self.effort,
        }
    }
}

impl fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatRequest")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("endpoint", &self.endpoint)
            .field("system_prompt_len", &self.system_prompt.len())
            .field("user_prompt_len", &self.user_prompt.len())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("effort", &self.effort)
            .field("optimize_prompt", &self.optimize_prompt)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn optional<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    obj.get(field).filter(|v| !v.is_null())
}

fn optional_str<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<Option<&'a str>> {
    match optional(obj, field) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(FlowError::invalid(format!("{} must be a string", field))),
    }
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    match optional_str(obj, field)? {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(FlowError::invalid(format!("{} is required", field))),
    }
}

fn check_chars(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(FlowError::invalid(format!(
            "{} exceeds {} characters",
            field, max
        )));
    }
    Ok(())
}

fn check_bytes(field: &str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(FlowError::invalid(format!("{} exceeds {} bytes", field, max)));
    }
    Ok(())
}

fn check_endpoint(endpoint: &str) -> Result<()> {
    check_chars("endpoint", endpoint, MAX_ENDPOINT_CHARS)?;
    let url = Url::parse(endpoint)
        .map_err(|_| FlowError::invalid("endpoint must be an absolute http(s) URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FlowError::invalid("endpoint scheme must be http or https"));
    }
    Ok(())
}

/// Parse and bound-check a raw chat payload.
///
/// Oversized bodies fail with status 413 before parsing; every other problem
/// fails with 400 on the first offending field.
pub fn validate_chat_payload(raw: &[u8]) -> Result<ChatRequest> {
    if raw.len() > MAX_BODY_BYTES {
        return Err(FlowError::Validation {
            status: 413,
            message: format!("request body exceeds {} bytes", MAX_BODY_BYTES),
        });
    }

    let value: Value = serde_json::from_slice(raw)
        .map_err(|_| FlowError::invalid("request body is not valid JSON"))?;
    let obj = value
        .as_object()
        .ok_or_else(|| FlowError::invalid("request body must be a JSON object"))?;

    let provider = required_str(obj, "provider")?;
    let provider = Provider::parse(provider)
        .ok_or_else(|| FlowError::invalid("provider must be one of openai, claude, gemini"))?;

    let model = required_str(obj, "model")?;
    let api_key = required_str(obj, "apiKey")?;
    let endpoint = optional_str(obj, "endpoint")?
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string);
    let system_prompt = optional_str(obj, "systemPrompt")?.unwrap_or_default();
    let user_prompt = required_str(obj, "userPrompt")?;

    let temperature = match optional(obj, "temperature") {
        None => DEFAULT_TEMPERATURE,
        Some(v) => v
            .as_f64()
            .ok_or_else(|| FlowError::invalid("temperature must be a number between 0 and 2"))?,
    };

    let max_tokens = match optional(obj, "maxTokens") {
        None => DEFAULT_MAX_TOKENS,
        Some(v) => v
            .as_u64()
            .filter(|n| *n <= MAX_OUTPUT_TOKENS)
            .map(|n| n as u32)
            .ok_or_else(|| {
                FlowError::invalid(format!(
                    "maxTokens must be an integer between 1 and {}",
                    MAX_OUTPUT_TOKENS
                ))
            })?,
    };

    let effort = match optional_str(obj, "effort")? {
        None => Effort::default(),
        Some(e) => Effort::parse(e)
            .ok_or_else(|| FlowError::invalid("effort must be one of low, medium, high, max"))?,
    };

    let optimize_prompt = match optional(obj, "optimizePrompt") {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(FlowError::invalid("optimizePrompt must be a boolean")),
    };

    let request = ChatRequest {
        provider,
        model: model.to_string(),
        api_key: api_key.to_string(),
        endpoint,
        system_prompt: system_prompt.to_string(),
        user_prompt: user_prompt.to_string(),
        temperature,
        max_tokens,
        effort,
        optimize_prompt,
    };
    request.validate()?;
    Ok(request)
}

// ---------------------------------------------------------------------------
// Prompt optimization
// ---------------------------------------------------------------------------

/// Model used for the rewrite round trip. Relays may not host the cheap
/// models, so they reuse the request's own model.
pub fn optimizer_model(provider: Provider, endpoint: Option<&str>, model: &str) -> String {
    if is_relay(provider, endpoint) {
        return model.to_string();
    }
    match provider {
        Provider::OpenAi => "gpt-4o-mini",
        Provider::Claude => "claude-3-5-haiku-latest",
        Provider::Gemini => "gemini-2.0-flash",
    }
    .to_string()
}

async fn optimize_once(transport: &dyn Transport, request: &ChatRequest) -> Result<String> {
    let endpoint = custom_endpoint(request.endpoint.as_deref());
    let config = AdapterConfig {
        model: optimizer_model(request.provider, endpoint, &request.model),
        system_prompt: OPTIMIZER_INSTRUCTION.to_string(),
        temperature: 0.3,
        max_tokens: 2048,
        effort: Effort::Low,
        ..request.adapter_config(request.user_prompt.clone())
    };

    let http = build_completion_request(request.provider, &config);
    let response = transport.send(&http).await?;
    if !response.is_success() {
        return Err(response.into_error().await);
    }
    let body = response.json().await?;

    let dialect = resolve_stream_format(request.provider, endpoint);
    extract_completion_text(dialect, &body)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| FlowError::Other("optimizer returned no text".into()))
}

/// Rewrite the user prompt with a cheap model when the request asks for it.
///
/// Never fails: a timeout, upstream error, empty answer or cancellation all
/// return the original prompt.
pub async fn maybe_optimize_prompt(
    transport: &dyn Transport,
    request: &ChatRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> String {
    if !request.optimize_prompt {
        return request.user_prompt.clone();
    }

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FlowError::Cancelled),
        r = tokio::time::timeout(timeout, optimize_once(transport, request)) => {
            r.unwrap_or(Err(FlowError::Timeout(timeout)))
        }
    };

    match outcome {
        Ok(optimized) => {
            debug!(
                provider = %request.provider,
                original_chars = request.user_prompt.chars().count(),
                optimized_chars = optimized.chars().count(),
                "prompt optimized"
            );
            optimized
        }
        Err(e) => {
            warn!(provider = %request.provider, error = %e, "prompt optimization failed, using original prompt");
            request.user_prompt.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SlotTable {
    active: HashMap<String, (u64, CancellationToken)>,
}

/// At most one active stream per slot id.
///
/// Acquiring an occupied slot cancels the stream holding it.
#[derive(Debug, Clone, Default)]
pub struct StreamSlots {
    table: Arc<Mutex<SlotTable>>,
    generation: Arc<AtomicU64>,
}

impl StreamSlots {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `slot` with a child of `parent`, cancelling any previous holder.
    pub fn acquire(&self, slot: &str, parent: &CancellationToken) -> SlotGuard {
        let token = parent.child_token();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .lock()
            .active
            .insert(slot.to_string(), (generation, token.clone()));
        if let Some((_, old)) = previous {
            debug!(slot, "superseding active stream");
            old.cancel();
        }
        SlotGuard {
            slots: self.clone(),
            slot: slot.to_string(),
            generation,
            token,
        }
    }

    /// Cancel the stream in `slot`. Returns whether one was active.
    pub fn cancel(&self, slot: &str) -> bool {
        match self.lock().active.remove(slot) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, slot: &str) -> bool {
        self.lock().active.contains_key(slot)
    }

    pub fn active(&self) -> usize {
        self.lock().active.len()
    }
}

/// Holds a slot until dropped.
#[derive(Debug)]
pub struct SlotGuard {
    slots: StreamSlots,
    slot: String,
    generation: u64,
    token: CancellationToken,
}

impl SlotGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut table = self.slots.lock();
        // a newer stream may own the slot by now
        if table.active.get(&self.slot).map(|(g, _)| *g) == Some(self.generation) {
            table.active.remove(&self.slot);
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Terminal status of one streamed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Everything a caller needs after a stream settles.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    pub status: StreamStatus,
    /// Concatenated text chunks. Partial when cancelled or failed.
    pub text: String,
    pub thinking: String,
    pub error: Option<String>,
    /// The rewritten prompt, when the optimization pass changed it.
    pub optimized_prompt: Option<String>,
}

impl StreamOutcome {
    fn new() -> Self {
        Self {
            status: StreamStatus::Completed,
            text: String::new(),
            thinking: String::new(),
            error: None,
            optimized_prompt: None,
        }
    }

    fn absorb(&mut self, chunk: &StreamChunk) {
        match chunk.kind {
            ChunkKind::Text => self.text.push_str(&chunk.content),
            ChunkKind::Thinking => self.thinking.push_str(&chunk.content),
            ChunkKind::Error => self.error = Some(chunk.content.clone()),
            ChunkKind::Done => {}
        }
    }
}

/// Dispatches chat requests and normalizes their streams.
#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn Transport>,
    slots: StreamSlots,
    optimize_timeout: Duration,
    cancel: CancellationToken,
}

impl Gateway {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            slots: StreamSlots::new(),
            optimize_timeout: Duration::from_secs(20),
            cancel: CancellationToken::new(),
        }
    }

    /// A gateway sharing the context's transport and cancellation token.
    pub fn from_ctx(ctx: &ExecCtx) -> Self {
        Self::new(ctx.transport.clone())
            .with_optimize_timeout(ctx.config.optimize_timeout())
            .with_cancel_token(ctx.cancel.clone())
    }

    pub fn with_optimize_timeout(mut self, timeout: Duration) -> Self {
        self.optimize_timeout = timeout;
        self
    }

    /// Streams started afterwards are children of `token`.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn slots(&self) -> &StreamSlots {
        &self.slots
    }

    /// Stream one chat exchange in `slot`, delivering canonical chunks to
    /// `on_chunk`. The last chunk delivered is always `done`.
    ///
    /// A request failing [`ChatRequest::validate`] ends `Failed` with nothing
    /// sent.
    pub async fn stream_chat<F>(&self, slot: &str, request: &ChatRequest, on_chunk: F) -> StreamOutcome
    where
        F: FnMut(&StreamChunk),
    {
        self.stream_chat_under(slot, request, &self.cancel, on_chunk).await
    }

    /// [`stream_chat`](Self::stream_chat) with the stream's token derived from
    /// `parent` instead of the gateway's own token.
    pub async fn stream_chat_under<F>(
        &self,
        slot: &str,
        request: &ChatRequest,
        parent: &CancellationToken,
        mut on_chunk: F,
    ) -> StreamOutcome
    where
        F: FnMut(&StreamChunk),
    {
        let mut outcome = StreamOutcome::new();
        let mut deliver = |outcome: &mut StreamOutcome, chunk: StreamChunk| {
            outcome.absorb(&chunk);
            on_chunk(&chunk);
        };

        // a rejected request touches neither the slot nor the transport
        if let Err(e) = request.validate() {
            debug!(slot, error = %e, "request rejected");
            outcome.status = StreamStatus::Failed;
            deliver(&mut outcome, StreamChunk::error(e.to_string()));
            deliver(&mut outcome, StreamChunk::done());
            return outcome;
        }

        let guard = self.slots.acquire(slot, parent);
        let token = guard.token().clone();

        let prompt =
            maybe_optimize_prompt(self.transport.as_ref(), request, self.optimize_timeout, &token).await;
        if prompt != request.user_prompt {
            outcome.optimized_prompt = Some(prompt.clone());
        }
        if token.is_cancelled() {
            outcome.status = StreamStatus::Cancelled;
            deliver(&mut outcome, StreamChunk::done());
            return outcome;
        }

        let endpoint = custom_endpoint(request.endpoint.as_deref());
        let dialect = resolve_stream_format(request.provider, endpoint);
        let http = build_request(request.provider, &request.adapter_config(prompt));
        debug!(slot, provider = %request.provider, model = %request.model, ?dialect, url = %http.url, "dispatching stream");

        let response = match self.open(&http, &token).await {
            Ok(r) => r,
            Err(FlowError::Cancelled) => {
                outcome.status = StreamStatus::Cancelled;
                deliver(&mut outcome, StreamChunk::done());
                return outcome;
            }
            Err(e) => {
                outcome.status = StreamStatus::Failed;
                deliver(&mut outcome, StreamChunk::error(e.to_string()));
                deliver(&mut outcome, StreamChunk::done());
                return outcome;
            }
        };

        let end = normalize_stream(response.body, dialect, &token, |chunk| deliver(&mut outcome, chunk)).await;
        outcome.status = match end {
            StreamEnd::Completed => StreamStatus::Completed,
            StreamEnd::Cancelled => StreamStatus::Cancelled,
            StreamEnd::Failed(_) => StreamStatus::Failed,
        };
        outcome
    }

    /// Send `http`, turning a non-success status into [`FlowError::Http`].
    async fn open(&self, http: &HttpRequest, token: &CancellationToken) -> Result<HttpResponse> {
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FlowError::Cancelled),
            r = self.transport.send(http) => r?,
        };
        if !response.is_success() {
            return Err(response.into_error().await);
        }
        Ok(response)
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("transport", &self.transport.name())
            .field("active_slots", &self.slots.active())
            .field("optimize_timeout", &self.optimize_timeout)
            .finish()
    }
}
