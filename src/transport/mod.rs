//! Outbound HTTP seam.
//!
//! The engine builds [`HttpRequest`]s and interprets response bytes; a
//! [`Transport`] is the only thing that touches the network. The default is
//! [`ReqwestTransport`]; tests use [`MockTransport`].

mod mock;

pub use mock::{MockResponse, MockTransport};

use crate::backend::{HttpRequest, Method};
use crate::error::{FlowError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Response body as a stream of byte chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Upstream error bodies are cut to this many characters.
pub const ERROR_BODY_MAX_CHARS: usize = 512;

/// Status plus a streaming body.
pub struct HttpResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl HttpResponse {
    pub fn new(status: u16, body: ByteStream) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Read the whole body.
    pub async fn bytes(self) -> Result<Vec<u8>> {
        let mut body = self.body;
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json(self) -> Result<Value> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Consume a non-success response into [`FlowError::Http`].
    pub async fn into_error(self) -> FlowError {
        let status = self.status;
        let body = match self.text().await {
            Ok(text) => truncate_chars(text.trim(), ERROR_BODY_MAX_CHARS),
            Err(e) => format!("<unreadable body: {}>", e),
        };
        FlowError::Http { status, body }
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Performs one HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request`. Network failures are [`FlowError::Transport`]; a
    /// non-success status is returned as a normal response.
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Wrap an existing client (cheap to clone, shares its pool).
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// A client whose requests, body included, are bounded by `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FlowError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| FlowError::Transport(e.to_string())))
            .boxed();
        Ok(HttpResponse { status, body })
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn response(status: u16, text: String) -> HttpResponse {
        HttpResponse::new(status, stream::once(async move { Ok(Bytes::from(text)) }).boxed())
    }

    #[tokio::test]
    async fn test_into_error_truncates_body() {
        let err = response(502, "x".repeat(2000)).into_error().await;
        match err {
            FlowError::Http { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.chars().count(), ERROR_BODY_MAX_CHARS);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_json_body() {
        let value = response(200, r#"{"ok":true}"#.into()).json().await.unwrap();
        assert_eq!(value["ok"], true);
        assert!(response(200, "not json".into()).json().await.is_err());
    }

    #[test]
    fn test_success_range() {
        assert!(response(204, String::new()).is_success());
        assert!(!response(301, String::new()).is_success());
        assert!(!response(429, String::new()).is_success());
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
