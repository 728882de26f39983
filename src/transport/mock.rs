//! Scripted transport for tests without a live backend.
//!
//! # Example
//!
//! ```
//! use llm_flow::transport::{MockResponse, MockTransport};
//! use serde_json::json;
//!
//! let mock = MockTransport::fixed(MockResponse::sse(&[
//!     json!({"choices": [{"delta": {"content": "Hello"}}]}),
//! ]));
//! assert!(mock.requests().is_empty());
//! ```

use super::{ByteStream, HttpResponse, Transport};
use crate::backend::HttpRequest;
use crate::error::{FlowError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum Tail {
    End,
    Error(String),
    Hang,
}

/// One scripted response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    chunks: Vec<Bytes>,
    chunk_delay: Option<Duration>,
    tail: Tail,
}

impl MockResponse {
    /// A response whose body arrives as the given chunks, in order.
    pub fn chunks<I, S>(status: u16, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status,
            chunks: chunks.into_iter().map(|c| Bytes::from(Into::<String>::into(c))).collect(),
            chunk_delay: None,
            tail: Tail::End,
        }
    }

    /// A single-chunk body.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::chunks(status, [body])
    }

    /// 200 with a JSON body.
    pub fn json(body: &Value) -> Self {
        Self::status(200, body.to_string())
    }

    /// 200 with one SSE `data:` line per record, closed by `[DONE]`.
    pub fn sse(records: &[Value]) -> Self {
        let mut lines: Vec<String> = records.iter().map(|r| format!("data: {}\n\n", r)).collect();
        lines.push("data: [DONE]\n\n".to_string());
        Self::chunks(200, lines)
    }

    /// Sleep before each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Fail with a transport error after the scripted chunks.
    pub fn then_error(mut self, message: impl Into<String>) -> Self {
        self.tail = Tail::Error(message.into());
        self
    }

    /// Never finish after the scripted chunks.
    pub fn then_hang(mut self) -> Self {
        self.tail = Tail::Hang;
        self
    }

    fn into_response(self) -> HttpResponse {
        let delay = self.chunk_delay;
        let head = stream::iter(self.chunks).then(move |chunk| async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            Ok::<Bytes, FlowError>(chunk)
        });
        let body: ByteStream = match self.tail {
            Tail::End => head.boxed(),
            Tail::Error(message) => head
                .chain(stream::once(async move {
                    Err::<Bytes, FlowError>(FlowError::Transport(message))
                }))
                .boxed(),
            Tail::Hang => head.chain(stream::pending::<Result<Bytes>>()).boxed(),
        };
        HttpResponse::new(self.status, body)
    }
}

type Responder = dyn Fn(&HttpRequest) -> Result<MockResponse> + Send + Sync;

/// A [`Transport`] that answers from a responder closure and records every
/// request it is asked to send.
pub struct MockTransport {
    responder: Box<Responder>,
    delay: Option<Duration>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<MockResponse> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with the same response.
    pub fn fixed(response: MockResponse) -> Self {
        Self::new(move |_| Ok(response.clone()))
    }

    /// Fail every request with a transport error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move |_| Err(FlowError::Transport(message.clone())))
    }

    /// Sleep before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests sent so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("delay", &self.delay)
            .field("requests", &self.requests().len())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        match self.requests.lock() {
            Ok(mut r) => r.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        (self.responder)(request).map(MockResponse::into_response)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fixed_records_requests() {
        let mock = MockTransport::fixed(MockResponse::status(200, "hello"));
        let req = HttpRequest::get("http://unused/a");
        let resp = mock.send(&req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.text().await.unwrap(), "hello");
        mock.send(&HttpRequest::get("http://unused/b")).await.unwrap();

        let urls: Vec<String> = mock.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["http://unused/a", "http://unused/b"]);
    }

    #[tokio::test]
    async fn test_responder_sees_request() {
        let mock = MockTransport::new(|req| {
            let code = if req.url.ends_with("/ok") { 200 } else { 404 };
            Ok(MockResponse::status(code, ""))
        });
        assert_eq!(mock.send(&HttpRequest::get("http://x/ok")).await.unwrap().status, 200);
        assert_eq!(mock.send(&HttpRequest::get("http://x/no")).await.unwrap().status, 404);
    }

    #[tokio::test]
    async fn test_sse_body_shape() {
        let mock = MockTransport::fixed(MockResponse::sse(&[json!({"n": 1})]));
        let text = mock
            .send(&HttpRequest::get("http://x"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(text, "data: {\"n\":1}\n\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_then_error_surfaces_in_body() {
        let mock = MockTransport::fixed(MockResponse::status(200, "part").then_error("reset"));
        let resp = mock.send(&HttpRequest::get("http://x")).await.unwrap();
        let err = resp.bytes().await.unwrap_err();
        assert!(matches!(err, FlowError::Transport(ref m) if m == "reset"));
    }

    #[tokio::test]
    async fn test_unreachable() {
        let mock = MockTransport::unreachable("connection refused");
        assert!(mock.send(&HttpRequest::get("http://x")).await.is_err());
        assert_eq!(mock.requests().len(), 1);
    }
}
