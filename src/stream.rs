//! Canonical stream events and the normalizer that produces them.
//!
//! Whatever the backend, callers see one shape:
//! `{"type": "text" | "thinking" | "error" | "done", "content": ...}`.
//! Every stream ends with exactly one `done`.

use crate::backend::sse::SseDecoder;
use crate::backend::Dialect;
use crate::transport::ByteStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Kind of a canonical chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Text,
    Thinking,
    Error,
    Done,
}

/// One normalized stream event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub content: String,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Text,
            content: content.into(),
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Thinking,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Error,
            content: content.into(),
        }
    }

    /// The terminator. Always empty.
    pub fn done() -> Self {
        Self {
            kind: ChunkKind::Done,
            content: String::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.kind == ChunkKind::Done
    }
}

/// Why a normalized stream stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The body ended or sent its `[DONE]` sentinel.
    Completed,
    /// The cancellation token fired. Chunks already delivered stand.
    Cancelled,
    /// The transport failed mid-stream.
    Failed(String),
}

/// Drive `body` to its end, delivering canonical chunks to `on_chunk`.
///
/// A synthetic `done` is always delivered last. A transport error delivers
/// `error` before it; cancellation stops reading immediately and delivers
/// only `done`.
pub async fn normalize_stream<F>(
    mut body: ByteStream,
    dialect: Dialect,
    cancel: &CancellationToken,
    mut on_chunk: F,
) -> StreamEnd
where
    F: FnMut(StreamChunk),
{
    let mut decoder = SseDecoder::new();

    let end = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break StreamEnd::Cancelled,
            next = body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                for record in decoder.decode(&bytes) {
                    if let Some(chunk) = dialect.map_record(&record) {
                        on_chunk(chunk);
                    }
                }
                if decoder.is_done() {
                    break StreamEnd::Completed;
                }
            }
            Some(Err(e)) => break StreamEnd::Failed(e.to_string()),
            None => {
                for record in decoder.flush() {
                    if let Some(chunk) = dialect.map_record(&record) {
                        on_chunk(chunk);
                    }
                }
                break StreamEnd::Completed;
            }
        }
    };

    if let StreamEnd::Failed(message) = &end {
        on_chunk(StreamChunk::error(message.clone()));
    }
    on_chunk(StreamChunk::done());
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;
    use bytes::Bytes;
    use futures::stream;
    use std::time::Duration;

    fn body(parts: Vec<&'static str>) -> ByteStream {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p.as_bytes())))).boxed()
    }

    async fn collect(body: ByteStream, dialect: Dialect) -> (Vec<StreamChunk>, StreamEnd) {
        let mut chunks = Vec::new();
        let end = normalize_stream(body, dialect, &CancellationToken::new(), |c| chunks.push(c)).await;
        (chunks, end)
    }

    #[test]
    fn test_chunk_wire_shape() {
        let json = serde_json::to_value(StreamChunk::thinking("hm")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "thinking", "content": "hm"}));
        let done: StreamChunk = serde_json::from_str(r#"{"type":"done","content":""}"#).unwrap();
        assert!(done.is_done());
    }

    #[tokio::test]
    async fn test_openai_stream_split_records() {
        let parts = vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        ];
        let (chunks, end) = collect(body(parts), Dialect::OpenAi).await;
        assert_eq!(end, StreamEnd::Completed);
        assert_eq!(
            chunks,
            vec![StreamChunk::text("Hel"), StreamChunk::text("lo"), StreamChunk::done()]
        );
    }

    #[tokio::test]
    async fn test_claude_thinking_then_text() {
        let parts = vec![
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"plan\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"answer\"}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ];
        let (chunks, _) = collect(body(parts), Dialect::Claude).await;
        assert_eq!(
            chunks,
            vec![
                StreamChunk::thinking("plan"),
                StreamChunk::text("answer"),
                StreamChunk::done()
            ]
        );
    }

    #[tokio::test]
    async fn test_trailing_record_parsed_on_flush() {
        let parts = vec!["data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"tail\"}]}}]}"];
        let (chunks, end) = collect(body(parts), Dialect::Gemini).await;
        assert_eq!(end, StreamEnd::Completed);
        assert_eq!(chunks, vec![StreamChunk::text("tail"), StreamChunk::done()]);
    }

    #[tokio::test]
    async fn test_transport_error_emits_error_then_done() {
        let parts: Vec<crate::error::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n")),
            Err(FlowError::Transport("connection reset".into())),
        ];
        let (chunks, end) = collect(stream::iter(parts).boxed(), Dialect::OpenAi).await;
        assert!(matches!(end, StreamEnd::Failed(ref m) if m.contains("connection reset")));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], StreamChunk::text("par"));
        assert_eq!(chunks[1].kind, ChunkKind::Error);
        assert!(chunks[2].is_done());
    }

    #[tokio::test]
    async fn test_cancellation_emits_done_only() {
        let first = stream::iter(vec![Ok(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
        ))]);
        let hanging: ByteStream = first.chain(stream::pending()).boxed();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let mut chunks = Vec::new();
        let end = normalize_stream(hanging, Dialect::OpenAi, &cancel, |c| chunks.push(c)).await;
        assert_eq!(end, StreamEnd::Cancelled);
        assert_eq!(chunks, vec![StreamChunk::text("partial"), StreamChunk::done()]);
    }

    #[tokio::test]
    async fn test_empty_body_still_done() {
        let (chunks, end) = collect(body(vec![]), Dialect::Claude).await;
        assert_eq!(end, StreamEnd::Completed);
        assert_eq!(chunks, vec![StreamChunk::done()]);
    }
}
