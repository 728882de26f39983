//! Server-Sent Events decoder shared by every dialect.
//!
//! Buffers raw bytes across reads so records (and multi-byte characters)
//! split at chunk boundaries are reassembled before parsing.

use serde_json::Value;

const DONE_SENTINEL: &str = "[DONE]";

/// Incremental `data:` line decoder.
///
/// Blank keep-alive lines and `event:` / `id:` / `:` comment lines are
/// skipped. `data: [DONE]` ends the stream; anything after it is ignored.
/// Payloads that are not valid JSON are dropped.
///
/// # Example
///
/// ```
/// use llm_flow::backend::sse::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// let values = decoder.decode(b"data: {\"n\":1}\n\ndata: [DONE]\n\n");
/// assert_eq!(values.len(), 1);
/// assert!(decoder.is_done());
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

enum Line {
    Skip,
    Done,
    Record(Value),
}

fn parse_line(raw: &[u8]) -> Line {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() {
        return Line::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return Line::Skip;
    };
    let data = data.trim();
    if data == DONE_SENTINEL {
        return Line::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(value) => Line::Record(value),
        Err(e) => {
            tracing::trace!(error = %e, len = data.len(), "dropping malformed stream record");
            Line::Skip
        }
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes and return every complete record they finish.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Value> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut values = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            match parse_line(&line) {
                Line::Skip => {}
                Line::Record(v) => values.push(v),
                Line::Done => {
                    self.done = true;
                    self.buffer.clear();
                    break;
                }
            }
        }
        values
    }

    /// Give whatever is left in the buffer one last parse attempt.
    pub fn flush(&mut self) -> Vec<Value> {
        let remaining = std::mem::take(&mut self.buffer);
        if self.done || remaining.is_empty() {
            return Vec::new();
        }

        let mut values = Vec::new();
        for line in remaining.split(|b| *b == b'\n') {
            match parse_line(line) {
                Line::Skip => {}
                Line::Record(v) => values.push(v),
                Line::Done => {
                    self.done = true;
                    break;
                }
            }
        }
        values
    }
}
