//! Line-buffered decoders for streaming provider responses.
//!
//! Network chunks rarely line up with JSON boundaries. [`StreamDecoder`]
//! buffers bytes until a full line arrives and yields one JSON value per
//! complete event. Ollama streams newline-delimited JSON; OpenAI-compatible
//! servers stream server-sent events (`data: {...}` lines ending with
//! `data: [DONE]`).

use serde_json::Value;

/// Wire framing of a streaming response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One JSON object per line.
    Ndjson,
    /// Server-sent events with JSON in `data:` fields.
    Sse,
}

/// Buffered decoder that turns raw chunks into JSON events.
///
/// ```
/// use llm_chains::backend::decode::{Framing, StreamDecoder};
///
/// let mut decoder = StreamDecoder::new(Framing::Ndjson);
/// assert!(decoder.decode(b"{\"response\":").is_empty());
/// let values = decoder.decode(b"\"hello\"}\n");
/// assert_eq!(values[0]["response"], "hello");
/// ```
#[derive(Debug)]
pub struct StreamDecoder {
    framing: Framing,
    buffer: String,
}

impl StreamDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: String::new(),
        }
    }

    /// Feed a chunk and return every event completed by it.
    ///
    /// Lines that are not valid JSON (keep-alives, `event:` fields, noise)
    /// are skipped.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut values = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(value) = self.parse_line(&line) {
                values.push(value);
            }
        }
        values
    }

    /// Parse whatever is left once the stream has ended.
    pub fn flush(&mut self) -> Vec<Value> {
        let rest = std::mem::take(&mut self.buffer);
        rest.lines().filter_map(|l| self.parse_line(l)).collect()
    }

    fn parse_line(&self, line: &str) -> Option<Value> {
        let line = line.trim();
        let payload = match self.framing {
            Framing::Ndjson => line,
            Framing::Sse => line.strip_prefix("data:")?.trim(),
        };
        if payload.is_empty() || payload == "[DONE]" {
            return None;
        }
        serde_json::from_str(payload).ok()
    }
}
