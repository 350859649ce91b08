//! Incremental event stream decoder
//!
//! Bytes go in, complete events come out. A record is only parsed once its
//! terminating blank line has arrived, so the buffer holds at most one
//! partial record between chunks.
//!
//! ```text
//! chunk ─▶ buffer ─▶ [record][record][partial…]
//!                      │       │
//!                      ▼       ▼
//!                   ServerSentEvent (retry-only records filtered)
//! ```

use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::event::ServerSentEvent;

/// Line-break conventions a stream may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineBreak {
    CrLf,
    Lf,
    Cr,
}

impl LineBreak {
    pub const ALL: [LineBreak; 3] = [LineBreak::CrLf, LineBreak::Lf, LineBreak::Cr];

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            LineBreak::CrLf => b"\r\n",
            LineBreak::Lf => b"\n",
            LineBreak::Cr => b"\r",
        }
    }

    /// Blank line terminating a record
    fn record_terminator(self) -> Vec<u8> {
        self.as_bytes().repeat(2)
    }
}

/// Stateful decoder for one connection attempt
#[derive(Debug, Clone)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
    /// Buffer prefix already known to hold no terminator
    scanned: usize,
    terminators: Vec<Vec<u8>>,
    retry: Option<u64>,
}

impl EventStreamDecoder {
    /// Decoder accepting every line-break convention
    pub fn new() -> Self {
        Self::with_line_breaks(&LineBreak::ALL)
    }

    pub fn with_line_breaks(line_breaks: &[LineBreak]) -> Self {
        let line_breaks = if line_breaks.is_empty() {
            &LineBreak::ALL[..]
        } else {
            line_breaks
        };

        Self {
            buffer: Vec::new(),
            scanned: 0,
            terminators: line_breaks.iter().map(|b| b.record_terminator()).collect(),
            retry: None,
        }
    }

    /// Append a chunk and return the events it completed, retry-only
    /// records excluded.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerSentEvent> {
        self.push_records(chunk)
            .into_iter()
            .filter(|event| !event.is_retry_only())
            .collect()
    }

    /// Like [`push`](Self::push) but keeps retry-only records, so a caller
    /// can apply reconnect updates in stream order.
    pub fn push_records(&mut self, chunk: &[u8]) -> Vec<ServerSentEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, terminator_len)) = self.next_boundary() {
            let record: Vec<u8> = self.buffer.drain(..end + terminator_len).collect();
            self.scanned = 0;
            let text = String::from_utf8_lossy(&record[..end]);

            if let Some(event) = ServerSentEvent::parse_record(&text) {
                if let Some(retry) = event.retry {
                    self.retry = Some(retry);
                }
                events.push(event);
            }
        }

        // a terminator may straddle the next chunk, so back off by one less
        // than the longest terminator
        let longest = self.terminators.iter().map(Vec::len).max().unwrap_or(0);
        self.scanned = self.buffer.len().saturating_sub(longest.saturating_sub(1));

        events
    }

    /// Drop whatever partial record is left. An unterminated record is
    /// never delivered.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() {
            tracing::trace!(bytes = self.buffer.len(), "Discarding unterminated record");
            self.buffer.clear();
        }
        self.scanned = 0;
    }

    /// Latest reconnect delay seen, including from retry-only records
    pub fn retry(&self) -> Option<u64> {
        self.retry
    }

    /// Bytes held back waiting for a record terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Earliest record terminator in the buffer: (offset, length).
    /// On a tie the longer terminator wins so `\r\n\r\n` isn't split.
    fn next_boundary(&self) -> Option<(usize, usize)> {
        let unscanned = &self.buffer[self.scanned..];
        self.terminators
            .iter()
            .filter_map(|terminator| {
                find(unscanned, terminator).map(|offset| (self.scanned + offset, terminator.len()))
            })
            .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
    }
}

impl Default for EventStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Lazily decode a stream of byte chunks into events.
///
/// Transport errors pass through in order; the stream ends when the input
/// ends.
pub fn decode<S, B, E>(chunks: S) -> impl Stream<Item = Result<ServerSentEvent, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let mut decoder = EventStreamDecoder::new();
    chunks.flat_map(move |chunk| {
        let items: Vec<Result<ServerSentEvent, E>> = match chunk {
            Ok(bytes) => decoder.push(bytes.as_ref()).into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        stream::iter(items)
    })
}
