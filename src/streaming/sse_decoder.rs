//! Streaming SSE Decoder
//!
//! Byte chunks in, SSE records out. Combines the UTF-8 boundary handler
//! with the incremental wire parser; the caller keeps ownership of the
//! chunk bytes, which are never modified here.

use super::utf8_buffer::Utf8Buffer;
use crate::protocols::{SseParser, SseRecord};

/// Records produced by one chunk
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DecodedChunk {
    pub records: Vec<SseRecord>,
    /// Size of a partial record that was dropped for exceeding the budget
    pub dropped: Option<usize>,
}

/// Per-stream decoder state
#[derive(Debug)]
pub struct SseStreamDecoder {
    utf8: Utf8Buffer,
    parser: SseParser,
    /// Total body bytes observed
    bytes_seen: usize,
    complete: bool,
}

impl SseStreamDecoder {
    pub fn new(max_pending_bytes: usize) -> Self {
        Self {
            utf8: Utf8Buffer::new(),
            parser: SseParser::new(max_pending_bytes),
            bytes_seen: 0,
            complete: false,
        }
    }

    /// Decode one body chunk
    pub fn on_chunk(&mut self, chunk: &[u8]) -> DecodedChunk {
        if self.complete {
            return DecodedChunk::default();
        }
        self.bytes_seen += chunk.len();

        let text = self.utf8.decode(chunk);
        let records = self.parser.feed(&text);
        DecodedChunk {
            records,
            dropped: self.parser.take_overflow(),
        }
    }

    /// End of body: flush held-back bytes and the pending partial record
    pub fn on_complete(&mut self) -> DecodedChunk {
        if self.complete {
            return DecodedChunk::default();
        }
        self.complete = true;

        let tail = self.utf8.finish();
        let mut records = self.parser.feed(&tail);
        let dropped = self.parser.take_overflow();
        records.extend(self.parser.finish());
        DecodedChunk { records, dropped }
    }

    pub fn bytes_seen(&self) -> usize {
        self.bytes_seen
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}
