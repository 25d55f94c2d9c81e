//! UTF-8 Boundary Handler
//!
//! CRITICAL: Multi-byte UTF-8 characters can split across chunk boundaries.
//! The decoder holds back an incomplete trailing sequence until the next
//! chunk arrives, so the text handed to the SSE parser never contains a
//! replacement character that the page's own decoder would not produce.
//!
//! A UTF-8 character can be 1-4 bytes:
//! - 1 byte:  0xxxxxxx (ASCII)
//! - 2 bytes: 110xxxxx 10xxxxxx
//! - 3 bytes: 1110xxxx 10xxxxxx 10xxxxxx
//! - 4 bytes: 11110xxx 10xxxxxx 10xxxxxx 10xxxxxx

/// Streaming UTF-8 decoder for body chunks.
///
/// Invalid sequences decode to U+FFFD (lossy), matching a non-fatal
/// platform text decoder.
#[derive(Debug, Default)]
pub struct Utf8Buffer {
    /// Leftover bytes from previous chunk (at most 3 for an incomplete sequence)
    leftover: [u8; 4],
    /// Number of leftover bytes
    leftover_len: usize,
}

impl Utf8Buffer {
    /// Create a new streaming decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk, carrying any incomplete trailing sequence forward.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        if self.leftover_len == 0 {
            return self.decode_joined(chunk);
        }

        let mut joined = Vec::with_capacity(self.leftover_len + chunk.len());
        joined.extend_from_slice(&self.leftover[..self.leftover_len]);
        joined.extend_from_slice(chunk);
        self.leftover_len = 0;
        self.decode_joined(&joined)
    }

    fn decode_joined(&mut self, bytes: &[u8]) -> String {
        let end = match Self::incomplete_tail(bytes) {
            Some(start) => {
                let len = bytes.len() - start;
                self.leftover[..len].copy_from_slice(&bytes[start..]);
                self.leftover_len = len;
                start
            }
            None => bytes.len(),
        };

        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    /// End of input: whatever is still held back can never complete.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.leftover[..self.leftover_len]).into_owned();
        self.leftover_len = 0;
        text
    }

    /// Bytes currently held back
    pub fn pending_len(&self) -> usize {
        self.leftover_len
    }

    /// Check if byte is a UTF-8 continuation byte (10xxxxxx)
    #[inline]
    pub fn is_continuation(byte: u8) -> bool {
        (byte & 0b11000000) == 0b10000000
    }

    /// Get expected length of UTF-8 sequence from first byte
    #[inline]
    pub fn sequence_length(first_byte: u8) -> usize {
        match first_byte {
            0x00..=0x7F => 1, // ASCII
            0xC0..=0xDF => 2, // 2-byte sequence
            0xE0..=0xEF => 3, // 3-byte sequence
            0xF0..=0xF7 => 4, // 4-byte sequence
            _ => 1,           // Invalid, treat as single byte
        }
    }

    /// Start of an incomplete sequence at the end of `bytes`, if any
    fn incomplete_tail(bytes: &[u8]) -> Option<usize> {
        let floor = bytes.len().saturating_sub(4);
        let mut i = bytes.len();
        while i > floor {
            i -= 1;
            if !Self::is_continuation(bytes[i]) {
                let expected = Self::sequence_length(bytes[i]);
                let available = bytes.len() - i;
                return (available < expected).then_some(i);
            }
        }
        None
    }
}
