//! SSE (Server-Sent Events) Wire Parser
//!
//! Turns accumulated event-stream text into complete records plus the
//! unconsumed remainder. A record ends at a blank line; anything after the
//! last blank line is handed back verbatim so the next call can continue
//! where this one stopped. Feeding a stream in arbitrary pieces yields the
//! same records as parsing it in one go.

/// One fully-formed SSE record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseRecord {
    /// `event:` field, `"message"` when absent
    pub event: String,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// `id:` field, empty when absent
    pub id: String,
}

/// Result of parsing a buffer
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedBuffer<'a> {
    /// Records whose terminating blank line was seen
    pub records: Vec<SseRecord>,
    /// Start of the first incomplete record, verbatim
    pub remainder: &'a str,
}

pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Fields collected for the record currently being read
#[derive(Debug, Default)]
struct RecordBuilder {
    event: Option<String>,
    id: Option<String>,
    data_lines: Vec<String>,
}

impl RecordBuilder {
    fn apply_line(&mut self, line: &str) {
        if let Some(value) = field_value(line, "data") {
            self.data_lines.push(value.to_string());
        } else if let Some(value) = field_value(line, "event") {
            self.event = Some(value.to_string());
        } else if let Some(value) = field_value(line, "id") {
            // ids carrying NUL are ignored by the platform as well
            if !value.contains('\0') {
                self.id = Some(value.to_string());
            }
        }
        // comments (":"), retry and unknown fields are skipped
    }

    fn finish(self) -> Option<SseRecord> {
        if self.data_lines.iter().all(|line| line.is_empty()) {
            return None;
        }

        Some(SseRecord {
            event: self
                .event
                .filter(|event| !event.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            data: self.data_lines.join("\n"),
            id: self.id.unwrap_or_default(),
        })
    }
}

/// Value of `name:` with one optional leading space removed
fn field_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let value = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

/// Next line starting at `from`: (end of line content, start of next line).
///
/// `\n`, `\r\n` and `\r` all terminate a line. A `\r` that is the last byte
/// of the buffer is not a terminator yet: it may be the first half of `\r\n`.
fn next_line(bytes: &[u8], from: usize) -> Option<(usize, usize)> {
    let offset = bytes[from..]
        .iter()
        .position(|b| *b == b'\n' || *b == b'\r')?;
    let end = from + offset;

    if bytes[end] == b'\n' {
        return Some((end, end + 1));
    }
    match bytes.get(end + 1) {
        Some(b'\n') => Some((end, end + 2)),
        Some(_) => Some((end, end + 1)),
        None => None,
    }
}

/// Parse every complete record in `buffer`.
pub fn parse_records(buffer: &str) -> ParsedBuffer<'_> {
    let bytes = buffer.as_bytes();
    let mut records = Vec::new();
    let mut builder = RecordBuilder::default();
    let mut record_start = 0;
    let mut pos = 0;

    while let Some((line_end, next)) = next_line(bytes, pos) {
        let line = &buffer[pos..line_end];
        pos = next;

        if line.is_empty() {
            if let Some(record) = std::mem::take(&mut builder).finish() {
                records.push(record);
            }
            record_start = pos;
        } else {
            builder.apply_line(line);
        }
    }

    ParsedBuffer {
        records,
        remainder: &buffer[record_start..],
    }
}

/// Parse a leftover partial record as if the stream had terminated it.
pub fn flush_records(remainder: &str) -> Vec<SseRecord> {
    if remainder.is_empty() {
        return Vec::new();
    }
    let terminated = format!("{}\n\n", remainder);
    parse_records(&terminated).records
}

/// Offset just past the first blank line, if the buffer has one
fn skip_record(buffer: &str) -> Option<usize> {
    let bytes = buffer.as_bytes();
    let mut pos = 0;
    while let Some((line_end, next)) = next_line(bytes, pos) {
        let blank = line_end == pos;
        pos = next;
        if blank {
            return Some(pos);
        }
    }
    None
}

/// Stands in for the discarded part of a line; parses as an SSE comment.
const DISCARD_SENTINEL: char = ':';
/// Enough trailing bytes to recognise a blank line split across chunks
const DISCARD_TAIL: usize = 3;

/// Incremental parser owning the pending buffer of one stream
#[derive(Debug)]
pub struct SseParser {
    /// Text of the current partial record
    buffer: String,
    /// Largest partial record kept before it is dropped
    max_pending: usize,
    /// Skipping the rest of an oversized record
    discarding: bool,
    /// Size of the last dropped record, until taken
    overflowed: Option<usize>,
}

impl SseParser {
    pub fn new(max_pending: usize) -> Self {
        Self {
            buffer: String::new(),
            max_pending,
            discarding: false,
            overflowed: None,
        }
    }

    /// Append decoded text and return the records it completed
    pub fn feed(&mut self, text: &str) -> Vec<SseRecord> {
        self.buffer.push_str(text);

        if self.discarding {
            match skip_record(&self.buffer) {
                Some(end) => {
                    self.buffer.drain(..end);
                    self.discarding = false;
                }
                None => {
                    self.retain_tail();
                    return Vec::new();
                }
            }
        }

        let (records, consumed) = {
            let parsed = parse_records(&self.buffer);
            (parsed.records, self.buffer.len() - parsed.remainder.len())
        };
        self.buffer.drain(..consumed);

        if self.buffer.len() > self.max_pending {
            self.overflowed = Some(self.buffer.len());
            self.discarding = true;
            self.retain_tail();
        }

        records
    }

    /// End of stream: flush the pending partial record
    pub fn finish(&mut self) -> Vec<SseRecord> {
        let pending = std::mem::take(&mut self.buffer);
        if std::mem::take(&mut self.discarding) {
            return Vec::new();
        }
        flush_records(&pending)
    }

    /// Size of a record dropped since the last call
    pub fn take_overflow(&mut self) -> Option<usize> {
        self.overflowed.take()
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn retain_tail(&mut self) {
        let mut start = self.buffer.len().saturating_sub(DISCARD_TAIL);
        while !self.buffer.is_char_boundary(start) {
            start += 1;
        }
        let tail = self.buffer.split_off(start);
        self.buffer.clear();
        self.buffer.push(DISCARD_SENTINEL);
        self.buffer.push_str(&tail);
    }
}
