//! Streaming module for chunk-by-chunk body observation
//!
//! This module provides streaming primitives that:
//! - Handle UTF-8 boundaries across chunks
//! - Turn body chunks into SSE records without holding more than one
//!   partial record

pub mod sse_decoder;
pub mod utf8_buffer;

pub use sse_decoder::{DecodedChunk, SseStreamDecoder};
pub use utf8_buffer::Utf8Buffer;
