//! Wire protocols for Stream Panel
//!
//! This module provides:
//! - The SSE wire parser used on the fetch path
//! - The relay message types carried across every context hop

pub mod relay;
pub mod sse;

pub use relay::{
    PanelMessage, PanelRequest, ReadyState, RelayEnvelope, StreamPayload, StreamSource, TabId,
};
pub use sse::{flush_records, parse_records, ParsedBuffer, SseParser, SseRecord};
