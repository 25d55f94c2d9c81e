//! Relay Message Types
//!
//! Every hop (page -> bridge -> background -> panel) carries these as JSON.
//! Payloads are tagged by `type` and use camelCase field names, so the
//! wire form is identical in every execution context.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;
use crate::state::TabRecord;

/// Browser tab identifier assigned by the runtime
pub type TabId = u32;

/// Transport a connection was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamSource {
    #[serde(rename = "EventSource")]
    EventSource,
    #[serde(rename = "fetch")]
    Fetch,
    #[default]
    #[serde(rename = "unknown", other)]
    Unknown,
}

impl StreamSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamSource::EventSource => "EventSource",
            StreamSource::Fetch => "fetch",
            StreamSource::Unknown => "unknown",
        }
    }
}

/// Platform readiness constants, shared by wrapped and unwrapped sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl From<ReadyState> for u8 {
    fn from(state: ReadyState) -> u8 {
        state as u8
    }
}

impl TryFrom<u8> for ReadyState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReadyState::Connecting),
            1 => Ok(ReadyState::Open),
            2 => Ok(ReadyState::Closed),
            other => Err(format!("invalid readyState {}", other)),
        }
    }
}

/// Capture event emitted by the page interceptors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamPayload {
    #[serde(rename_all = "camelCase")]
    StreamConnection {
        connection_id: String,
        url: String,
        /// Filled by the bridge, which knows the frame it runs in
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_iframe: Option<bool>,
        #[serde(default)]
        source: StreamSource,
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ready_state: Option<ReadyState>,
    },
    #[serde(rename_all = "camelCase")]
    StreamOpen {
        connection_id: String,
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ready_state: Option<ReadyState>,
    },
    #[serde(rename_all = "camelCase")]
    StreamMessage {
        connection_id: String,
        /// Per-connection sequence number, assigned at interception
        message_id: u64,
        event_type: String,
        data: String,
        #[serde(default)]
        last_event_id: String,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    StreamError {
        connection_id: String,
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ready_state: Option<ReadyState>,
    },
    #[serde(rename_all = "camelCase")]
    StreamClose { connection_id: String, timestamp: i64 },
}

impl StreamPayload {
    pub fn connection_id(&self) -> &str {
        match self {
            StreamPayload::StreamConnection { connection_id, .. }
            | StreamPayload::StreamOpen { connection_id, .. }
            | StreamPayload::StreamMessage { connection_id, .. }
            | StreamPayload::StreamError { connection_id, .. }
            | StreamPayload::StreamClose { connection_id, .. } => connection_id,
        }
    }

    /// Wire tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            StreamPayload::StreamConnection { .. } => "stream-connection",
            StreamPayload::StreamOpen { .. } => "stream-open",
            StreamPayload::StreamMessage { .. } => "stream-message",
            StreamPayload::StreamError { .. } => "stream-error",
            StreamPayload::StreamClose { .. } => "stream-close",
        }
    }
}

/// `{source, payload}` wrapper used on the page and runtime hops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Fixed marker identifying the sending side
    pub source: String,
    pub payload: StreamPayload,
}

impl RelayEnvelope {
    pub fn new(source: &str, payload: StreamPayload) -> Self {
        Self {
            source: source.to_string(),
            payload,
        }
    }

    /// Decode a structured message if it carries the expected marker.
    ///
    /// `Ok(None)` means unrelated traffic that must be ignored.
    pub fn from_wire(value: Value, expected_source: &str) -> Result<Option<Self>, RelayError> {
        if value.get("source").and_then(Value::as_str) != Some(expected_source) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    pub fn to_wire(&self) -> Result<Value, RelayError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Panel -> background messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PanelRequest {
    #[serde(rename_all = "camelCase")]
    Init { tab_id: TabId },
    Clear,
}

/// Background -> panel messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PanelMessage {
    /// Whole tab record, sent in answer to `init`
    InitData { data: TabRecord },
    /// A live capture event, payload forwarded verbatim
    StreamEvent { payload: StreamPayload },
    #[serde(rename_all = "camelCase")]
    Navigation { tab_id: TabId },
}
