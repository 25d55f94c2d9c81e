//! Connection State Machine
//!
//! `connecting -> open -> {closed | error}`. Transitions only move forward;
//! a terminal status never changes again. Messages keep being appended in
//! arrival order whatever the status, since events already in flight across
//! the relay may land after the close.

use serde::{Deserialize, Serialize};

use crate::protocols::StreamSource;

/// Lifecycle status of one logical stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
    Error,
}

impl ConnectionStatus {
    fn rank(self) -> u8 {
        match self {
            ConnectionStatus::Connecting => 0,
            ConnectionStatus::Open => 1,
            ConnectionStatus::Closed | ConnectionStatus::Error => 2,
        }
    }

    /// `closed` and `error` end the lifecycle
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Status after observing `next`; backward or post-terminal moves are ignored
    pub fn transition(self, next: ConnectionStatus) -> ConnectionStatus {
        if self.is_terminal() || next.rank() < self.rank() {
            self
        } else {
            next
        }
    }
}

/// One SSE event delivered on a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Sequence number within the connection, starting at 1
    pub id: u64,
    pub event_type: String,
    /// Payload, stored untouched
    pub data: String,
    #[serde(default)]
    pub last_event_id: String,
    /// Capture time (ms since epoch)
    pub timestamp: i64,
}

/// One logical stream observed on a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    /// Absolute stream URL
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_url: Option<String>,
    #[serde(default)]
    pub is_iframe: bool,
    #[serde(default)]
    pub source: StreamSource,
    pub status: ConnectionStatus,
    /// Capture time (ms since epoch)
    pub created_at: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Connection {
    /// New connection in the implicit `connecting` state
    pub fn new(id: &str, url: &str, source: StreamSource, created_at: i64) -> Self {
        Self {
            id: id.to_string(),
            url: url.to_string(),
            frame_url: None,
            is_iframe: false,
            source,
            status: ConnectionStatus::Connecting,
            created_at,
            messages: Vec::new(),
        }
    }

    pub fn with_frame(mut self, frame_url: Option<String>, is_iframe: bool) -> Self {
        self.frame_url = frame_url;
        self.is_iframe = is_iframe;
        self
    }

    /// Apply a status event; returns whether the status changed
    pub fn transition_to(&mut self, next: ConnectionStatus) -> bool {
        let previous = self.status;
        self.status = previous.transition(next);
        self.status != previous
    }

    /// Append in arrival order, accepted in any status
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}
