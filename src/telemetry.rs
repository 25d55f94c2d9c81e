//! Telemetry Module for Stream Panel
//!
//! Capture and relay lifecycle is reported as structured JSON log lines
//! through the `log` facade, so whatever logger the host installs
//! (devtools console bridge, file, test capture) receives them.

use log::{info, warn};
use serde::Serialize;

/// Audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A new stream connection was observed on the page
    ConnectionCaptured,
    /// An intercepted stream failed
    StreamFailed,
    /// A stream-message arrived for a connection the tab does not know
    UnknownConnection,
    /// A partial SSE record was discarded
    RecordDropped,
    /// A panel attached to a tab
    PanelAttached,
    /// A panel attachment was discarded
    PanelDetached,
    /// A tab record was reset (clear or navigation)
    TabReset,
    /// A tab record was deleted
    TabRemoved,
}

impl AuditEventType {
    fn is_failure(self) -> bool {
        matches!(
            self,
            AuditEventType::StreamFailed
                | AuditEventType::UnknownConnection
                | AuditEventType::RecordDropped
        )
    }
}

/// Audit event for logging
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event type
    pub event_type: AuditEventType,
    /// Tab the event belongs to (background side only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<u32>,
    /// Connection the event belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Transport source (EventSource, fetch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Stream URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Reason for the event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Additional metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AuditEvent {
    /// Create a new audit event
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            tab_id: None,
            connection_id: None,
            source: None,
            url: None,
            reason: None,
            metadata: None,
        }
    }

    pub fn with_tab(mut self, tab_id: u32) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    pub fn with_connection(mut self, id: &str) -> Self {
        self.connection_id = Some(id.to_string());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Log the event
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => {
                if self.event_type.is_failure() {
                    warn!("[STREAM-PANEL] {}", json);
                } else {
                    info!("[STREAM-PANEL] {}", json);
                }
            }
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
            }
        }
    }
}

/// A stream connection was observed on the page
pub fn audit_captured(connection_id: &str, source: &str, url: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::ConnectionCaptured)
        .with_connection(connection_id)
        .with_source(source)
        .with_url(url)
}

/// An intercepted body read failed
pub fn audit_stream_failed(connection_id: &str, reason: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::StreamFailed)
        .with_connection(connection_id)
        .with_reason(reason)
}

/// A message referenced a connection missing from the tab record
pub fn audit_unknown_connection(tab_id: u32, connection_id: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::UnknownConnection)
        .with_tab(tab_id)
        .with_connection(connection_id)
        .with_reason("message dropped")
}

/// A partial record outgrew the pending budget
pub fn audit_record_dropped(connection_id: &str, pending: usize, limit: usize) -> AuditEvent {
    AuditEvent::new(AuditEventType::RecordDropped)
        .with_connection(connection_id)
        .with_reason("partial record exceeded pending budget")
        .with_metadata(serde_json::json!({ "pending": pending, "limit": limit }))
}

pub fn audit_panel_attached(tab_id: u32) -> AuditEvent {
    AuditEvent::new(AuditEventType::PanelAttached).with_tab(tab_id)
}

pub fn audit_panel_detached(tab_id: u32, reason: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::PanelDetached)
        .with_tab(tab_id)
        .with_reason(reason)
}

pub fn audit_tab_reset(tab_id: u32, reason: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::TabReset)
        .with_tab(tab_id)
        .with_reason(reason)
}

pub fn audit_tab_removed(tab_id: u32) -> AuditEvent {
    AuditEvent::new(AuditEventType::TabRemoved).with_tab(tab_id)
}
