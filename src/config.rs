//! Configuration module for the Stream Panel pipeline
//!
//! Configuration is handed to the pipeline as JSON bytes by the host
//! (extension manifest data, devtools settings), never read from files.

use serde::Deserialize;
use thiserror::Error;

/// Pipeline configuration shared by every execution context
#[derive(Clone, Debug, Deserialize)]
pub struct InspectorConfig {
    /// Source marker on page -> bridge messages
    #[serde(default = "default_inject_source")]
    pub inject_source: String,

    /// Source marker on bridge -> background messages
    #[serde(default = "default_content_source")]
    pub content_source: String,

    /// Name of the long-lived panel channel
    #[serde(default = "default_port_name")]
    pub port_name: String,

    /// Content type that marks a fetch response as an event stream
    #[serde(default = "default_event_stream_content_type")]
    pub event_stream_content_type: String,

    /// Listener types with this prefix are captured on the EventSource path
    #[serde(default = "default_message_type_prefix")]
    pub message_type_prefix: String,

    /// Largest partial record kept between body chunks (prevent OOM)
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: usize,

    /// Trace every relayed payload (for debugging)
    #[serde(default)]
    pub log_relay_traffic: bool,
}

fn default_inject_source() -> String {
    "stream-panel-inject".to_string()
}

fn default_content_source() -> String {
    "stream-panel-content".to_string()
}

fn default_port_name() -> String {
    "stream-panel".to_string()
}

fn default_event_stream_content_type() -> String {
    "text/event-stream".to_string()
}

fn default_message_type_prefix() -> String {
    "message".to_string()
}

fn default_max_pending_bytes() -> usize {
    1024 * 1024 // 1MB
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            inject_source: default_inject_source(),
            content_source: default_content_source(),
            port_name: default_port_name(),
            event_stream_content_type: default_event_stream_content_type(),
            message_type_prefix: default_message_type_prefix(),
            max_pending_bytes: default_max_pending_bytes(),
            log_relay_traffic: false,
        }
    }
}

impl InspectorConfig {
    /// Parse configuration from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config_str =
            std::str::from_utf8(bytes).map_err(|e| ConfigError::InvalidUtf8(e.to_string()))?;

        serde_json::from_str(config_str).map_err(|e| ConfigError::InvalidJson(e.to_string()))
    }

    /// Whether a declared `content-type` header value names an event stream
    pub fn is_event_stream(&self, content_type: &str) -> bool {
        content_type
            .to_ascii_lowercase()
            .contains(&self.event_stream_content_type.to_ascii_lowercase())
    }

    /// Whether a listener type is captured on the EventSource path
    pub fn is_captured_listener_type(&self, event_type: &str) -> bool {
        event_type.starts_with(&self.message_type_prefix)
    }
}

/// Configuration parsing errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(String),
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}
