//! Content-script bridge (hop 1 -> hop 2)
//!
//! Listens to the page's window broadcast, keeps only envelopes carrying
//! the inject marker and forwards their payloads to the background under
//! the content marker. The bridge knows which frame it runs in, so it
//! annotates `stream-connection` payloads with the frame URL.

use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use super::RuntimeSender;
use crate::config::InspectorConfig;
use crate::error::RelayError;
use crate::protocols::{RelayEnvelope, StreamPayload};

/// Frame the bridge is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_url: String,
    pub is_iframe: bool,
}

impl FrameInfo {
    pub fn top_level(frame_url: &str) -> Self {
        Self {
            frame_url: frame_url.to_string(),
            is_iframe: false,
        }
    }

    pub fn iframe(frame_url: &str) -> Self {
        Self {
            frame_url: frame_url.to_string(),
            is_iframe: true,
        }
    }
}

pub struct Bridge {
    config: Arc<InspectorConfig>,
    frame: FrameInfo,
    runtime: RuntimeSender,
}

impl Bridge {
    pub fn new(config: Arc<InspectorConfig>, frame: FrameInfo, runtime: RuntimeSender) -> Self {
        Self {
            config,
            frame,
            runtime,
        }
    }

    /// Handle one window message.
    ///
    /// Returns `Ok(false)` for traffic that is not ours.
    pub fn handle_window_message(&self, message: Value) -> Result<bool, RelayError> {
        let mut envelope = match RelayEnvelope::from_wire(message, &self.config.inject_source)? {
            Some(envelope) => envelope,
            None => return Ok(false),
        };

        if let StreamPayload::StreamConnection {
            frame_url,
            is_iframe,
            ..
        } = &mut envelope.payload
        {
            frame_url.get_or_insert_with(|| self.frame.frame_url.clone());
            is_iframe.get_or_insert(self.frame.is_iframe);
        }

        envelope.source = self.config.content_source.clone();
        self.runtime.send_message(envelope.to_wire()?)?;
        Ok(true)
    }

    /// Forward window traffic until the page goes away
    pub async fn run(&self, mut window: UnboundedReceiver<Value>) {
        let mut forwarded = 0usize;
        while let Some(message) = window.recv().await {
            match self.handle_window_message(message) {
                Ok(true) => forwarded += 1,
                Ok(false) => {}
                Err(RelayError::Disconnected(hop)) => {
                    warn!("Bridge stopping, {} closed", hop);
                    break;
                }
                Err(e) => warn!("Dropped malformed capture message: {}", e),
            }
        }
        debug!(
            "Bridge for {:?} done after {} messages",
            self.runtime.tab_id(),
            forwarded
        );
    }
}
