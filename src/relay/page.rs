//! Page side of hop 1
//!
//! Capture events leave the page as `{source, payload}` envelopes on the
//! window broadcast. Posting never fails from the interceptor's point of
//! view: a closed window channel only means nobody is listening.

use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::InspectorConfig;
use crate::error::TransportError;
use crate::intercept::{CaptureContext, PageScope, RelaySink};
use crate::protocols::{RelayEnvelope, StreamPayload};

/// `RelaySink` posting to the page's window broadcast
pub struct WindowPoster {
    source: String,
    window: UnboundedSender<Value>,
}

impl WindowPoster {
    pub fn new(config: &InspectorConfig, window: UnboundedSender<Value>) -> Self {
        Self {
            source: config.inject_source.clone(),
            window,
        }
    }
}

impl RelaySink for WindowPoster {
    fn post(&self, payload: StreamPayload) {
        let envelope = RelayEnvelope::new(&self.source, payload);
        match envelope.to_wire() {
            Ok(message) => {
                if self.window.send(message).is_err() {
                    debug!(
                        "Window closed, {} for {} not delivered",
                        envelope.payload.kind(),
                        envelope.payload.connection_id()
                    );
                }
            }
            Err(e) => warn!("Failed to encode capture event: {}", e),
        }
    }
}

/// Page scope whose interceptors post to `window`
pub fn inject(
    config: Arc<InspectorConfig>,
    window: UnboundedSender<Value>,
    base_url: &str,
) -> Result<PageScope, TransportError> {
    let poster = Arc::new(WindowPoster::new(&config, window));
    let capture = CaptureContext::new(config, poster, base_url)?;
    Ok(PageScope::new(capture))
}
