//! Stream Panel: live SSE inspection for a debugged page
//!
//! Intercepts a page's `EventSource` connections and `text/event-stream`
//! fetch responses, rebuilds SSE records from the raw body chunks without
//! touching what the page reads, and relays capture events in order,
//! exactly once per connection, from the page through the bridge and the
//! background to an inspector panel that may come and go.
//!
//! Layout:
//! - `intercept`: transport capabilities and their observing decorators
//! - `streaming` / `protocols`: chunk decoding, SSE wire format, relay messages
//! - `state`: connection state machine, per-tab records, statistics
//! - `relay`: the page, bridge, background and panel ends of each hop

pub mod config;
pub mod error;
pub mod intercept;
pub mod protocols;
pub mod relay;
pub mod state;
pub mod streaming;
pub mod telemetry;

use std::sync::Arc;

use log::{info, warn};
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub use config::{ConfigError, InspectorConfig};
pub use error::{RelayError, TransportError};
pub use intercept::{PageScope, Platform};
pub use protocols::{PanelMessage, PanelRequest, StreamPayload, TabId};
pub use relay::{Background, BackgroundInput, Bridge, FrameInfo, PanelSession, Runtime};
pub use state::{Connection, ConnectionStatus, TabRecord};

/// Root of one inspector installation: owns the configuration and builds
/// the component living in each execution context
#[derive(Clone, Debug, Default)]
pub struct StreamPanel {
    config: Arc<InspectorConfig>,
}

impl StreamPanel {
    pub fn new(config: InspectorConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Load configuration handed over by the host; keeps the defaults when
    /// it cannot be parsed
    pub fn configure(bytes: Option<&[u8]>) -> Self {
        let config = match bytes {
            Some(bytes) => match InspectorConfig::from_bytes(bytes) {
                Ok(config) => {
                    info!(
                        "Loaded inspector configuration (port '{}', pending limit {} bytes)",
                        config.port_name, config.max_pending_bytes
                    );
                    config
                }
                Err(e) => {
                    warn!("Invalid inspector configuration, using defaults: {}", e);
                    InspectorConfig::default()
                }
            },
            None => InspectorConfig::default(),
        };
        Self::new(config)
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    /// Page scope for a page at `base_url` posting to its window broadcast
    pub fn page_scope(
        &self,
        window: UnboundedSender<Value>,
        base_url: &str,
    ) -> Result<PageScope, TransportError> {
        relay::page::inject(self.config.clone(), window, base_url)
    }

    /// Bridge for a frame of `tab_id`
    pub fn bridge(&self, runtime: &Runtime, tab_id: TabId, frame: FrameInfo) -> Bridge {
        Bridge::new(self.config.clone(), frame, runtime.sender_for_tab(Some(tab_id)))
    }

    /// The runtime and the background consuming its inbox
    pub fn background(&self) -> (Runtime, Background, UnboundedReceiver<BackgroundInput>) {
        let (runtime, inbox) = Runtime::new();
        (runtime, Background::new(self.config.clone()), inbox)
    }

    pub fn attach_panel(
        &self,
        runtime: &Runtime,
        tab_id: TabId,
    ) -> Result<PanelSession, RelayError> {
        PanelSession::attach(runtime, &self.config.port_name, tab_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_from_bytes() {
        let bytes: &[u8] = br#"{"port_name": "sse-inspector", "max_pending_bytes": 4096}"#;
        let panel = StreamPanel::configure(Some(bytes));
        assert_eq!(panel.config().port_name, "sse-inspector");
        assert_eq!(panel.config().max_pending_bytes, 4096);
        assert_eq!(panel.config().inject_source, "stream-panel-inject");
    }

    #[test]
    fn test_configure_falls_back_to_defaults() {
        let panel = StreamPanel::configure(Some(&b"{broken"[..]));
        assert_eq!(panel.config().port_name, "stream-panel");

        let panel = StreamPanel::configure(None);
        assert_eq!(panel.config().content_source, "stream-panel-content");
    }

    #[test]
    fn test_components_share_port_name() {
        let panel = StreamPanel::configure(Some(&br#"{"port_name": "custom"}"#[..]));
        let (runtime, mut background, mut inbox) = panel.background();

        let mut session = panel.attach_panel(&runtime, 3).unwrap();
        while let Ok(input) = inbox.try_recv() {
            background.handle(input);
        }
        assert!(background.is_attached(3));
        assert_eq!(session.try_drain().unwrap(), 1);
    }
}
