//! Background Aggregator
//!
//! Single owner of every Tab Record. Capture events are applied to the
//! record whether or not a panel is watching, then forwarded verbatim to
//! the panel attached to that tab, if any.
//!
//! CRITICAL: a failed send to a panel never interrupts capture. The stale
//! attachment is discarded and the event stays recorded for the next
//! `init-data`.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc::UnboundedReceiver;

use super::{BackgroundInput, PortHandle, RuntimeMessage};
use crate::config::InspectorConfig;
use crate::error::RelayError;
use crate::protocols::{PanelMessage, PanelRequest, RelayEnvelope, StreamPayload, TabId};
use crate::state::{ApplyOutcome, TabArena, TabRecord};
use crate::telemetry::{
    audit_panel_attached, audit_panel_detached, audit_tab_removed, audit_tab_reset,
    audit_unknown_connection,
};

pub struct Background {
    config: Arc<InspectorConfig>,
    tabs: TabArena,
    /// Open panel ports by port id
    ports: HashMap<u64, PortHandle>,
    /// Tab -> port id of the panel attached to it
    attachments: HashMap<TabId, u64>,
    /// Port id -> tab it sent `init` for
    port_tabs: HashMap<u64, TabId>,
}

impl Background {
    pub fn new(config: Arc<InspectorConfig>) -> Self {
        Self {
            config,
            tabs: TabArena::new(),
            ports: HashMap::new(),
            attachments: HashMap::new(),
            port_tabs: HashMap::new(),
        }
    }

    pub fn tab(&self, tab_id: TabId) -> Option<&TabRecord> {
        self.tabs.get(tab_id)
    }

    pub fn is_attached(&self, tab_id: TabId) -> bool {
        self.attachments.contains_key(&tab_id)
    }

    /// Process inputs until every sender is gone
    pub async fn run(&mut self, mut inbox: UnboundedReceiver<BackgroundInput>) {
        while let Some(input) = inbox.recv().await {
            self.handle(input);
        }
        debug!("Background inbox closed, {} tabs tracked", self.tabs.len());
    }

    pub fn handle(&mut self, input: BackgroundInput) {
        match input {
            BackgroundInput::Runtime(message) => self.on_runtime_message(message),
            BackgroundInput::PortConnected(port) => self.on_port_connected(port),
            BackgroundInput::PortMessage { port_id, message } => {
                match serde_json::from_value::<PanelRequest>(message) {
                    Ok(request) => self.on_panel_request(port_id, request),
                    Err(e) => warn!("Ignoring malformed panel request on port {}: {}", port_id, e),
                }
            }
            BackgroundInput::PortDisconnected { port_id } => self.on_port_disconnected(port_id),
            BackgroundInput::TabNavigating(tab_id) => self.on_tab_navigating(tab_id),
            BackgroundInput::TabRemoved(tab_id) => self.on_tab_removed(tab_id),
        }
    }

    fn on_runtime_message(&mut self, message: RuntimeMessage) {
        let tab_id = match message.sender.tab_id {
            Some(tab_id) => tab_id,
            None => {
                debug!("Ignoring runtime message without a sender tab");
                return;
            }
        };

        let envelope = match RelayEnvelope::from_wire(message.message, &self.config.content_source) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return,
            Err(e) => {
                warn!("Dropped malformed capture message from tab {}: {}", tab_id, e);
                return;
            }
        };
        let payload = envelope.payload;

        let outcome = self.tabs.get_or_create(tab_id).apply(&payload);
        if outcome == ApplyOutcome::UnknownConnection {
            if matches!(payload, StreamPayload::StreamMessage { .. }) {
                audit_unknown_connection(tab_id, payload.connection_id()).emit();
                return;
            }
            // status event for a connection this record never saw, still forwarded
            debug!(
                "[tab {}] {} for unknown connection {}",
                tab_id,
                payload.kind(),
                payload.connection_id()
            );
        }
        if self.config.log_relay_traffic {
            debug!(
                "[tab {}] {} {} -> {:?}",
                tab_id,
                payload.kind(),
                payload.connection_id(),
                outcome
            );
        }

        self.send_to_panel(tab_id, &PanelMessage::StreamEvent { payload });
    }

    fn on_port_connected(&mut self, port: PortHandle) {
        if port.name != self.config.port_name {
            debug!("Ignoring port '{}'", port.name);
            return;
        }
        self.ports.insert(port.id, port);
    }

    fn on_panel_request(&mut self, port_id: u64, request: PanelRequest) {
        if !self.ports.contains_key(&port_id) {
            debug!("Request on unknown port {}", port_id);
            return;
        }

        match request {
            PanelRequest::Init { tab_id } => {
                // a port follows one tab at a time
                if let Some(previous) = self.port_tabs.insert(port_id, tab_id) {
                    if previous != tab_id && self.attachments.get(&previous) == Some(&port_id) {
                        self.attachments.remove(&previous);
                        audit_panel_detached(previous, "panel switched tabs").emit();
                    }
                }
                // a newer panel for the same tab supersedes the older one
                self.attachments.insert(tab_id, port_id);
                audit_panel_attached(tab_id).emit();

                let data = self.tabs.snapshot(tab_id);
                self.send_to_panel(tab_id, &PanelMessage::InitData { data });
            }
            PanelRequest::Clear => match self.port_tabs.get(&port_id) {
                Some(&tab_id) => {
                    self.tabs.reset(tab_id);
                    audit_tab_reset(tab_id, "cleared by panel").emit();
                }
                None => debug!("Clear before init on port {}", port_id),
            },
        }
    }

    fn on_port_disconnected(&mut self, port_id: u64) {
        self.ports.remove(&port_id);
        if let Some(tab_id) = self.port_tabs.remove(&port_id) {
            if self.attachments.get(&tab_id) == Some(&port_id) {
                self.attachments.remove(&tab_id);
                audit_panel_detached(tab_id, "port disconnected").emit();
            }
        }
    }

    fn on_tab_navigating(&mut self, tab_id: TabId) {
        self.tabs.reset(tab_id);
        audit_tab_reset(tab_id, "navigation").emit();
        self.send_to_panel(tab_id, &PanelMessage::Navigation { tab_id });
    }

    fn on_tab_removed(&mut self, tab_id: TabId) {
        self.tabs.remove(tab_id);
        if let Some(port_id) = self.attachments.remove(&tab_id) {
            self.port_tabs.remove(&port_id);
        }
        audit_tab_removed(tab_id).emit();
    }

    /// Send to the panel attached to `tab_id`; no-op when none is
    fn send_to_panel(&mut self, tab_id: TabId, message: &PanelMessage) {
        let port_id = match self.attachments.get(&tab_id) {
            Some(&port_id) => port_id,
            None => return,
        };

        let result = match self.ports.get(&port_id) {
            Some(port) => port.post(message),
            None => Err(RelayError::Disconnected("panel port")),
        };

        if let Err(e) = result {
            self.attachments.remove(&tab_id);
            self.port_tabs.remove(&port_id);
            self.ports.remove(&port_id);
            audit_panel_detached(tab_id, &e.to_string()).emit();
        }
    }
}
