//! Panel session (hop 3, panel side)
//!
//! Opens the named port, sends `init`, and keeps a local view of the tab
//! record in sync using the same state machine as the background:
//! `init-data` replaces the view, `stream-event` applies one payload,
//! `navigation` empties it.

use log::debug;

use super::{Port, Runtime};
use crate::error::RelayError;
use crate::intercept::now_millis;
use crate::protocols::{PanelMessage, PanelRequest, TabId};
use crate::state::{ApplyOutcome, TabRecord, TabStatistics};

/// Effect of one background message on the panel view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelUpdate {
    /// View replaced by an `init-data` snapshot
    Snapshot,
    /// A live event was applied
    Event(ApplyOutcome),
    /// Tab navigated; view emptied
    Navigated,
}

pub struct PanelSession {
    tab_id: TabId,
    port: Port,
    view: TabRecord,
}

impl PanelSession {
    /// Connect to the background and request the tab's snapshot
    pub fn attach(runtime: &Runtime, port_name: &str, tab_id: TabId) -> Result<Self, RelayError> {
        let port = runtime.connect(port_name)?;
        port.post(&PanelRequest::Init { tab_id })?;
        debug!("Panel attached to tab {} on port {}", tab_id, port.id());
        Ok(Self {
            tab_id,
            port,
            view: TabRecord::new(),
        })
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn view(&self) -> &TabRecord {
        &self.view
    }

    pub fn statistics(&self) -> TabStatistics {
        self.view.statistics(now_millis())
    }

    pub fn apply(&mut self, message: PanelMessage) -> PanelUpdate {
        match message {
            PanelMessage::InitData { data } => {
                self.view = data;
                PanelUpdate::Snapshot
            }
            PanelMessage::StreamEvent { payload } => PanelUpdate::Event(self.view.apply(&payload)),
            PanelMessage::Navigation { tab_id } => {
                debug!("Tab {} navigated, clearing view", tab_id);
                self.view = TabRecord::new();
                PanelUpdate::Navigated
            }
        }
    }

    /// Wait for the next background message and apply it.
    ///
    /// `None` once the background dropped the port.
    pub async fn next_update(&mut self) -> Option<Result<PanelUpdate, RelayError>> {
        let value = self.port.recv().await?;
        Some(self.decode_and_apply(value))
    }

    /// Apply everything already delivered; returns how many messages
    pub fn try_drain(&mut self) -> Result<usize, RelayError> {
        let mut applied = 0;
        while let Some(value) = self.port.try_recv() {
            self.decode_and_apply(value)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Ask the background to reset the tab, and empty the local view
    pub fn clear(&mut self) -> Result<(), RelayError> {
        self.port.post(&PanelRequest::Clear)?;
        self.view = TabRecord::new();
        Ok(())
    }

    fn decode_and_apply(&mut self, value: serde_json::Value) -> Result<PanelUpdate, RelayError> {
        let message: PanelMessage = serde_json::from_value(value)?;
        Ok(self.apply(message))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::super::{Background, BackgroundInput};
    use super::*;
    use crate::config::InspectorConfig;
    use crate::protocols::{StreamPayload, StreamSource};
    use crate::state::ConnectionStatus;

    fn connection(id: &str) -> StreamPayload {
        StreamPayload::StreamConnection {
            connection_id: id.to_string(),
            url: "https://api.example.com/sse".to_string(),
            frame_url: None,
            is_iframe: None,
            source: StreamSource::EventSource,
            timestamp: 10,
            ready_state: None,
        }
    }

    #[test]
    fn test_apply_messages() {
        let (runtime, _inbox) = Runtime::new();
        let mut panel = PanelSession::attach(&runtime, "stream-panel", 1).unwrap();

        let mut seeded = TabRecord::new();
        seeded.apply(&connection("c1"));
        assert_eq!(
            panel.apply(PanelMessage::InitData { data: seeded.clone() }),
            PanelUpdate::Snapshot
        );
        assert_eq!(panel.view(), &seeded);

        let open = StreamPayload::StreamOpen {
            connection_id: "c1".to_string(),
            timestamp: 11,
            ready_state: None,
        };
        assert_eq!(
            panel.apply(PanelMessage::StreamEvent { payload: open }),
            PanelUpdate::Event(ApplyOutcome::StatusChanged(ConnectionStatus::Open))
        );
        assert_eq!(panel.statistics().active_connections, 1);

        assert_eq!(
            panel.apply(PanelMessage::Navigation { tab_id: 1 }),
            PanelUpdate::Navigated
        );
        assert!(panel.view().is_empty());
    }

    fn pump(background: &mut Background, inbox: &mut UnboundedReceiver<BackgroundInput>) {
        while let Ok(input) = inbox.try_recv() {
            background.handle(input);
        }
    }

    #[test]
    fn test_session_against_background() {
        let (runtime, mut inbox) = Runtime::new();
        let mut background = Background::new(Arc::new(InspectorConfig::default()));
        let tab = runtime.sender_for_tab(Some(2));

        tab.send_message(json!({
            "source": "stream-panel-content",
            "payload": serde_json::to_value(connection("c1")).unwrap()
        }))
        .unwrap();
        pump(&mut background, &mut inbox);

        let mut panel = PanelSession::attach(&runtime, "stream-panel", 2).unwrap();
        pump(&mut background, &mut inbox);
        assert_eq!(panel.try_drain().unwrap(), 1);
        assert!(panel.view().connection("c1").is_some());

        panel.clear().unwrap();
        pump(&mut background, &mut inbox);
        assert!(panel.view().is_empty());
        assert!(background.tab(2).unwrap().is_empty());
        assert_eq!(panel.tab_id(), 2);
    }

    #[test]
    fn test_malformed_message_is_an_error() {
        let (runtime, mut inbox) = Runtime::new();
        let mut panel = PanelSession::attach(&runtime, "stream-panel", 1).unwrap();

        // take the background's end of the port and write garbage into it
        let handle = loop {
            match inbox.try_recv().unwrap() {
                BackgroundInput::PortConnected(handle) => break handle,
                _ => continue,
            }
        };
        handle.outbound.send(json!({"type": "nonsense"})).unwrap();

        assert!(matches!(panel.try_drain(), Err(RelayError::Serialization(_))));
    }
}
