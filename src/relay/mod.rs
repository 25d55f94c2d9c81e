//! Cross-Context Relay
//!
//! The page, the bridge, the background and the panel share no memory.
//! Each hop is a typed channel carrying `serde_json::Value`, so every
//! context boundary is an explicit serialization boundary:
//!
//! - page -> bridge: window broadcast, filtered by source marker (`page`)
//! - bridge -> background: one-shot runtime message, stamped with the
//!   sender's tab by the runtime (`bridge`, `Runtime::sender_for_tab`)
//! - background -> panel: long-lived named port (`Runtime::connect`)
//!
//! The background is the single consumer of the runtime inbox
//! (`background::Background::run`).

pub mod background;
pub mod bridge;
pub mod page;
pub mod panel;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::RelayError;
use crate::protocols::{PanelMessage, PanelRequest, TabId};

pub use background::Background;
pub use bridge::{Bridge, FrameInfo};
pub use page::WindowPoster;
pub use panel::{PanelSession, PanelUpdate};

/// Identity the runtime attaches to a one-shot message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSender {
    /// `None` for senders outside any tab
    pub tab_id: Option<TabId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeMessage {
    pub sender: MessageSender,
    pub message: Value,
}

/// Background side of a panel port
#[derive(Debug)]
pub struct PortHandle {
    pub id: u64,
    pub name: String,
    outbound: UnboundedSender<Value>,
}

impl PortHandle {
    pub fn post(&self, message: &PanelMessage) -> Result<(), RelayError> {
        let value = serde_json::to_value(message)?;
        self.outbound
            .send(value)
            .map_err(|_| RelayError::Disconnected("panel port"))
    }
}

/// Everything the background reacts to
#[derive(Debug)]
pub enum BackgroundInput {
    Runtime(RuntimeMessage),
    PortConnected(PortHandle),
    PortMessage { port_id: u64, message: Value },
    PortDisconnected { port_id: u64 },
    /// Top-level navigation started in a tab
    TabNavigating(TabId),
    TabRemoved(TabId),
}

/// The extension runtime: owns the background's inbox
#[derive(Clone)]
pub struct Runtime {
    inbox: UnboundedSender<BackgroundInput>,
    next_port_id: Arc<AtomicU64>,
}

impl Runtime {
    pub fn new() -> (Self, UnboundedReceiver<BackgroundInput>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let runtime = Self {
            inbox,
            next_port_id: Arc::new(AtomicU64::new(1)),
        };
        (runtime, rx)
    }

    /// Message channel for a script running in `tab_id`.
    ///
    /// The tab is fixed here, not by the script, so a page cannot claim
    /// another tab's identity.
    pub fn sender_for_tab(&self, tab_id: Option<TabId>) -> RuntimeSender {
        RuntimeSender {
            sender: MessageSender { tab_id },
            inbox: self.inbox.clone(),
        }
    }

    /// Open a long-lived port to the background
    pub fn connect(&self, name: &str) -> Result<Port, RelayError> {
        let id = self.next_port_id.fetch_add(1, Ordering::SeqCst);
        let (outbound, inbound) = mpsc::unbounded_channel();
        self.deliver(BackgroundInput::PortConnected(PortHandle {
            id,
            name: name.to_string(),
            outbound,
        }))?;
        debug!("Port {} '{}' connected", id, name);
        Ok(Port {
            id,
            inbox: self.inbox.clone(),
            inbound,
        })
    }

    pub fn tab_navigating(&self, tab_id: TabId) -> Result<(), RelayError> {
        self.deliver(BackgroundInput::TabNavigating(tab_id))
    }

    pub fn tab_removed(&self, tab_id: TabId) -> Result<(), RelayError> {
        self.deliver(BackgroundInput::TabRemoved(tab_id))
    }

    fn deliver(&self, input: BackgroundInput) -> Result<(), RelayError> {
        self.inbox
            .send(input)
            .map_err(|_| RelayError::Disconnected("background inbox"))
    }
}

/// One-shot message channel bound to a tab
#[derive(Clone)]
pub struct RuntimeSender {
    sender: MessageSender,
    inbox: UnboundedSender<BackgroundInput>,
}

impl RuntimeSender {
    pub fn tab_id(&self) -> Option<TabId> {
        self.sender.tab_id
    }

    pub fn send_message(&self, message: Value) -> Result<(), RelayError> {
        self.inbox
            .send(BackgroundInput::Runtime(RuntimeMessage {
                sender: self.sender,
                message,
            }))
            .map_err(|_| RelayError::Disconnected("background inbox"))
    }
}

/// Panel side of a port; disconnects when dropped
pub struct Port {
    id: u64,
    inbox: UnboundedSender<BackgroundInput>,
    inbound: UnboundedReceiver<Value>,
}

impl Port {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn post(&self, request: &PanelRequest) -> Result<(), RelayError> {
        let message = serde_json::to_value(request)?;
        self.inbox
            .send(BackgroundInput::PortMessage {
                port_id: self.id,
                message,
            })
            .map_err(|_| RelayError::Disconnected("background inbox"))
    }

    /// Next message from the background; `None` once the background side
    /// dropped the port
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.inbound.try_recv().ok()
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        // background may already be gone
        let _ = self
            .inbox
            .send(BackgroundInput::PortDisconnected { port_id: self.id });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::config::InspectorConfig;
    use crate::intercept::testing::{chunked_body, response, FakeEventSourceFactory, FakeFetch};
    use crate::intercept::{
        EventSourceFactory, EventSourceInit, Fetch, FetchRequest, Platform, SourceEvent,
    };
    use crate::state::ConnectionStatus;
    use futures::StreamExt;

    #[test]
    fn test_sender_tab_is_stamped_by_runtime() {
        let (runtime, mut inbox) = Runtime::new();
        let sender = runtime.sender_for_tab(Some(3));
        sender
            .send_message(serde_json::json!({"source": "x", "tabId": 99}))
            .unwrap();

        match inbox.try_recv().unwrap() {
            BackgroundInput::Runtime(msg) => assert_eq!(msg.sender.tab_id, Some(3)),
            other => panic!("unexpected input {:?}", other),
        }
    }

    #[test]
    fn test_port_lifecycle_inputs() {
        let (runtime, mut inbox) = Runtime::new();
        let port = runtime.connect("stream-panel").unwrap();
        let port_id = port.id();
        port.post(&PanelRequest::Clear).unwrap();
        drop(port);

        assert!(matches!(
            inbox.try_recv().unwrap(),
            BackgroundInput::PortConnected(handle) if handle.id == port_id && handle.name == "stream-panel"
        ));
        assert!(matches!(
            inbox.try_recv().unwrap(),
            BackgroundInput::PortMessage { port_id: id, .. } if id == port_id
        ));
        assert!(matches!(
            inbox.try_recv().unwrap(),
            BackgroundInput::PortDisconnected { port_id: id } if id == port_id
        ));
    }

    #[test]
    fn test_send_after_background_gone() {
        let (runtime, inbox) = Runtime::new();
        drop(inbox);
        let result = runtime.sender_for_tab(Some(1)).send_message(Value::Null);
        assert!(matches!(result, Err(RelayError::Disconnected(_))));
        assert!(runtime.connect("stream-panel").is_err());
    }

    #[tokio::test]
    async fn test_pipeline_end_to_end() {
        let config = Arc::new(InspectorConfig::default());
        let (runtime, inbox) = Runtime::new();

        let mut background = Background::new(config.clone());
        let background_task = tokio::spawn(async move {
            background.run(inbox).await;
            background
        });

        // page context and its bridge, in tab 7
        let (window, window_rx) = mpsc::unbounded_channel();
        let scope = page::inject(config.clone(), window, "https://app.example.com/").unwrap();
        let fetch = FakeFetch::default();
        fetch.respond(Ok(response(
            "text/event-stream",
            Some(chunked_body(vec![
                Ok(b"data: f1\n\nda".to_vec()),
                Ok(b"ta: f2\n\n".to_vec()),
            ])),
        )));
        let platform = match scope.install(Platform {
            event_source: FakeEventSourceFactory::default(),
            fetch,
        }) {
            Ok(platform) => platform,
            Err(_) => panic!("interceptors already installed"),
        };

        let bridge = Bridge::new(
            config.clone(),
            FrameInfo::top_level("https://app.example.com/"),
            runtime.sender_for_tab(Some(7)),
        );
        let bridge_task = tokio::spawn(async move { bridge.run(window_rx).await });

        // panel attaches before any traffic
        let mut panel = PanelSession::attach(&runtime, &config.port_name, 7).unwrap();
        assert_eq!(panel.next_update().await.unwrap().unwrap(), PanelUpdate::Snapshot);
        assert!(panel.view().is_empty());

        let source = platform
            .event_source
            .construct("/events", EventSourceInit::default())
            .unwrap();
        source.get_ref().dispatch(SourceEvent::signal("open"));
        source.get_ref().dispatch(SourceEvent::message("message", "e1", "1"));

        let response = platform.fetch.fetch(FetchRequest::get("/api/stream")).await.unwrap();
        let body: Vec<_> = response.body.unwrap().collect().await;
        assert_eq!(body.len(), 2);

        // connection, open, message; then connection, open, 2 messages, close
        for _ in 0..8 {
            panel.next_update().await.unwrap().unwrap();
        }

        let es = panel.view().connection(source.connection_id()).unwrap();
        assert_eq!(es.status, ConnectionStatus::Open);
        assert_eq!(es.messages[0].data, "e1");
        assert_eq!(es.frame_url.as_deref(), Some("https://app.example.com/"));
        assert!(!es.is_iframe);

        let fetched = panel
            .view()
            .connections
            .values()
            .find(|c| c.id != source.connection_id())
            .unwrap();
        assert_eq!(fetched.status, ConnectionStatus::Closed);
        let data: Vec<&str> = fetched.messages.iter().map(|m| m.data.as_str()).collect();
        assert_eq!(data, vec!["f1", "f2"]);
        assert_eq!(panel.statistics().total_messages, 3);

        // tear down every context; the background loop ends last
        drop(source);
        drop(platform);
        drop(scope);
        bridge_task.await.unwrap();
        drop(panel);
        drop(runtime);

        let background = background_task.await.unwrap();
        assert_eq!(background.tab(7).unwrap().message_count(), 3);
        assert!(!background.is_attached(7));
    }
}
