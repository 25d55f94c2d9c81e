//! Constructor-path interceptor (EventSource)
//!
//! The platform already parses the wire format on this path, so capture
//! works on delivered events. Each wrapped source registers its own capture
//! listeners ahead of any page listener: one for the default `message`
//! channel at construction, and one per additional `message*` type the
//! first time page code listens for it. Every delivered message is then
//! observed exactly once and before page code runs, however many page
//! listeners or handler properties there are.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::debug;

use super::{generate_connection_id, now_millis, CaptureContext};
use crate::error::TransportError;
use crate::protocols::{ReadyState, StreamPayload, StreamSource};
use crate::telemetry::audit_captured;

/// Event delivered by a source to its listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    /// `open`, `error`, `message` or a named event type
    pub event_type: String,
    pub data: String,
    pub last_event_id: String,
}

impl SourceEvent {
    pub fn message(event_type: &str, data: &str, last_event_id: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            data: data.to_string(),
            last_event_id: last_event_id.to_string(),
        }
    }

    /// Data-less lifecycle event (`open`, `error`)
    pub fn signal(event_type: &str) -> Self {
        Self::message(event_type, "", "")
    }
}

pub type Listener = Arc<dyn Fn(&SourceEvent) + Send + Sync>;

/// Handler properties (`onopen`, `onmessage`, `onerror`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Open,
    Message,
    Error,
}

impl HandlerKind {
    pub fn event_type(self) -> &'static str {
        match self {
            HandlerKind::Open => "open",
            HandlerKind::Message => "message",
            HandlerKind::Error => "error",
        }
    }

    pub fn for_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "open" => Some(HandlerKind::Open),
            "message" => Some(HandlerKind::Message),
            "error" => Some(HandlerKind::Error),
            _ => None,
        }
    }
}

/// Construction options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSourceInit {
    pub with_credentials: bool,
}

/// Method and property surface of a streaming connection object
pub trait EventSource: Send + Sync {
    fn url(&self) -> &str;
    fn with_credentials(&self) -> bool;
    fn ready_state(&self) -> ReadyState;
    fn add_event_listener(&self, event_type: &str, listener: Listener);
    fn remove_event_listener(&self, event_type: &str, listener: &Listener);
    fn set_event_handler(&self, kind: HandlerKind, handler: Option<Listener>);
    fn event_handler(&self, kind: HandlerKind) -> Option<Listener>;
    fn close(&self);
}

/// The streaming-connection constructor
pub trait EventSourceFactory: Send + Sync {
    type Source: EventSource;

    fn construct(&self, url: &str, init: EventSourceInit) -> Result<Self::Source, TransportError>;
}

/// Capture state of one wrapped source, shared with its capture listeners
struct SourceCapture {
    connection_id: String,
    capture: CaptureContext,
    /// Last message id handed out
    message_seq: AtomicU64,
    /// Event types with a capture listener registered
    captured_types: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl SourceCapture {
    fn on_message(&self, event: &SourceEvent) {
        let message_id = self.message_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.capture.emit(StreamPayload::StreamMessage {
            connection_id: self.connection_id.clone(),
            message_id,
            event_type: event.event_type.clone(),
            data: event.data.clone(),
            last_event_id: event.last_event_id.clone(),
            timestamp: now_millis(),
        });
    }

    fn on_open(&self) {
        self.capture.emit(StreamPayload::StreamOpen {
            connection_id: self.connection_id.clone(),
            timestamp: now_millis(),
            ready_state: Some(ReadyState::Open),
        });
    }

    /// `ready_state` tells a reconnect (`Connecting`) from a final failure
    fn on_error(&self, ready_state: Option<ReadyState>) {
        self.capture.emit(StreamPayload::StreamError {
            connection_id: self.connection_id.clone(),
            timestamp: now_millis(),
            error: None,
            ready_state,
        });
    }

    /// Claim the single close event for this connection
    fn on_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.capture.emit(StreamPayload::StreamClose {
            connection_id: self.connection_id.clone(),
            timestamp: now_millis(),
        });
    }

    /// Whether `event_type` still needs a capture listener; marks it taken
    fn claim_type(&self, event_type: &str) -> bool {
        let mut types = self
            .captured_types
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        types.insert(event_type.to_string())
    }
}

/// A source as handed to page code: same surface, observed
pub struct InterceptedEventSource<S> {
    inner: Arc<S>,
    state: Arc<SourceCapture>,
}

impl<S: EventSource> InterceptedEventSource<S> {
    pub fn connection_id(&self) -> &str {
        &self.state.connection_id
    }

    /// The unwrapped source
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    fn ensure_captured(&self, event_type: &str) {
        if !self.state.claim_type(event_type) {
            return;
        }
        let state = Arc::clone(&self.state);
        let listener: Listener = Arc::new(move |event: &SourceEvent| state.on_message(event));
        self.inner.add_event_listener(event_type, listener);
    }
}

impl<S: EventSource> EventSource for InterceptedEventSource<S> {
    fn url(&self) -> &str {
        self.inner.url()
    }

    fn with_credentials(&self) -> bool {
        self.inner.with_credentials()
    }

    fn ready_state(&self) -> ReadyState {
        self.inner.ready_state()
    }

    fn add_event_listener(&self, event_type: &str, listener: Listener) {
        if self.state.capture.config().is_captured_listener_type(event_type) {
            self.ensure_captured(event_type);
        }
        self.inner.add_event_listener(event_type, listener);
    }

    fn remove_event_listener(&self, event_type: &str, listener: &Listener) {
        self.inner.remove_event_listener(event_type, listener);
    }

    fn set_event_handler(&self, kind: HandlerKind, handler: Option<Listener>) {
        // the message channel is captured from construction on
        self.inner.set_event_handler(kind, handler);
    }

    fn event_handler(&self, kind: HandlerKind) -> Option<Listener> {
        self.inner.event_handler(kind)
    }

    fn close(&self) {
        self.state.on_close();
        self.inner.close();
    }
}

/// Constructor wrapper installed in place of the platform's
pub struct InterceptingEventSourceFactory<F> {
    inner: F,
    capture: CaptureContext,
}

impl<F> InterceptingEventSourceFactory<F> {
    pub fn new(inner: F, capture: CaptureContext) -> Self {
        Self { inner, capture }
    }
}

impl<F> EventSourceFactory for InterceptingEventSourceFactory<F>
where
    F: EventSourceFactory,
    F::Source: 'static,
{
    type Source = InterceptedEventSource<F::Source>;

    fn construct(&self, url: &str, init: EventSourceInit) -> Result<Self::Source, TransportError> {
        // construction failures belong to the page, untouched
        let source = self.inner.construct(url, init)?;

        let connection_id = generate_connection_id();
        let full_url = self.capture.resolve_url(url);

        self.capture.emit(StreamPayload::StreamConnection {
            connection_id: connection_id.clone(),
            url: full_url.clone(),
            frame_url: None,
            is_iframe: None,
            source: StreamSource::EventSource,
            timestamp: now_millis(),
            ready_state: Some(source.ready_state()),
        });
        audit_captured(&connection_id, StreamSource::EventSource.as_str(), &full_url).emit();

        let state = Arc::new(SourceCapture {
            connection_id,
            capture: self.capture.clone(),
            message_seq: AtomicU64::new(0),
            captured_types: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        });

        let on_open = Arc::clone(&state);
        source.add_event_listener("open", Arc::new(move |_: &SourceEvent| on_open.on_open()));
        let source = Arc::new(source);
        // weak, the source owns its listeners
        let errored: Weak<F::Source> = Arc::downgrade(&source);
        let on_error = Arc::clone(&state);
        source.add_event_listener(
            "error",
            Arc::new(move |_: &SourceEvent| {
                on_error.on_error(errored.upgrade().map(|source| source.ready_state()))
            }),
        );

        let wrapped = InterceptedEventSource {
            inner: source,
            state,
        };
        wrapped.ensure_captured(HandlerKind::Message.event_type());
        debug!("Wrapped EventSource {} as {}", full_url, wrapped.connection_id());

        Ok(wrapped)
    }
}
