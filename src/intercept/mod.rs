//! Transport Interceptors
//!
//! The page's streaming transports are modelled as capabilities
//! (`EventSourceFactory`, `Fetch`). Interception wraps a capability in a
//! decorator implementing the same trait, keeping the unwrapped one as a
//! private delegate. `PageScope::install` is the single point where the
//! wrapping happens; page code only ever sees the wrapped capabilities.
//!
//! CRITICAL: capture must never change what page code observes. Transport
//! results and errors pass through untouched; capture failures are logged
//! and swallowed.

pub mod event_source;
pub mod fetch;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use url::Url;
use uuid::Uuid;

use crate::config::InspectorConfig;
use crate::error::TransportError;
use crate::protocols::StreamPayload;

pub use event_source::{
    EventSource, EventSourceFactory, EventSourceInit, HandlerKind, InterceptedEventSource,
    InterceptingEventSourceFactory, Listener, SourceEvent,
};
pub use fetch::{BodyStream, Fetch, FetchRequest, FetchResponse, InterceptingFetch, SseTap};

/// Destination of capture events (the page -> bridge hop).
///
/// Posting is fire-and-forget: it cannot fail from the caller's point of view.
pub trait RelaySink: Send + Sync {
    fn post(&self, payload: StreamPayload);
}

/// Capture time in ms since epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Fresh connection id: `stream_<ms>_<9 random chars>`
pub fn generate_connection_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("stream_{}_{}", now_millis(), &random[..9])
}

/// State shared by every interceptor installed on one page
#[derive(Clone)]
pub struct CaptureContext {
    config: Arc<InspectorConfig>,
    sink: Arc<dyn RelaySink>,
    /// Base URL request URLs are resolved against
    base_url: Url,
}

impl CaptureContext {
    pub fn new(
        config: Arc<InspectorConfig>,
        sink: Arc<dyn RelaySink>,
        base_url: &str,
    ) -> Result<Self, TransportError> {
        let base_url =
            Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            config,
            sink,
            base_url,
        })
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    /// Absolute form of a request URL; falls back to the raw text
    pub fn resolve_url(&self, raw: &str) -> String {
        match self.base_url.join(raw) {
            Ok(url) => url.to_string(),
            Err(e) => {
                debug!("Could not resolve '{}' against {}: {}", raw, self.base_url, e);
                raw.to_string()
            }
        }
    }

    pub fn emit(&self, payload: StreamPayload) {
        if self.config.log_relay_traffic {
            debug!(
                "[capture] {} for {}",
                payload.kind(),
                payload.connection_id()
            );
        }
        self.sink.post(payload);
    }
}

/// The page's transport capabilities
pub struct Platform<E, F> {
    pub event_source: E,
    pub fetch: F,
}

/// Intercepted capabilities handed to page code
pub type InterceptedPlatform<E, F> =
    Platform<InterceptingEventSourceFactory<E>, InterceptingFetch<F>>;

/// One page's global scope
pub struct PageScope {
    capture: CaptureContext,
    installed: AtomicBool,
}

impl PageScope {
    pub fn new(capture: CaptureContext) -> Self {
        Self {
            capture,
            installed: AtomicBool::new(false),
        }
    }

    /// Wrap the platform capabilities, once per page.
    ///
    /// A second call hands the capabilities back unwrapped in `Err`, so a
    /// page is never observed twice.
    pub fn install<E, F>(
        &self,
        platform: Platform<E, F>,
    ) -> Result<InterceptedPlatform<E, F>, Platform<E, F>>
    where
        E: EventSourceFactory,
        F: Fetch,
    {
        if self.installed.swap(true, Ordering::SeqCst) {
            debug!("Stream interceptors already installed on this page");
            return Err(platform);
        }

        debug!("EventSource & fetch SSE interceptors installed");
        Ok(Platform {
            event_source: InterceptingEventSourceFactory::new(
                platform.event_source,
                self.capture.clone(),
            ),
            fetch: InterceptingFetch::new(platform.fetch, self.capture.clone()),
        })
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }
}
