//! Request-path interceptor (fetch)
//!
//! Responses declaring the event-stream content type get their body
//! replaced by an `SseTap`: the tap re-yields every chunk unchanged and
//! feeds a copy through the SSE decoder on the side. Any other response is
//! returned exactly as the delegate produced it.
//!
//! CRITICAL: the tap never alters, drops or holds back body bytes. A read
//! failure is reported to the relay and then handed to the consumer as is.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use log::debug;

use super::{generate_connection_id, now_millis, CaptureContext};
use crate::error::TransportError;
use crate::protocols::{ReadyState, SseRecord, StreamPayload, StreamSource};
use crate::streaming::{DecodedChunk, SseStreamDecoder};
use crate::telemetry::{audit_captured, audit_record_dropped, audit_stream_failed};

/// Response body as a stream of byte chunks
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl FetchRequest {
    pub fn get(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    /// `None` for bodiless responses
    pub body: Option<BodyStream>,
}

impl FetchResponse {
    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("url", &self.url)
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

/// The global request function
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError>;
}

#[async_trait]
impl<T: Fetch + ?Sized> Fetch for Arc<T> {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        (**self).fetch(request).await
    }
}

/// Request function wrapper installed in place of the platform's
pub struct InterceptingFetch<F> {
    inner: F,
    capture: CaptureContext,
}

impl<F> InterceptingFetch<F> {
    pub fn new(inner: F, capture: CaptureContext) -> Self {
        Self { inner, capture }
    }
}

#[async_trait]
impl<F: Fetch> Fetch for InterceptingFetch<F> {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let full_url = self.capture.resolve_url(&request.url);
        let mut response = self.inner.fetch(request).await?;

        let is_event_stream = response
            .header("content-type")
            .map(|ct| self.capture.config().is_event_stream(ct))
            .unwrap_or(false);
        if !is_event_stream {
            return Ok(response);
        }

        let connection_id = generate_connection_id();
        let timestamp = now_millis();
        self.capture.emit(StreamPayload::StreamConnection {
            connection_id: connection_id.clone(),
            url: full_url.clone(),
            frame_url: None,
            is_iframe: None,
            source: StreamSource::Fetch,
            timestamp,
            ready_state: Some(ReadyState::Open),
        });
        self.capture.emit(StreamPayload::StreamOpen {
            connection_id: connection_id.clone(),
            timestamp,
            ready_state: Some(ReadyState::Open),
        });
        audit_captured(&connection_id, StreamSource::Fetch.as_str(), &full_url).emit();

        match response.body.take() {
            Some(body) => {
                let tap = SseTap::new(body, connection_id, self.capture.clone());
                response.body = Some(Box::pin(tap));
            }
            None => debug!("Event stream {} has no body to observe", connection_id),
        }
        Ok(response)
    }
}

/// Byte-transparent observer over an event-stream body
pub struct SseTap<S> {
    /// `None` once the body has ended, failed or been dropped
    inner: Option<S>,
    connection_id: String,
    capture: CaptureContext,
    decoder: SseStreamDecoder,
    /// Last message id handed out
    message_seq: u64,
}

impl<S> SseTap<S> {
    pub fn new(inner: S, connection_id: String, capture: CaptureContext) -> Self {
        let decoder = SseStreamDecoder::new(capture.config().max_pending_bytes);
        Self {
            inner: Some(inner),
            connection_id,
            capture,
            decoder,
            message_seq: 0,
        }
    }

    fn publish(&mut self, decoded: DecodedChunk) {
        if let Some(pending) = decoded.dropped {
            audit_record_dropped(
                &self.connection_id,
                pending,
                self.capture.config().max_pending_bytes,
            )
            .emit();
        }
        for record in decoded.records {
            self.publish_record(record);
        }
    }

    fn publish_record(&mut self, record: SseRecord) {
        self.message_seq += 1;
        self.capture.emit(StreamPayload::StreamMessage {
            connection_id: self.connection_id.clone(),
            message_id: self.message_seq,
            event_type: record.event,
            data: record.data,
            last_event_id: record.id,
            timestamp: now_millis(),
        });
    }

    fn emit_close(&self) {
        self.capture.emit(StreamPayload::StreamClose {
            connection_id: self.connection_id.clone(),
            timestamp: now_millis(),
        });
    }
}

impl<S> Stream for SseTap<S>
where
    S: Stream<Item = Result<Bytes, TransportError>> + Unpin,
{
    type Item = Result<Bytes, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let inner = match this.inner.as_mut() {
            Some(inner) => inner,
            None => return Poll::Ready(None),
        };

        match Pin::new(inner).poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                let decoded = this.decoder.on_chunk(&chunk);
                this.publish(decoded);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.inner = None;
                let reason = e.to_string();
                this.capture.emit(StreamPayload::StreamError {
                    connection_id: this.connection_id.clone(),
                    timestamp: now_millis(),
                    error: Some(reason.clone()),
                    ready_state: None,
                });
                audit_stream_failed(&this.connection_id, &reason).emit();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.inner = None;
                let decoded = this.decoder.on_complete();
                this.publish(decoded);
                this.emit_close();
                debug!(
                    "Event stream {} complete after {} bytes",
                    this.connection_id,
                    this.decoder.bytes_seen()
                );
                Poll::Ready(None)
            }
        }
    }
}

impl<S> Drop for SseTap<S> {
    fn drop(&mut self) {
        // consumer cancelled mid-stream
        if self.inner.take().is_some() {
            self.emit_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::StreamExt;

    use super::super::testing::*;
    use super::*;

    /// Upstream body that records when it is released
    struct TrackedBody {
        inner: BodyStream,
        released: Arc<AtomicBool>,
    }

    impl Stream for TrackedBody {
        type Item = Result<Bytes, TransportError>;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.get_mut().inner.as_mut().poll_next(cx)
        }
    }

    impl Drop for TrackedBody {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn setup() -> (Arc<RecordingSink>, Arc<FakeFetch>, InterceptingFetch<Arc<FakeFetch>>) {
        let sink = Arc::new(RecordingSink::default());
        let fake = Arc::new(FakeFetch::default());
        let fetch = InterceptingFetch::new(fake.clone(), capture_context(sink.clone()));
        (sink, fake, fetch)
    }

    fn messages(sink: &RecordingSink) -> Vec<(u64, String, String, String)> {
        sink.payloads()
            .into_iter()
            .filter_map(|p| match p {
                StreamPayload::StreamMessage {
                    message_id,
                    event_type,
                    data,
                    last_event_id,
                    ..
                } => Some((message_id, event_type, data, last_event_id)),
                _ => None,
            })
            .collect()
    }

    async fn drain(body: BodyStream) -> (Vec<u8>, Option<TransportError>) {
        let mut bytes = Vec::new();
        let mut body = body;
        while let Some(item) = body.next().await {
            match item {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(e) => return (bytes, Some(e)),
            }
        }
        (bytes, None)
    }

    #[tokio::test]
    async fn test_non_stream_response_untouched() {
        let (sink, fake, fetch) = setup();
        fake.respond(Ok(response(
            "application/json",
            Some(chunked_body(vec![Ok(b"{\"ok\":true}".to_vec())])),
        )));

        let request = FetchRequest::get("/api").with_header("Accept", "application/json");
        let response = fetch.fetch(request).await.unwrap();
        assert_eq!(response.status, 200);
        let (bytes, error) = drain(response.body.unwrap()).await;
        assert_eq!(bytes, b"{\"ok\":true}".to_vec());
        assert!(error.is_none());
        assert!(sink.payloads().is_empty());
        let requests = fake.requests.lock().unwrap();
        assert_eq!(requests[0].url, "/api");
        assert_eq!(
            requests[0].headers,
            vec![("Accept".to_string(), "application/json".to_string())]
        );
    }

    #[tokio::test]
    async fn test_request_failure_passes_through() {
        let (sink, fake, fetch) = setup();
        fake.respond(Err(TransportError::Network("refused".to_string())));

        let result = fetch.fetch(FetchRequest::get("/sse")).await;
        assert_eq!(result.unwrap_err(), TransportError::Network("refused".to_string()));
        assert!(sink.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_event_stream_body_is_byte_transparent() {
        let (sink, fake, fetch) = setup();
        // last split lands inside the 4-byte crab
        let tail = "2}\n\ndata: 🦀".as_bytes();
        let chunks: Vec<Vec<u8>> = vec![
            b"event: delta\r\ndata: he".to_vec(),
            b"llo\r\n\r\nid: 9\ndata: {\"n\":".to_vec(),
            tail[..12].to_vec(),
            tail[12..].to_vec(),
        ];
        let expected: Vec<u8> = chunks.concat();
        fake.respond(Ok(response(
            "text/event-stream; charset=utf-8",
            Some(chunked_body(chunks.into_iter().map(Ok).collect())),
        )));

        let response = fetch.fetch(FetchRequest::get("/v1/stream")).await.unwrap();
        assert_eq!(sink.kinds(), vec!["stream-connection", "stream-open"]);

        let (bytes, error) = drain(response.body.unwrap()).await;
        assert_eq!(bytes, expected);
        assert!(error.is_none());

        assert_eq!(
            messages(&sink),
            vec![
                (1, "delta".to_string(), "hello".to_string(), String::new()),
                (2, "message".to_string(), "{\"n\":2}".to_string(), "9".to_string()),
                // flushed at end of body
                (3, "message".to_string(), "🦀".to_string(), String::new()),
            ]
        );
        assert_eq!(sink.kinds().last(), Some(&"stream-close"));
    }

    #[tokio::test]
    async fn test_connection_event_describes_request() {
        let (sink, fake, fetch) = setup();
        fake.respond(Ok(response("TEXT/EVENT-STREAM", Some(chunked_body(vec![])))));

        let _response = fetch.fetch(FetchRequest::get("/v1/stream")).await.unwrap();
        match &sink.payloads()[0] {
            StreamPayload::StreamConnection {
                url,
                source,
                ready_state,
                ..
            } => {
                assert_eq!(url, "https://app.example.com/v1/stream");
                assert_eq!(*source, StreamSource::Fetch);
                assert_eq!(*ready_state, Some(ReadyState::Open));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_failure_reported_and_propagated() {
        let (sink, fake, fetch) = setup();
        fake.respond(Ok(response(
            "text/event-stream",
            Some(chunked_body(vec![
                Ok(b"data: first\n\n".to_vec()),
                Err(TransportError::Aborted("reset by peer".to_string())),
                Ok(b"data: never\n\n".to_vec()),
            ])),
        )));

        let response = fetch.fetch(FetchRequest::get("/sse")).await.unwrap();
        let (bytes, error) = drain(response.body.unwrap()).await;
        assert_eq!(bytes, b"data: first\n\n".to_vec());
        assert_eq!(error, Some(TransportError::Aborted("reset by peer".to_string())));

        assert_eq!(messages(&sink).len(), 1);
        let error_payload = sink
            .payloads()
            .into_iter()
            .find_map(|p| match p {
                StreamPayload::StreamError { error, .. } => error,
                _ => None,
            });
        assert_eq!(error_payload.as_deref(), Some("Aborted: reset by peer"));
        assert!(!sink.kinds().contains(&"stream-close"));
    }

    #[tokio::test]
    async fn test_cancelled_body_emits_close() {
        let (sink, fake, fetch) = setup();
        let released = Arc::new(AtomicBool::new(false));
        let upstream = TrackedBody {
            inner: chunked_body(vec![
                Ok(b"data: one\n\n".to_vec()),
                Ok(b"data: two\n\n".to_vec()),
            ]),
            released: released.clone(),
        };
        fake.respond(Ok(response("text/event-stream", Some(Box::pin(upstream)))));

        let response = fetch.fetch(FetchRequest::get("/sse")).await.unwrap();
        let mut body = response.body.unwrap();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"data: one\n\n"));
        assert!(!released.load(Ordering::SeqCst));
        drop(body);

        // cancelling the consumer side releases the upstream body
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(messages(&sink).len(), 1);
        let closes = sink.kinds().iter().filter(|k| **k == "stream-close").count();
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn test_bodiless_stream_response() {
        let (sink, fake, fetch) = setup();
        fake.respond(Ok(response("text/event-stream", None)));

        let response = fetch.fetch(FetchRequest::get("/sse")).await.unwrap();
        assert!(response.body.is_none());
        assert_eq!(sink.kinds(), vec!["stream-connection", "stream-open"]);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = response("text/event-stream", None);
        assert_eq!(response.header("content-type"), Some("text/event-stream"));
        assert!(response.header("x-missing").is_none());
    }
}
