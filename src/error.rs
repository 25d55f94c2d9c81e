//! Error types shared across the capture pipeline
//!
//! Transport errors belong to the page: they are passed through the
//! interceptors untouched. Relay errors belong to the pipeline: they are
//! logged at the site where they happen and never reach page code.

use thiserror::Error;

/// Failure reported by a transport capability (network, abort, bad input).
///
/// Cloneable so an interceptor can report it to the relay and still hand
/// the very same failure to the page's consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request URL could not be parsed or resolved
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// The underlying network operation failed
    #[error("Network error: {0}")]
    Network(String),
    /// The consumer or the platform aborted the operation
    #[error("Aborted: {0}")]
    Aborted(String),
}

/// Failure while moving a message between execution contexts
#[derive(Debug, Error)]
pub enum RelayError {
    /// The receiving side of a hop is gone
    #[error("Relay channel closed: {0}")]
    Disconnected(&'static str),
    /// A message could not be encoded or decoded at a context boundary
    #[error("Relay serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
