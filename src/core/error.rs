//! Flow return codes and cache errors.

use crate::core::clock::ClockTime;
use crate::core::event::Format;

/// Result of pushing data or a request across an element boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// Peer is flushing, data was dropped
    Flushing,
    /// Peer does not accept more data
    Eos,
    /// Data format could not be agreed on
    NotNegotiated,
    /// Nothing is connected on the other side
    NotLinked,
    /// Any other fatal peer error
    Error(String),
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowError::Flushing => write!(f, "flushing"),
            FlowError::Eos => write!(f, "eos"),
            FlowError::NotNegotiated => write!(f, "not-negotiated"),
            FlowError::NotLinked => write!(f, "not-linked"),
            FlowError::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

impl std::error::Error for FlowError {}

/// Errors reported by the cache to its controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Seek in a format the cache cannot map to timestamps
    FormatUnavailable(Format),
    /// Malformed seek (bad rate, start after stop, ...)
    InvalidSeek(String),
    /// Consumer or worker thread could not be spawned
    Thread(String),
    /// Requested position was already evicted
    StaleRequest { position: ClockTime, first: ClockTime },
    /// Flow error from a peer
    Flow(FlowError),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::FormatUnavailable(format) => {
                write!(f, "Seek format {:?} not supported, only time seeks", format)
            }
            CacheError::InvalidSeek(msg) => write!(f, "Invalid seek: {}", msg),
            CacheError::Thread(msg) => write!(f, "Failed to spawn cache thread: {}", msg),
            CacheError::StaleRequest { position, first } => write!(
                f,
                "Requested position {} is older than first cached entry {}",
                position, first
            ),
            CacheError::Flow(e) => write!(f, "Flow error: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<FlowError> for CacheError {
    fn from(e: FlowError) -> Self {
        CacheError::Flow(e)
    }
}
