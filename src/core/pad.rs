//! Peers of a frame cache.
//!
//! The cache only knows these two interfaces; whatever produces and
//! consumes frames implements them.

use std::sync::Arc;

use crate::core::error::FlowError;
use crate::core::event::Event;
use crate::core::store::Entry;

/// Element feeding the cache. Receives range requests (seeks) and any src
/// event the cache does not handle itself.
pub trait Upstream: Send + Sync {
    /// Deliver an event upstream. Must not call back into the cache
    /// synchronously with data; deliver from the upstream's own thread.
    fn send_event(&self, event: Event) -> Result<(), FlowError>;
}

/// Element consuming what the cache serves.
pub trait Downstream: Send + Sync {
    /// Deliver one entry. May block for back-pressure.
    fn push(&self, entry: Entry) -> Result<(), FlowError>;

    /// Deliver a serialized or flush event. Returns false if refused.
    fn push_event(&self, event: Event) -> bool;
}

impl<T: Upstream + ?Sized> Upstream for Arc<T> {
    fn send_event(&self, event: Event) -> Result<(), FlowError> {
        (**self).send_event(event)
    }
}

impl<T: Downstream + ?Sized> Downstream for Arc<T> {
    fn push(&self, entry: Entry) -> Result<(), FlowError> {
        (**self).push(entry)
    }

    fn push_event(&self, event: Event) -> bool {
        (**self).push_event(event)
    }
}
