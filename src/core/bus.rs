//! Message bus from a cache to whoever controls the pipeline.
//!
//! - `subscribe()` callbacks run synchronously inside `post()`, on the
//!   posting thread (consumer loop, deferred worker or control thread)
//! - `post()` also queues the message for `poll()` in a controller loop
//!
//! Messages are never posted with a cache lock held, so a callback may call
//! back into the cache (seek included). Callbacks do run on cache threads:
//! keep them short.

use std::sync::{Arc, Mutex, RwLock};
use log::warn;
use uuid::Uuid;

use crate::core::clock::ClockTime;
use crate::core::error::CacheError;

/// Maximum messages in queue before oldest are evicted
const MAX_QUEUE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// Operator-visible failure (stale request, downstream flow error, ...)
    Error(CacheError),
    /// Recoverable problem, retried by the cache itself
    Warning(String),
    /// Range request sent upstream
    RangeRequested { start: ClockTime, stop: ClockTime },
    /// Read-ahead budget reached for the current segment
    ForwardFillDone,
    /// First seek switched the cache out of passthrough
    LeftPassthrough,
    /// Playback reached the requested segment stop
    SegmentDone { position: ClockTime },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheMessage {
    /// Posting cache instance
    pub source: Uuid,
    pub kind: MessageKind,
}

type Callback = Arc<dyn Fn(&CacheMessage) + Send + Sync>;

/// Pub/sub bus with deferred polling. Clones share state.
#[derive(Clone, Default)]
pub struct MessageBus {
    subscribers: Arc<RwLock<Vec<Callback>>>,
    queue: Arc<Mutex<Vec<CacheMessage>>>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("subscribers", &self.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.queue.lock().map(|q| q.len()).unwrap_or(0))
            .finish()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked for every posted message (FIFO order).
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&CacheMessage) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(callback));
    }

    /// Invoke callbacks, then queue for `poll()`.
    pub fn post(&self, message: CacheMessage) {
        // Clone the list so callbacks may subscribe without deadlocking
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for cb in &callbacks {
            cb(&message);
        }

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_QUEUE_SIZE {
            let evict_count = queue.len() / 2;
            warn!("MessageBus queue full ({} messages), evicting oldest {}", queue.len(), evict_count);
            queue.drain(0..evict_count);
        }
        queue.push(message);
    }

    /// Take every message posted since the last poll.
    pub fn poll(&self) -> Vec<CacheMessage> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.read().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// Drop all subscribers and queued messages
    pub fn clear(&self) {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn warning(source: Uuid, text: &str) -> CacheMessage {
        CacheMessage {
            source,
            kind: MessageKind::Warning(text.into()),
        }
    }

    #[test]
    fn test_subscribe_and_poll() {
        let bus = MessageBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe(move |msg| {
            if matches!(msg.kind, MessageKind::Warning(_)) {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(bus.has_subscribers());

        let id = Uuid::new_v4();
        bus.post(warning(id, "a"));
        bus.post(CacheMessage {
            source: id,
            kind: MessageKind::ForwardFillDone,
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let polled = bus.poll();
        assert_eq!(polled.len(), 2);
        assert_eq!(polled[0].source, id);
        assert_eq!(bus.poll().len(), 0);
    }

    #[test]
    fn test_queue_eviction() {
        let bus = MessageBus::new();
        let id = Uuid::new_v4();
        for i in 0..MAX_QUEUE_SIZE + 1 {
            bus.post(warning(id, &i.to_string()));
        }
        // Half evicted when full, then one more pushed
        assert_eq!(bus.queue_len(), MAX_QUEUE_SIZE / 2 + 1);
        let first = bus.poll().remove(0);
        assert_eq!(first.kind, MessageKind::Warning((MAX_QUEUE_SIZE / 2).to_string()));
    }

    #[test]
    fn test_clones_share_state() {
        let bus = MessageBus::new();
        let other = bus.clone();
        other.post(warning(Uuid::new_v4(), "shared"));
        assert_eq!(bus.queue_len(), 1);
        bus.clear();
        assert_eq!(other.queue_len(), 0);
    }
}
