//! Frame cache engine
//!
//! Sits between an upstream producer and a downstream consumer:
//! - Sink side (`CacheSink`): upstream pushes entries and events into the store
//! - Consumer thread: serves the entry covering the requested position,
//!   advances, repeats until nothing covers the position
//! - Src side (`seek`, `handle_src_event`): downstream moves the requested
//!   position; the cache resumes in place or resets and asks upstream for
//!   the new range
//! - Deferred worker: refill decisions and upstream range requests
//!
//! Locking:
//! - `state`: data mutex (store, span, flags, requested segment). Never held
//!   across a downstream push or an upstream event.
//! - `wake` + `wake_cond`: wake generation for the consumer thread
//! - `control`: serializes seeks with range requests, so a request built
//!   for an old range never reaches upstream after a reset
//!
//! Starts in passthrough: entries and events go straight downstream until
//! the first seek.

use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::core::bus::{CacheMessage, MessageBus, MessageKind};
use crate::core::clock::{ClockTime, DisplayOpt};
use crate::core::error::{CacheError, FlowError};
use crate::core::event::{Caps, Event, SeekEvent, SeekFlags};
use crate::core::eviction::{EvictionPolicy, RoomReport};
use crate::core::pad::{Downstream, Upstream};
use crate::core::segment::{Segment, SegmentTracker};
use crate::core::stats::{CacheStats, CacheStatsSnapshot};
use crate::core::store::{Entry, TimeOrderedStore};
use crate::core::workers::Workers;

/// Gate for incoming data around flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Data accepted
    Open,
    /// Discontinuous seek happened; data from the previous range is still
    /// in flight until upstream starts flushing
    AwaitingFlush,
    /// Between flush-start and flush-stop
    Flushing,
}

#[derive(Debug)]
struct CacheState {
    store: TimeOrderedStore,
    tracker: SegmentTracker,
    /// What downstream asked for; `position` is the next timestamp to serve
    requested: Segment,
    caps: Option<Caps>,
    /// Caps changed after the last emit
    caps_changed: bool,
    passthrough: bool,
    /// Caps and segment must go downstream before the next entry
    send_events: bool,
    flush: FlushState,
    /// A seek is flushing downstream; the consumer stays away
    downstream_flushing: bool,
    /// Bumped by every seek
    seek_seqnum: u64,
    /// Timestamp of the last entry accepted from upstream
    upstream_position: Option<ClockTime>,
    /// None after a successful push
    last_flow: Option<FlowError>,
    stale_reported: Option<ClockTime>,
    missed_at: Option<ClockTime>,
    eos_sent: bool,
    not_negotiated_reported: bool,
    forward_done_reported: bool,
}

impl CacheState {
    fn new(lookahead: ClockTime) -> Self {
        Self {
            store: TimeOrderedStore::new(),
            tracker: SegmentTracker::new(lookahead),
            requested: Segment::default(),
            caps: None,
            caps_changed: false,
            passthrough: true,
            send_events: false,
            flush: FlushState::Open,
            downstream_flushing: false,
            seek_seqnum: 0,
            upstream_position: None,
            last_flow: None,
            stale_reported: None,
            missed_at: None,
            eos_sent: false,
            not_negotiated_reported: false,
            forward_done_reported: false,
        }
    }

    /// Downstream refused data for a reason other than flushing.
    ///
    /// A refused entry is not retried: serving stays halted across wakes
    /// until the next seek clears `last_flow`.
    fn halted(&self) -> bool {
        matches!(self.last_flow, Some(ref e) if *e != FlowError::Flushing)
    }
}

struct Inner {
    id: Uuid,
    config: CacheConfig,
    policy: EvictionPolicy,
    state: Mutex<CacheState>,
    wake: Mutex<u64>,
    wake_cond: Condvar,
    running: AtomicBool,
    /// Bumped on every discontinuous seek
    epoch: Arc<AtomicU64>,
    control: Mutex<()>,
    deferred: Workers,
    upstream: Arc<dyn Upstream>,
    downstream: Arc<dyn Downstream>,
    bus: MessageBus,
    stats: CacheStats,
    this: Weak<Inner>,
}

/// Time-indexed cache between an upstream producer and a downstream consumer.
///
/// Owns the consumer thread: `start()` spawns it, `stop()` or drop joins it.
pub struct FrameCache {
    inner: Arc<Inner>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

/// Sink-side handle given to the upstream producer. Clones share the cache.
#[derive(Clone)]
pub struct CacheSink {
    inner: Arc<Inner>,
}

impl FrameCache {
    /// Create a cache in passthrough mode. The consumer thread is not
    /// running until `start()`.
    pub fn new(
        config: CacheConfig,
        upstream: Arc<dyn Upstream>,
        downstream: Arc<dyn Downstream>,
    ) -> Result<Self, CacheError> {
        let id = Uuid::new_v4();
        let policy = if config.clamp_to_available_memory {
            EvictionPolicy::with_memory_clamp(
                config.duration_soft_limit(),
                config.size_soft_limit,
                config.enforce_size_limit,
            )
        } else {
            EvictionPolicy::new(
                config.duration_soft_limit(),
                config.size_soft_limit,
                config.enforce_size_limit,
            )
        };

        let epoch = Arc::new(AtomicU64::new(0));
        let deferred = Workers::new(&format!("framecache-idle-{}", short_id(&id)), Arc::clone(&epoch))
            .map_err(|e| CacheError::Thread(e.to_string()))?;

        let inner = Arc::new_cyclic(|this| Inner {
            id,
            state: Mutex::new(CacheState::new(config.lookahead())),
            config,
            policy,
            wake: Mutex::new(0),
            wake_cond: Condvar::new(),
            running: AtomicBool::new(false),
            epoch,
            control: Mutex::new(()),
            deferred,
            upstream,
            downstream,
            bus: MessageBus::new(),
            stats: CacheStats::new(),
            this: this.clone(),
        });

        debug!(
            "FrameCache {} created: duration_limit={} size_limit={} lookahead={}",
            inner.id,
            inner.policy.duration_limit(),
            inner.policy.size_limit(),
            inner.config.lookahead()
        );

        Ok(Self {
            inner,
            consumer: Mutex::new(None),
        })
    }

    /// Spawn the consumer thread. No-op when already running.
    pub fn start(&self) -> Result<(), CacheError> {
        let mut consumer = self.consumer.lock().unwrap_or_else(|e| e.into_inner());
        if consumer.is_some() {
            return Ok(());
        }

        self.inner.running.store(true, Ordering::Release);
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("framecache-src-{}", short_id(&self.inner.id)))
            .spawn(move || inner.consumer_loop())
            .map_err(|e| {
                self.inner.running.store(false, Ordering::Release);
                CacheError::Thread(e.to_string())
            })?;
        *consumer = Some(handle);

        info!("FrameCache {} started", self.inner.id);
        Ok(())
    }

    /// Stop and join the consumer thread. Downstream is flushed first so a
    /// blocked push returns.
    pub fn stop(&self) {
        let handle = self.consumer.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(handle) = handle else {
            return;
        };

        self.inner.running.store(false, Ordering::Release);
        self.inner.flush_downstream();
        self.inner.wake();

        if handle.join().is_err() {
            error!("FrameCache {} consumer thread panicked", self.inner.id);
        }
        info!("FrameCache {} stopped", self.inner.id);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Handle for the upstream producer
    pub fn sink(&self) -> CacheSink {
        CacheSink {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Event arriving from downstream.
    pub fn handle_src_event(&self, event: Event) -> Result<bool, CacheError> {
        self.inner.handle_src_event(event)
    }

    /// Move the requested position. Errors leave the cache untouched.
    pub fn seek(&self, seek: &SeekEvent) -> Result<(), CacheError> {
        self.inner.seek(seek)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Next timestamp to serve
    pub fn position(&self) -> ClockTime {
        self.inner.lock_state().requested.position
    }

    pub fn requested_segment(&self) -> Segment {
        self.inner.lock_state().requested.clone()
    }

    /// Cache span `[start, stop)`; `stop` is `None` while unset or open-ended
    pub fn span(&self) -> (Option<ClockTime>, Option<ClockTime>) {
        let state = self.inner.lock_state();
        (state.tracker.start(), state.tracker.stop())
    }

    pub fn len(&self) -> usize {
        self.inner.lock_state().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock_state().store.is_empty()
    }

    /// Cached payload bytes
    pub fn bytes(&self) -> usize {
        self.inner.lock_state().store.bytes()
    }

    pub fn cached_timestamps(&self) -> Vec<ClockTime> {
        self.inner.lock_state().store.iter().map(|e| e.timestamp).collect()
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.lock_state().passthrough
    }

    pub fn flush_state(&self) -> FlushState {
        self.inner.lock_state().flush
    }

    /// Last downstream failure, `None` once a push succeeds again
    pub fn last_flow(&self) -> Option<FlowError> {
        self.inner.lock_state().last_flow.clone()
    }

    /// Timestamp of the last entry accepted from upstream
    pub fn upstream_position(&self) -> Option<ClockTime> {
        self.inner.lock_state().upstream_position
    }

    /// Wait until no deferred job is queued or running.
    pub fn sync_deferred(&self, timeout: Duration) -> bool {
        self.inner.deferred.wait_idle(timeout)
    }
}

impl Drop for FrameCache {
    fn drop(&mut self) {
        self.stop();
    }
}

impl CacheSink {
    /// Push one entry from upstream.
    pub fn push(&self, entry: Entry) -> Result<(), FlowError> {
        self.inner.push(entry)
    }

    /// Serialized or flush event from upstream. Returns false if refused.
    pub fn push_event(&self, event: Event) -> bool {
        self.inner.push_event(event)
    }

    pub fn cache_id(&self) -> Uuid {
        self.inner.id
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn post(&self, kind: MessageKind) {
        self.bus.post(CacheMessage { source: self.id, kind });
    }

    fn wake(&self) {
        let mut generation = self.wake.lock().unwrap_or_else(|e| e.into_inner());
        *generation = generation.wrapping_add(1);
        self.wake_cond.notify_all();
    }

    fn flush_downstream(&self) {
        self.downstream.push_event(Event::FlushStart);
        self.downstream.push_event(Event::FlushStop { reset_time: true });
    }

    fn after_eviction(&self, state: &mut CacheState, report: RoomReport) {
        if report.evicted == 0 {
            return;
        }
        self.stats.record_evicted(report.evicted, report.freed);
        if let Some(first) = state.store.first() {
            state.tracker.set_start(first.timestamp);
        }
    }

    // --- sink side ---

    fn push(&self, entry: Entry) -> Result<(), FlowError> {
        let mut guard = self.lock_state();
        if guard.passthrough {
            drop(guard);
            return self.downstream.push(entry);
        }

        if guard.flush != FlushState::Open {
            let flush = guard.flush;
            drop(guard);
            self.stats.record_rejected();
            debug!("Rejecting entry {} while {:?}", entry.timestamp, flush);
            return Err(FlowError::Flushing);
        }

        if entry.duration.is_zero() {
            debug!("Entry {} has no duration and will never be served", entry.timestamp);
        }

        let state = &mut *guard;
        let timestamp = entry.timestamp;
        let mem = entry.mem();
        let mut replaced = state.store.remove_covering(timestamp).is_some();
        replaced |= state.store.insert_or_replace(entry).is_some();
        if replaced {
            self.stats.record_replaced();
        }
        state.upstream_position = Some(timestamp);
        trace!("Cached {} ({} bytes), {} entries", timestamp, mem, state.store.len());

        let report = self.policy.make_room(&mut state.store, state.requested.position);
        self.after_eviction(state, report);
        drop(guard);

        self.wake();
        Ok(())
    }

    fn push_event(&self, event: Event) -> bool {
        let mut guard = self.lock_state();
        match event {
            Event::FlushStart => {
                guard.flush = FlushState::Flushing;
                debug!("Upstream flush start");
                return true;
            }
            Event::FlushStop { .. } => {
                guard.flush = FlushState::Open;
                debug!("Upstream flush stop");
                return true;
            }
            _ => {}
        }

        if guard.passthrough {
            if let Event::Caps(ref caps) = event {
                guard.caps = Some(caps.clone());
            }
            drop(guard);
            return self.downstream.push_event(event);
        }

        match event {
            Event::Caps(caps) => {
                if guard.caps.as_ref() != Some(&caps) {
                    debug!("Caps now {}", caps);
                    guard.caps_changed = guard.caps.is_some();
                    guard.caps = Some(caps);
                }
                true
            }
            Event::Segment(_) | Event::Eos if guard.flush != FlushState::Open => {
                debug!("Dropping {} from the previous range", event.name());
                false
            }
            Event::Segment(segment) => {
                if guard.tracker.on_segment(segment.start, segment.stop) {
                    return true;
                }
                // Answer to a request from before the last reset: hold the
                // barrier until upstream flushes for the current range
                guard.flush = FlushState::AwaitingFlush;
                self.stats.record_rejected();
                false
            }
            Event::Eos => {
                guard.tracker.on_range_complete();
                debug!("Upstream range complete at {}", DisplayOpt(guard.upstream_position));
                drop(guard);
                self.schedule_refill();
                true
            }
            other => {
                drop(guard);
                self.downstream.push_event(other)
            }
        }
    }

    // --- src side ---

    fn handle_src_event(&self, event: Event) -> Result<bool, CacheError> {
        match event {
            Event::Seek(seek) => {
                self.seek(&seek)?;
                Ok(true)
            }
            Event::Qos(qos) => {
                trace!("Ignoring QoS: proportion={} diff={}", qos.proportion, qos.diff);
                Ok(true)
            }
            other => {
                self.upstream.send_event(other)?;
                Ok(true)
            }
        }
    }

    fn seek(&self, seek: &SeekEvent) -> Result<(), CacheError> {
        let control = self.control.lock().unwrap_or_else(|e| e.into_inner());

        let mut guard = self.lock_state();
        let mut requested = guard.requested.clone();
        if let Err(e) = requested.do_seek(seek) {
            warn!("Seek rejected: {}", e);
            return Err(e);
        }

        let state = &mut *guard;
        state.requested = requested;
        let position = state.requested.position;
        let was_passthrough = std::mem::replace(&mut state.passthrough, false);
        let discontinuous = !state.tracker.contains(position);

        state.seek_seqnum += 1;
        state.send_events = true;
        state.caps_changed = false;
        state.downstream_flushing = true;
        state.last_flow = None;
        state.stale_reported = None;
        state.missed_at = None;
        state.eos_sent = false;
        state.not_negotiated_reported = false;

        if discontinuous {
            let dropped = state.store.len();
            state.store.clear();
            state.tracker.reset(position);
            state.flush = FlushState::AwaitingFlush;
            state.forward_done_reported = false;
            let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            info!(
                "Seek to {} outside cache, reset ({} entries dropped, epoch {})",
                position, dropped, epoch
            );
        } else {
            debug!("Seek to {} inside cache, resuming", position);
        }
        drop(guard);

        if was_passthrough || discontinuous || seek.flags.contains(SeekFlags::FLUSH) {
            self.flush_downstream();
        }

        self.lock_state().downstream_flushing = false;
        self.wake();

        if discontinuous {
            self.schedule_refill();
        }
        drop(control);

        // Subscribers may seek from their callback
        if was_passthrough {
            info!("FrameCache {} leaving passthrough", self.id);
            self.post(MessageKind::LeftPassthrough);
        }
        Ok(())
    }

    // --- consumer thread ---

    fn consumer_loop(&self) {
        debug!("Consumer thread started");
        let timeout = self.config.wait_timeout();
        let mut seen = 0u64;

        loop {
            {
                let generation = self.wake.lock().unwrap_or_else(|e| e.into_inner());
                let (generation, _) = self
                    .wake_cond
                    .wait_timeout_while(generation, timeout, |g| {
                        *g == seen && self.running.load(Ordering::Acquire)
                    })
                    .unwrap_or_else(|e| e.into_inner());
                seen = *generation;
            }

            if !self.running.load(Ordering::Acquire) {
                break;
            }

            self.drain();
            self.schedule_refill();
        }

        debug!("Consumer thread exiting");
    }

    /// Emit caps and segment if due. `None` when the burst must not run.
    fn send_preamble<'a>(&'a self, mut guard: MutexGuard<'a, CacheState>) -> Option<MutexGuard<'a, CacheState>> {
        if !guard.send_events && !guard.caps_changed {
            return Some(guard);
        }

        let Some(caps) = guard.caps.clone() else {
            let position = guard.requested.position;
            let servable = guard.store.find_covering(position).is_some();
            if servable && !guard.not_negotiated_reported {
                guard.not_negotiated_reported = true;
                drop(guard);
                error!("No caps received, cannot serve {}", position);
                self.post(MessageKind::Error(CacheError::Flow(FlowError::NotNegotiated)));
            }
            return None;
        };

        let send_segment = guard.send_events;
        let mut segment = guard.requested.clone();
        segment.time = segment.start;
        let seqnum = guard.seek_seqnum;
        guard.send_events = false;
        guard.caps_changed = false;
        drop(guard);

        debug!("Sending caps {}", caps);
        self.downstream.push_event(Event::Caps(caps));
        if send_segment {
            debug!("Sending segment {}", segment);
            self.downstream.push_event(Event::Segment(segment));
        }

        let guard = self.lock_state();
        // Seek intervened: its own preamble is pending
        if guard.seek_seqnum != seqnum {
            return None;
        }
        Some(guard)
    }

    /// Serve every entry available from the requested position on.
    fn drain(&self) {
        let guard = self.lock_state();
        if guard.passthrough || guard.downstream_flushing || guard.halted() {
            return;
        }

        let Some(mut guard) = self.send_preamble(guard) else {
            return;
        };

        loop {
            let position = guard.requested.position;

            if let Some(stop) = guard.requested.stop
                && position >= stop
            {
                if !guard.eos_sent {
                    guard.eos_sent = true;
                    drop(guard);
                    info!("Reached segment stop {}, sending EOS", stop);
                    self.downstream.push_event(Event::Eos);
                    self.post(MessageKind::SegmentDone { position });
                }
                return;
            }

            let Some(entry) = guard.store.find_covering(position).cloned() else {
                self.end_burst(guard, position);
                return;
            };

            let seqnum = guard.seek_seqnum;
            drop(guard);

            trace!("Serving {}", entry.timestamp);
            let end = entry.end();
            let result = self.downstream.push(entry);

            guard = self.lock_state();
            if guard.seek_seqnum != seqnum {
                // Result belongs to the flushed range
                return;
            }

            match result {
                Ok(()) => {
                    debug_assert!(end > guard.requested.position);
                    guard.requested.position = end;
                    guard.last_flow = None;
                    self.stats.record_served();
                }
                Err(err) => {
                    guard.last_flow = Some(err.clone());
                    drop(guard);
                    self.stats.record_downstream_failure();
                    if err == FlowError::Flushing {
                        debug!("Downstream flushing at {}", position);
                    } else {
                        error!("Downstream refused {}: {}", position, err);
                        self.post(MessageKind::Error(CacheError::Flow(err)));
                    }
                    return;
                }
            }
        }
    }

    /// Nothing covers `position`: stall, report stale requests.
    fn end_burst(&self, mut guard: MutexGuard<'_, CacheState>, position: ClockTime) {
        let first = guard.store.first().map(|e| e.timestamp);
        let stale = first.filter(|&first| position < first && guard.stale_reported != Some(position));
        let missed = guard.missed_at != Some(position);
        if stale.is_some() {
            guard.stale_reported = Some(position);
        }
        guard.missed_at = Some(position);
        drop(guard);

        if missed {
            self.stats.record_miss();
            trace!("Nothing cached at {}", position);
        }

        if let Some(first) = stale {
            error!("Requested {} was evicted, first cached entry is {}", position, first);
            self.stats.record_stale_request();
            self.post(MessageKind::Error(CacheError::StaleRequest { position, first }));
        }
    }

    // --- refill ---

    fn schedule_refill(&self) {
        let this = self.this.clone();
        let epoch = self.epoch.load(Ordering::Acquire);
        self.deferred.execute_with_epoch(epoch, move || {
            if let Some(inner) = this.upgrade() {
                inner.maybe_request_more(epoch);
            }
        });
    }

    /// Evict, then ask upstream for the next range if one is due.
    fn maybe_request_more(&self, job_epoch: u64) {
        let control = self.control.lock().unwrap_or_else(|e| e.into_inner());

        let mut guard = self.lock_state();
        if guard.passthrough || self.epoch.load(Ordering::Acquire) != job_epoch {
            return;
        }

        let state = &mut *guard;
        let report = self.policy.make_room(&mut state.store, state.requested.position);
        self.after_eviction(state, report);
        if report.defer {
            return;
        }

        if state.tracker.forward_done() {
            if !state.forward_done_reported {
                state.forward_done_reported = true;
                drop(guard);
                drop(control);
                debug!("Forward fill done");
                self.post(MessageKind::ForwardFillDone);
            }
            return;
        }

        let requested_stop = state.requested.stop;
        let Some((start, stop)) = state.tracker.take_refill(requested_stop) else {
            return;
        };
        drop(guard);

        self.stats.record_range_request();
        debug!("Requesting [{}, {}) from upstream", start, stop);
        let result = self.upstream.send_event(Event::Seek(SeekEvent::range_request(start, stop)));
        if result.is_err() {
            self.lock_state().tracker.restore_pending_refill();
        }
        drop(control);

        self.post(MessageKind::RangeRequested { start, stop });
        if let Err(e) = result {
            warn!("Range request [{}, {}) failed: {}, retrying next cycle", start, stop, e);
            self.stats.record_upstream_failure();
            self.post(MessageKind::Warning(format!(
                "Upstream refused range [{}, {}): {}",
                start, stop, e
            )));
        }
    }
}

fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
