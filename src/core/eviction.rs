//! "Make room" policy: soft duration and byte bounds for the store.
//!
//! Both limits are soft. They are checked after inserts and on refill
//! decisions only, so the store may exceed them between two checks.
//!
//! Duration bound, in order:
//! 1. span of the store `<= duration_limit` -> nothing to do
//! 2. `position + duration_limit < last` -> defer: cache is far enough
//!    ahead of playback, no new upstream requests this cycle
//! 3. otherwise drop entries older than `last - duration_limit` (the entry
//!    covering that boundary is kept)
//!
//! Byte bound: drop oldest entries while over `size_limit`, never touching
//! the entry at the playback position or anything after it.

use log::{debug, info, trace};
use sysinfo::System;

use crate::core::clock::ClockTime;
use crate::core::store::TimeOrderedStore;

/// Outcome of one make-room cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoomReport {
    /// Back-pressure: do not request more upstream data now
    pub defer: bool,
    /// Entries dropped this cycle
    pub evicted: usize,
    /// Payload bytes dropped this cycle
    pub freed: usize,
}

#[derive(Debug, Clone)]
pub struct EvictionPolicy {
    duration_limit: ClockTime,
    size_limit: u64,
    enforce_size: bool,
}

impl EvictionPolicy {
    pub fn new(duration_limit: ClockTime, size_limit: u64, enforce_size: bool) -> Self {
        Self {
            duration_limit,
            size_limit,
            enforce_size,
        }
    }

    /// Same as `new`, with the byte limit clamped to the memory currently
    /// available on the host.
    pub fn with_memory_clamp(duration_limit: ClockTime, size_limit: u64, enforce_size: bool) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let available = sys.available_memory();

        // Unknown on some sandboxes: keep the configured value
        let clamped = if available == 0 { size_limit } else { size_limit.min(available) };

        info!(
            "Eviction policy: duration={} size={} MB (configured {} MB, available {} MB) enforce_size={}",
            duration_limit,
            clamped / 1024 / 1024,
            size_limit / 1024 / 1024,
            available / 1024 / 1024,
            enforce_size
        );

        Self::new(duration_limit, clamped, enforce_size)
    }

    pub fn duration_limit(&self) -> ClockTime {
        self.duration_limit
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    /// Check both bounds against the requested playback `position`.
    pub fn make_room(&self, store: &mut TimeOrderedStore, position: ClockTime) -> RoomReport {
        let mut report = self.apply_duration_bound(store, position);

        if store.bytes() as u64 > self.size_limit {
            if self.enforce_size {
                let (count, freed) = self.apply_size_bound(store, position);
                report.evicted += count;
                report.freed += freed;
            } else {
                debug!(
                    "Store holds {} bytes, over soft limit {} (not enforced)",
                    store.bytes(),
                    self.size_limit
                );
            }
        }

        report
    }

    fn apply_duration_bound(&self, store: &mut TimeOrderedStore, position: ClockTime) -> RoomReport {
        let (Some(first), Some(last)) = (store.first(), store.last()) else {
            return RoomReport::default();
        };
        let (first, last) = (first.timestamp, last.timestamp);

        trace!("Making room: first={} last={} position={}", first, last, position);

        if last - first <= self.duration_limit {
            return RoomReport::default();
        }

        if position + self.duration_limit < last {
            debug!("Cache is {} ahead of playback, deferring", last - position);
            return RoomReport {
                defer: true,
                ..Default::default()
            };
        }

        let boundary = last - self.duration_limit;
        let keep_from = store
            .find_covering(boundary)
            .map(|e| e.timestamp)
            .unwrap_or(boundary);
        let (evicted, freed) = store.evict_before(keep_from);

        if evicted > 0 {
            debug!("Evicted {} entries ({} bytes) older than {}", evicted, freed, keep_from);
        }

        RoomReport {
            defer: false,
            evicted,
            freed,
        }
    }

    fn apply_size_bound(&self, store: &mut TimeOrderedStore, position: ClockTime) -> (usize, usize) {
        let protect_from = store
            .find_covering(position)
            .map(|e| e.timestamp)
            .unwrap_or(position);

        let mut count = 0;
        let mut freed = 0;
        while store.bytes() as u64 > self.size_limit
            && store.first().is_some_and(|e| e.timestamp < protect_from)
        {
            if let Some(entry) = store.pop_first() {
                count += 1;
                freed += entry.mem();
            }
        }

        if count > 0 {
            debug!(
                "Size bound evicted {} entries ({} bytes), store now {} bytes",
                count,
                freed,
                store.bytes()
            );
        }
        (count, freed)
    }
}
