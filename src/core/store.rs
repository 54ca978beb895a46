//! Time-ordered frame store
//!
//! Structure: BTreeMap<ClockTime, Entry>
//! - Key: entry timestamp (at most one entry per timestamp)
//! - Floor lookup via `range(..=position).next_back()`
//! - Prefix eviction via `split_off`
//!
//! Not synchronized; the owning cache serializes access with its data mutex.

use bytes::Bytes;
use log::debug;
use std::collections::BTreeMap;

use crate::core::clock::ClockTime;

/// One cached data unit.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub timestamp: ClockTime,
    /// Zero means unknown; such entries cover no position
    pub duration: ClockTime,
    pub payload: Bytes,
}

impl Entry {
    pub fn new(timestamp: ClockTime, duration: ClockTime, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            duration,
            payload: payload.into(),
        }
    }

    /// First timestamp after this entry
    pub fn end(&self) -> ClockTime {
        self.timestamp + self.duration
    }

    /// `timestamp <= position < timestamp + duration`
    pub fn covers(&self, position: ClockTime) -> bool {
        self.timestamp <= position && position < self.end()
    }

    /// Payload size in bytes
    pub fn mem(&self) -> usize {
        self.payload.len()
    }
}

/// Ordered entry container with byte accounting
#[derive(Debug, Default)]
pub struct TimeOrderedStore {
    entries: BTreeMap<ClockTime, Entry>,
    bytes: usize,
}

impl TimeOrderedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replacing any entry with the same timestamp.
    ///
    /// Returns the replaced entry.
    pub fn insert_or_replace(&mut self, entry: Entry) -> Option<Entry> {
        self.bytes += entry.mem();
        let old = self.entries.insert(entry.timestamp, entry);
        if let Some(ref old) = old {
            self.bytes = self.bytes.saturating_sub(old.mem());
            debug!("Replaced entry at {} ({} bytes)", old.timestamp, old.mem());
        }
        old
    }

    /// Entry with the largest timestamp <= `position`, if it covers `position`.
    pub fn find_covering(&self, position: ClockTime) -> Option<&Entry> {
        self.entries
            .range(..=position)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.covers(position))
    }

    /// Remove the entry covering `position`, if any.
    pub fn remove_covering(&mut self, position: ClockTime) -> Option<Entry> {
        let key = self.find_covering(position)?.timestamp;
        let removed = self.entries.remove(&key)?;
        self.bytes = self.bytes.saturating_sub(removed.mem());
        Some(removed)
    }

    /// Remove every entry with a timestamp strictly before `boundary`.
    ///
    /// Returns (entries removed, bytes freed).
    pub fn evict_before(&mut self, boundary: ClockTime) -> (usize, usize) {
        let kept = self.entries.split_off(&boundary);
        let evicted = std::mem::replace(&mut self.entries, kept);
        let freed: usize = evicted.values().map(Entry::mem).sum();
        self.bytes = self.bytes.saturating_sub(freed);
        (evicted.len(), freed)
    }

    /// Remove the oldest entry.
    pub fn pop_first(&mut self) -> Option<Entry> {
        let (_, entry) = self.entries.pop_first()?;
        self.bytes = self.bytes.saturating_sub(entry.mem());
        Some(entry)
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!("Clearing store: {} entries, {} bytes", self.entries.len(), self.bytes);
        }
        self.entries.clear();
        self.bytes = 0;
    }

    pub fn first(&self) -> Option<&Entry> {
        self.entries.first_key_value().map(|(_, e)| e)
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last_key_value().map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total payload bytes held
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> ClockTime {
        ClockTime::from_seconds(s)
    }

    fn entry(ts: u64, dur: u64, payload: &'static [u8]) -> Entry {
        Entry::new(secs(ts), secs(dur), Bytes::from_static(payload))
    }

    #[test]
    fn test_find_covering_floor_lookup() {
        let mut store = TimeOrderedStore::new();
        assert!(store.find_covering(secs(0)).is_none());

        // Inserted out of order, gap at [4, 6)
        for ts in [6, 0, 2, 3, 1] {
            store.insert_or_replace(entry(ts, 1, b"x"));
        }

        let ts: Vec<_> = store.iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![secs(0), secs(1), secs(2), secs(3), secs(6)]);

        let mid = secs(2) + ClockTime::from_mseconds(500);
        assert_eq!(store.find_covering(mid).map(|e| e.timestamp), Some(secs(2)));
        assert_eq!(store.find_covering(secs(3)).map(|e| e.timestamp), Some(secs(3)));
        assert!(store.find_covering(secs(4)).is_none());
        assert!(store.find_covering(secs(5)).is_none());
        assert_eq!(store.find_covering(secs(6)).map(|e| e.timestamp), Some(secs(6)));
        assert!(store.find_covering(secs(7)).is_none());
    }

    #[test]
    fn test_find_covering_before_first() {
        let mut store = TimeOrderedStore::new();
        store.insert_or_replace(entry(5, 1, b"x"));
        assert!(store.find_covering(secs(4)).is_none());
    }

    #[test]
    fn test_zero_duration_covers_nothing() {
        let mut store = TimeOrderedStore::new();
        store.insert_or_replace(entry(1, 0, b"x"));
        assert_eq!(store.len(), 1);
        assert!(store.find_covering(secs(1)).is_none());
    }

    #[test]
    fn test_replace_same_timestamp() {
        let mut store = TimeOrderedStore::new();
        store.insert_or_replace(entry(1, 1, b"first"));
        store.insert_or_replace(entry(2, 1, b"other"));

        let old = store.insert_or_replace(entry(1, 1, b"second!"));
        assert_eq!(old.map(|e| e.payload), Some(Bytes::from_static(b"first")));
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.find_covering(secs(1)).map(|e| e.payload.clone()),
            Some(Bytes::from_static(b"second!"))
        );
        assert_eq!(store.bytes(), b"second!".len() + b"other".len());
    }

    #[test]
    fn test_evict_before_and_accounting() {
        let mut store = TimeOrderedStore::new();
        for ts in 0..6 {
            store.insert_or_replace(entry(ts, 1, b"abcd"));
        }
        assert_eq!(store.bytes(), 24);

        let (count, freed) = store.evict_before(secs(2));
        assert_eq!((count, freed), (2, 8));
        assert_eq!(store.first().map(|e| e.timestamp), Some(secs(2)));
        assert_eq!(store.bytes(), 16);

        assert_eq!(store.evict_before(secs(0)), (0, 0));

        let removed = store.remove_covering(secs(3) + ClockTime::MSECOND);
        assert_eq!(removed.map(|e| e.timestamp), Some(secs(3)));
        assert_eq!(store.len(), 3);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.bytes(), 0);
    }
}
