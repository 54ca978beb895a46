//! Playback segments and the cached-span state machine.
//!
//! - `Segment`: the downstream-requested playback window plus standard
//!   seek arithmetic (`do_seek`).
//! - `SegmentTracker`: the span `[start, stop)` the cache is authoritative
//!   for, and the two booleans that drive refill requests.

use log::debug;
use std::fmt;

use crate::core::clock::{ClockTime, DisplayOpt};
use crate::core::error::CacheError;
use crate::core::event::{Format, SeekEvent, SeekFlags, SeekType};

/// Playback window `{rate, start, stop, position}`
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub rate: f64,
    pub format: Format,
    pub flags: SeekFlags,
    pub start: ClockTime,
    /// `None` = play until upstream runs dry
    pub stop: Option<ClockTime>,
    /// Stream time corresponding to `start`
    pub time: ClockTime,
    /// Next timestamp to emit
    pub position: ClockTime,
    pub duration: Option<ClockTime>,
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            rate: 1.0,
            format: Format::Time,
            flags: SeekFlags::empty(),
            start: ClockTime::ZERO,
            stop: None,
            time: ClockTime::ZERO,
            position: ClockTime::ZERO,
            duration: None,
        }
    }
}

impl Segment {
    /// Time segment covering `[start, stop)`
    pub fn new_time(start: ClockTime, stop: Option<ClockTime>) -> Self {
        Self {
            start,
            stop,
            time: start,
            position: start,
            ..Default::default()
        }
    }

    /// Apply a seek. On error the segment is left untouched.
    ///
    /// Returns true when the playback position changed.
    pub fn do_seek(&mut self, seek: &SeekEvent) -> Result<bool, CacheError> {
        if !seek.rate.is_finite() || seek.rate == 0.0 {
            return Err(CacheError::InvalidSeek(format!("rate {} not allowed", seek.rate)));
        }
        if seek.rate < 0.0 {
            return Err(CacheError::InvalidSeek("reverse playback is not supported".into()));
        }
        if seek.format != self.format {
            return Err(CacheError::FormatUnavailable(seek.format));
        }

        let mut start = match seek.start_type {
            SeekType::None => self.start,
            SeekType::Set => seek.start.unwrap_or(ClockTime::ZERO),
            SeekType::End => {
                let duration = self
                    .duration
                    .ok_or_else(|| CacheError::InvalidSeek("end-relative start without duration".into()))?;
                duration - seek.start.unwrap_or(ClockTime::ZERO)
            }
        };
        let mut stop = match seek.stop_type {
            SeekType::None => self.stop,
            SeekType::Set => seek.stop,
            SeekType::End => {
                let duration = self
                    .duration
                    .ok_or_else(|| CacheError::InvalidSeek("end-relative stop without duration".into()))?;
                Some(duration - seek.stop.unwrap_or(ClockTime::ZERO))
            }
        };

        if let Some(duration) = self.duration {
            start = start.min(duration);
            stop = stop.map(|s| s.min(duration));
        }

        if let Some(stop) = stop
            && start >= stop
        {
            return Err(CacheError::InvalidSeek(format!("start {} not before stop {}", start, stop)));
        }

        let update = self.position != start;
        self.rate = seek.rate;
        self.flags = seek.flags;
        self.start = start;
        self.stop = stop;
        self.time = start;
        self.position = start;

        Ok(update)
    }

    /// Whether `position` lies within `[start, stop)`
    pub fn contains(&self, position: ClockTime) -> bool {
        position >= self.start && self.stop.is_none_or(|stop| position < stop)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "segment rate={} format={:?} start={} stop={} time={} position={}",
            self.rate,
            self.format,
            self.start,
            DisplayOpt(self.stop),
            self.time,
            self.position
        )
    }
}

/// Span bookkeeping: what has been requested from and delivered by upstream.
#[derive(Debug, Clone)]
pub struct SegmentTracker {
    start: Option<ClockTime>,
    stop: Option<ClockTime>,
    /// Upstream announced a range without a stop
    open_ended: bool,
    /// Upstream finished delivering the last requested range
    segment_done: bool,
    /// Read-ahead budget satisfied, no more range requests
    forward_done: bool,
    lookahead: ClockTime,
}

impl SegmentTracker {
    pub fn new(lookahead: ClockTime) -> Self {
        Self {
            start: None,
            stop: None,
            open_ended: false,
            segment_done: false,
            forward_done: false,
            lookahead,
        }
    }

    pub fn start(&self) -> Option<ClockTime> {
        self.start
    }

    /// `None` while unset or open-ended
    pub fn stop(&self) -> Option<ClockTime> {
        if self.open_ended { None } else { self.stop }
    }

    pub fn is_open_ended(&self) -> bool {
        self.open_ended
    }

    pub fn segment_done(&self) -> bool {
        self.segment_done
    }

    pub fn forward_done(&self) -> bool {
        self.forward_done
    }

    /// `start <= position < stop`
    pub fn contains(&self, position: ClockTime) -> bool {
        let Some(start) = self.start else {
            return false;
        };
        if position < start {
            return false;
        }
        if self.open_ended {
            return true;
        }
        self.stop.is_some_and(|stop| position < stop)
    }

    /// Upstream announced the range it is about to deliver.
    ///
    /// Only a range overlapping or adjoining the span is merged, so the span
    /// never covers a gap. Returns false for a disjoint range.
    pub fn on_segment(&mut self, start: ClockTime, stop: Option<ClockTime>) -> bool {
        if !self.touches(start, stop) {
            debug!(
                "Segment [{}, {}) disjoint from span [{}, {}), ignored",
                start,
                DisplayOpt(stop),
                DisplayOpt(self.start),
                DisplayOpt(self.stop())
            );
            return false;
        }

        if self.start.is_none_or(|s| s > start) {
            self.start = Some(start);
        }
        match stop {
            Some(stop) => {
                if self.stop.is_none_or(|s| s < stop) {
                    self.stop = Some(stop);
                }
            }
            None => self.open_ended = true,
        }

        self.forward_done = match (self.open_ended, self.stop) {
            (false, Some(span_stop)) => start + self.lookahead > span_stop,
            _ => true,
        };

        debug!(
            "Span now [{}, {}) open_ended={} forward_done={}",
            DisplayOpt(self.start),
            DisplayOpt(self.stop),
            self.open_ended,
            self.forward_done
        );
        true
    }

    /// `[start, stop)` overlaps or adjoins the span. Anything touches an
    /// unset span.
    fn touches(&self, start: ClockTime, stop: Option<ClockTime>) -> bool {
        let Some(span_start) = self.start else {
            return true;
        };
        let below_end = self.open_ended || self.stop.is_none_or(|span_stop| start <= span_stop);
        let above_start = stop.is_none_or(|stop| stop >= span_start);
        below_end && above_start
    }

    /// Upstream reached the end of the requested range.
    pub fn on_range_complete(&mut self) {
        self.segment_done = true;
    }

    /// Collapse the span to the point `[position, position)`.
    pub fn reset(&mut self, position: ClockTime) {
        self.start = Some(position);
        self.stop = Some(position);
        self.open_ended = false;
        self.segment_done = true;
        self.forward_done = false;
    }

    /// Eviction moved the first retained timestamp.
    pub fn set_start(&mut self, start: ClockTime) {
        self.start = Some(start);
    }

    /// Next range to request from upstream, if one is due.
    ///
    /// Clears `segment_done`; the caller restores it with
    /// `restore_pending_refill` when the request could not be sent.
    pub fn take_refill(&mut self, requested_stop: Option<ClockTime>) -> Option<(ClockTime, ClockTime)> {
        if self.forward_done || !self.segment_done || self.open_ended {
            return None;
        }
        let from = self.stop?;
        let mut to = from + self.lookahead;
        if let Some(requested_stop) = requested_stop {
            to = to.min(requested_stop);
        }
        if to <= from {
            // Requested segment fully covered
            self.forward_done = true;
            return None;
        }
        self.segment_done = false;
        Some((from, to))
    }

    pub fn restore_pending_refill(&mut self) {
        self.segment_done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> ClockTime {
        ClockTime::from_seconds(s)
    }

    #[test]
    fn test_do_seek_absolute() {
        let mut segment = Segment::default();
        let update = segment.do_seek(&SeekEvent::new(secs(2), Some(secs(8)))).unwrap();
        assert!(update);
        assert_eq!(segment.start, secs(2));
        assert_eq!(segment.stop, Some(secs(8)));
        assert_eq!(segment.position, secs(2));
        assert!(segment.contains(segment.position));
    }

    #[test]
    fn test_do_seek_keeps_unset_values() {
        let mut segment = Segment::new_time(secs(1), Some(secs(9)));
        let mut seek = SeekEvent::new(secs(4), None);
        seek.stop_type = SeekType::None;
        segment.do_seek(&seek).unwrap();
        assert_eq!(segment.start, secs(4));
        assert_eq!(segment.stop, Some(secs(9)));
    }

    #[test]
    fn test_do_seek_end_relative() {
        let mut segment = Segment {
            duration: Some(secs(10)),
            ..Default::default()
        };
        let mut seek = SeekEvent::new(secs(3), None);
        seek.start_type = SeekType::End;
        segment.do_seek(&seek).unwrap();
        assert_eq!(segment.start, secs(7));

        let mut no_duration = Segment::default();
        assert!(matches!(no_duration.do_seek(&seek), Err(CacheError::InvalidSeek(_))));
    }

    #[test]
    fn test_do_seek_rejects_invalid() {
        let mut segment = Segment::new_time(secs(1), None);
        let before = segment.clone();

        let backwards = SeekEvent::new(secs(5), Some(secs(2)));
        assert!(matches!(segment.do_seek(&backwards), Err(CacheError::InvalidSeek(_))));

        let reverse = SeekEvent::new(secs(2), None).with_rate(-1.0);
        assert!(matches!(segment.do_seek(&reverse), Err(CacheError::InvalidSeek(_))));

        let bytes = SeekEvent::new(secs(2), None).with_format(Format::Bytes);
        assert_eq!(segment.do_seek(&bytes), Err(CacheError::FormatUnavailable(Format::Bytes)));

        assert_eq!(segment, before);
    }

    #[test]
    fn test_tracker_union_and_forward_done() {
        let mut tracker = SegmentTracker::new(secs(2));
        tracker.reset(secs(0));
        assert!(!tracker.contains(secs(0)));

        assert!(tracker.on_segment(secs(0), Some(secs(2))));
        assert_eq!(tracker.start(), Some(secs(0)));
        assert_eq!(tracker.stop(), Some(secs(2)));
        assert!(!tracker.forward_done());
        assert!(tracker.contains(secs(1)));

        // Short range (clamped by requested stop) satisfies the read-ahead
        tracker.on_segment(secs(2), Some(secs(3)));
        assert_eq!(tracker.stop(), Some(secs(3)));
        assert!(tracker.forward_done());
    }

    #[test]
    fn test_tracker_ignores_disjoint_range() {
        let mut tracker = SegmentTracker::new(secs(2));
        tracker.reset(secs(6));

        // Answer to a request built before the reset
        assert!(!tracker.on_segment(secs(2), Some(secs(4))));
        assert_eq!(tracker.start(), Some(secs(6)));
        assert_eq!(tracker.stop(), Some(secs(6)));
        assert!(!tracker.contains(secs(4)));

        // Key-unit snap may start the answer before the span
        assert!(tracker.on_segment(ClockTime::from_mseconds(5500), Some(secs(8))));
        assert_eq!(tracker.start(), Some(ClockTime::from_mseconds(5500)));
        assert_eq!(tracker.stop(), Some(secs(8)));

        // Adjoining ranges extend the span
        assert!(tracker.on_segment(secs(8), Some(secs(10))));
        assert!(!tracker.on_segment(secs(11), None));
        assert!(!tracker.is_open_ended());
        assert_eq!(tracker.stop(), Some(secs(10)));
    }

    #[test]
    fn test_tracker_refill_cycle() {
        let mut tracker = SegmentTracker::new(secs(2));
        tracker.reset(secs(4));

        assert_eq!(tracker.take_refill(None), Some((secs(4), secs(6))));
        // Request in flight
        assert_eq!(tracker.take_refill(None), None);

        tracker.on_segment(secs(4), Some(secs(6)));
        tracker.on_range_complete();
        assert_eq!(tracker.take_refill(Some(secs(7))), Some((secs(6), secs(7))));

        tracker.restore_pending_refill();
        assert!(tracker.segment_done());
    }

    #[test]
    fn test_tracker_refill_stops_at_requested_stop() {
        let mut tracker = SegmentTracker::new(secs(2));
        tracker.reset(secs(5));
        assert_eq!(tracker.take_refill(Some(secs(5))), None);
        assert!(tracker.forward_done());
    }

    #[test]
    fn test_tracker_open_ended() {
        let mut tracker = SegmentTracker::new(secs(2));
        tracker.on_segment(secs(0), None);
        assert!(tracker.is_open_ended());
        assert!(tracker.forward_done());
        assert!(tracker.contains(secs(1000)));
        tracker.on_range_complete();
        assert_eq!(tracker.take_refill(None), None);
    }
}
