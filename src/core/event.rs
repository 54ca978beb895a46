//! Events crossing the element boundary in either direction.
//!
//! Sink side (from upstream): caps, segment, EOS, flush pairs.
//! Src side (from downstream): seeks and QoS. Range requests the cache
//! sends upstream are plain seeks with `KEY_UNIT | SNAP_BEFORE | FLUSH`.

use bitflags::bitflags;
use std::fmt;

use crate::core::clock::ClockTime;
use crate::core::segment::Segment;

/// Unit of seek/segment values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Nanosecond timestamps
    #[default]
    Time,
    /// Frame/sample counts
    Default,
    /// Byte offsets
    Bytes,
}

bitflags! {
    /// Seek behaviour flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SeekFlags: u32 {
        /// Flush in-flight data before serving the new position
        const FLUSH = 1 << 0;
        /// Accurate positioning, no keyframe snapping
        const ACCURATE = 1 << 1;
        /// Align the range start on a key unit
        const KEY_UNIT = 1 << 2;
        /// Snap to the key unit before the requested position
        const SNAP_BEFORE = 1 << 5;
        /// Snap to the key unit after the requested position
        const SNAP_AFTER = 1 << 6;
    }
}

/// How a seek start/stop value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekType {
    /// Leave the current value unchanged
    None,
    /// Absolute value
    Set,
    /// Relative to the segment duration (value is subtracted from it)
    End,
}

/// Seek request `{rate, format, flags, start_type, start, stop_type, stop}`
#[derive(Debug, Clone, PartialEq)]
pub struct SeekEvent {
    pub rate: f64,
    pub format: Format,
    pub flags: SeekFlags,
    pub start_type: SeekType,
    pub start: Option<ClockTime>,
    pub stop_type: SeekType,
    pub stop: Option<ClockTime>,
}

impl SeekEvent {
    /// Flushing absolute time seek to `[start, stop)`
    pub fn new(start: ClockTime, stop: Option<ClockTime>) -> Self {
        Self {
            rate: 1.0,
            format: Format::Time,
            flags: SeekFlags::FLUSH | SeekFlags::ACCURATE,
            start_type: SeekType::Set,
            start: Some(start),
            stop_type: if stop.is_some() { SeekType::Set } else { SeekType::None },
            stop,
        }
    }

    /// Range request sent upstream to fill `[start, stop)`
    pub fn range_request(start: ClockTime, stop: ClockTime) -> Self {
        Self {
            rate: 1.0,
            format: Format::Time,
            flags: SeekFlags::KEY_UNIT | SeekFlags::SNAP_BEFORE | SeekFlags::FLUSH,
            start_type: SeekType::Set,
            start: Some(start),
            stop_type: SeekType::Set,
            stop: Some(stop),
        }
    }

    pub fn with_flags(mut self, flags: SeekFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }
}

/// Format description of the data flowing through the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caps {
    pub media_type: String,
    pub fields: Vec<(String, String)>,
}

impl Caps {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((name.into(), value.to_string()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.media_type)?;
        for (name, value) in &self.fields {
            write!(f, ", {}={}", name, value)?;
        }
        Ok(())
    }
}

/// Quality-of-service report from downstream (accepted, not acted upon)
#[derive(Debug, Clone, PartialEq)]
pub struct QosEvent {
    pub proportion: f64,
    pub diff: i64,
    pub timestamp: ClockTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Caps(Caps),
    Segment(Segment),
    Eos,
    FlushStart,
    FlushStop { reset_time: bool },
    Seek(SeekEvent),
    Qos(QosEvent),
    /// Anything the cache does not interpret; forwarded as-is
    Custom(String),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Caps(_) => "caps",
            Event::Segment(_) => "segment",
            Event::Eos => "eos",
            Event::FlushStart => "flush-start",
            Event::FlushStop { .. } => "flush-stop",
            Event::Seek(_) => "seek",
            Event::Qos(_) => "qos",
            Event::Custom(_) => "custom",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_request_flags() {
        let seek = SeekEvent::range_request(ClockTime::SECOND, ClockTime::from_seconds(3));
        assert!(seek.flags.contains(SeekFlags::FLUSH));
        assert!(seek.flags.contains(SeekFlags::KEY_UNIT | SeekFlags::SNAP_BEFORE));
        assert_eq!(seek.start_type, SeekType::Set);
        assert_eq!(seek.stop, Some(ClockTime::from_seconds(3)));
    }

    #[test]
    fn test_caps_fields() {
        let caps = Caps::new("video/x-raw").field("width", 640).field("height", 480);
        assert_eq!(caps.get("width"), Some("640"));
        assert_eq!(caps.get("format"), None);
        assert_eq!(caps.to_string(), "video/x-raw, width=640, height=480");
    }
}
