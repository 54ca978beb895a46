//! Nanosecond time values used for timestamps, durations and positions.
//!
//! "Unset" is `Option<ClockTime>::None`, never a sentinel value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Time value in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ClockTime(u64);

impl ClockTime {
    pub const ZERO: ClockTime = ClockTime(0);
    pub const NSECOND: ClockTime = ClockTime(1);
    pub const MSECOND: ClockTime = ClockTime(1_000_000);
    pub const SECOND: ClockTime = ClockTime(1_000_000_000);
    pub const MAX: ClockTime = ClockTime(u64::MAX);

    pub const fn from_nseconds(ns: u64) -> Self {
        ClockTime(ns)
    }

    pub const fn from_mseconds(ms: u64) -> Self {
        ClockTime(ms.saturating_mul(1_000_000))
    }

    pub const fn from_seconds(s: u64) -> Self {
        ClockTime(s.saturating_mul(1_000_000_000))
    }

    /// Fractional seconds, clamped at zero (CLI input).
    pub fn from_seconds_f64(s: f64) -> Self {
        if s.is_finite() && s > 0.0 {
            ClockTime((s * 1_000_000_000.0).round() as u64)
        } else {
            ClockTime::ZERO
        }
    }

    pub const fn nseconds(self) -> u64 {
        self.0
    }

    pub const fn mseconds(self) -> u64 {
        self.0 / 1_000_000
    }

    pub fn seconds_f64(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn saturating_add(self, rhs: ClockTime) -> ClockTime {
        ClockTime(self.0.saturating_add(rhs.0))
    }

    pub const fn saturating_sub(self, rhs: ClockTime) -> ClockTime {
        ClockTime(self.0.saturating_sub(rhs.0))
    }

    pub fn checked_sub(self, rhs: ClockTime) -> Option<ClockTime> {
        self.0.checked_sub(rhs.0).map(ClockTime)
    }
}

// Saturating: timestamps near u64::MAX must not wrap around into the past.
impl Add for ClockTime {
    type Output = ClockTime;
    fn add(self, rhs: ClockTime) -> ClockTime {
        self.saturating_add(rhs)
    }
}

impl AddAssign for ClockTime {
    fn add_assign(&mut self, rhs: ClockTime) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub for ClockTime {
    type Output = ClockTime;
    fn sub(self, rhs: ClockTime) -> ClockTime {
        self.saturating_sub(rhs)
    }
}

impl From<std::time::Duration> for ClockTime {
    fn from(d: std::time::Duration) -> Self {
        ClockTime(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl From<ClockTime> for std::time::Duration {
    fn from(t: ClockTime) -> Self {
        std::time::Duration::from_nanos(t.0)
    }
}

/// `h:mm:ss.nnnnnnnnn`
impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = self.0 % 1_000_000_000;
        let total_s = self.0 / 1_000_000_000;
        let h = total_s / 3600;
        let m = (total_s / 60) % 60;
        let s = total_s % 60;
        write!(f, "{}:{:02}:{:02}.{:09}", h, m, s, ns)
    }
}

/// Display helper for optional times (`--:--:--.---------` when unset).
pub struct DisplayOpt(pub Option<ClockTime>);

impl fmt::Display for DisplayOpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(t) => t.fmt(f),
            None => f.write_str("--:--:--.---------"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let t = ClockTime::from_seconds(3725) + ClockTime::from_mseconds(5);
        assert_eq!(t.to_string(), "1:02:05.005000000");
        assert_eq!(DisplayOpt(None).to_string(), "--:--:--.---------");
    }

    #[test]
    fn test_saturating_arithmetic() {
        assert_eq!(ClockTime::MAX + ClockTime::SECOND, ClockTime::MAX);
        assert_eq!(ClockTime::ZERO - ClockTime::SECOND, ClockTime::ZERO);
        assert_eq!(ClockTime::ZERO.checked_sub(ClockTime::NSECOND), None);
    }

    #[test]
    fn test_seconds_f64() {
        assert_eq!(ClockTime::from_seconds_f64(1.5), ClockTime::from_mseconds(1500));
        assert_eq!(ClockTime::from_seconds_f64(-2.0), ClockTime::ZERO);
        assert_eq!(ClockTime::from_seconds_f64(f64::NAN), ClockTime::ZERO);
    }
}
