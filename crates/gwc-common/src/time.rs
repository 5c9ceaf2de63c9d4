//! GPS timestamps with nanosecond precision.
//!
//! Trigger end times arrive as (seconds, nanoseconds) pairs and the
//! coincidence window test must be exact at the nanosecond level, so the
//! timestamp type keeps integer components and only converts to `f64`
//! for rate/segment bookkeeping where sub-microsecond precision does not
//! matter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Sub;

const NS_PER_S: i64 = 1_000_000_000;

/// A GPS timestamp: integer seconds plus nanoseconds in `[0, 1e9)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GpsTime {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl GpsTime {
    pub fn new(seconds: i64, nanoseconds: u32) -> Self {
        debug_assert!(nanoseconds < NS_PER_S as u32);
        GpsTime {
            seconds,
            nanoseconds,
        }
    }

    /// Build from fractional seconds. Accurate to 1 ns for times below
    /// ~1e8 s; adequate everywhere it is used (tests, synthetic data).
    pub fn from_secs_f64(t: f64) -> Self {
        let seconds = t.floor() as i64;
        let frac = t - seconds as f64;
        let mut ns = (frac * NS_PER_S as f64).round() as i64;
        let mut s = seconds;
        if ns >= NS_PER_S {
            s += 1;
            ns -= NS_PER_S;
        }
        GpsTime::new(s, ns as u32)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.nanoseconds as f64 / NS_PER_S as f64
    }

    /// Total nanoseconds since the GPS epoch.
    pub fn total_ns(&self) -> i128 {
        self.seconds as i128 * NS_PER_S as i128 + self.nanoseconds as i128
    }

    /// Absolute difference in seconds, exact in the integer domain.
    pub fn abs_diff_secs(&self, other: &GpsTime) -> f64 {
        let dns = (self.total_ns() - other.total_ns()).unsigned_abs();
        dns as f64 / NS_PER_S as f64
    }
}

impl Sub for GpsTime {
    type Output = f64;

    /// Signed difference `self - other` in seconds.
    fn sub(self, other: GpsTime) -> f64 {
        (self.total_ns() - other.total_ns()) as f64 / NS_PER_S as f64
    }
}

impl fmt::Display for GpsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_exact() {
        let a = GpsTime::new(100, 999_999_999);
        let b = GpsTime::new(101, 0);
        assert!(a < b);
        assert_eq!(b - a, 1e-9);
    }

    #[test]
    fn test_from_secs_f64_round_trip() {
        let t = GpsTime::from_secs_f64(100.015);
        assert_eq!(t.seconds, 100);
        assert!((t.as_secs_f64() - 100.015).abs() < 1e-9);
    }

    #[test]
    fn test_abs_diff() {
        let a = GpsTime::from_secs_f64(100.000);
        let b = GpsTime::from_secs_f64(100.015);
        assert!((a.abs_diff_secs(&b) - 0.015).abs() < 1e-9);
    }

    #[test]
    fn test_carry_on_rounding() {
        let t = GpsTime::from_secs_f64(99.9999999996);
        assert_eq!(t.seconds, 100);
        assert_eq!(t.nanoseconds, 0);
    }
}
