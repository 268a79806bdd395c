//! Clock time in nanoseconds.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A pipeline clock value, in nanoseconds.
///
/// Displays as `h:mm:ss.nnnnnnnnn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero.
    pub const ZERO: ClockTime = ClockTime(0);

    /// Nanoseconds per second.
    pub const SECOND: u64 = 1_000_000_000;

    /// Creates a clock time from nanoseconds.
    #[must_use]
    pub const fn from_nseconds(ns: u64) -> Self {
        Self(ns)
    }

    /// Creates a clock time from milliseconds.
    #[must_use]
    pub const fn from_mseconds(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    /// Creates a clock time from whole seconds.
    #[must_use]
    pub const fn from_seconds(s: u64) -> Self {
        Self(s.saturating_mul(Self::SECOND))
    }

    /// Creates a clock time from fractional seconds. Negative and
    /// non-finite values clamp to zero.
    #[must_use]
    pub fn from_seconds_f64(s: f64) -> Self {
        if !s.is_finite() || s <= 0.0 {
            return Self::ZERO;
        }
        Self((s * Self::SECOND as f64) as u64)
    }

    /// Nanoseconds.
    #[must_use]
    pub const fn nseconds(self) -> u64 {
        self.0
    }

    /// Fractional seconds.
    #[must_use]
    pub fn seconds_f64(self) -> f64 {
        self.0 as f64 / Self::SECOND as f64
    }

    /// Saturating addition.
    #[must_use]
    pub const fn saturating_add(self, other: ClockTime) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl From<Duration> for ClockTime {
    fn from(d: Duration) -> Self {
        Self(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0 / Self::SECOND;
        let ns = self.0 % Self::SECOND;
        write!(
            f,
            "{}:{:02}:{:02}.{:09}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            ns
        )
    }
}
