use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in time in `FILETIME` representation.
///
/// Counts 100-nanosecond intervals since January 1, 1601 (UTC). A zero value
/// means "not set", e.g. the exit time of a process that is still running.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FileTime(pub u64);

impl FileTime {
    /// Number of `FILETIME` ticks in one second.
    pub const TICKS_PER_SECOND: u64 = 10_000_000;

    /// Seconds between 1601-01-01 and 1970-01-01.
    const UNIX_EPOCH_SECONDS: u64 = 11_644_473_600;

    /// Creates a new `FileTime` from raw ticks.
    pub const fn new(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Creates a new `FileTime` from the low and high parts of a `FILETIME`.
    pub const fn from_parts(low: u32, high: u32) -> Self {
        Self(((high as u64) << 32) | low as u64)
    }

    /// Creates a new `FileTime` from seconds since the Unix epoch.
    pub const fn from_unix_seconds(seconds: u64) -> Self {
        Self((seconds + Self::UNIX_EPOCH_SECONDS) * Self::TICKS_PER_SECOND)
    }

    /// Checks if the time is not set.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Returns the time elapsed between `self` and a later time `now`.
    ///
    /// Returns `None` if `now` is not later than `self`.
    pub fn elapsed_until(&self, now: FileTime) -> Option<Duration> {
        let ticks = now.0.checked_sub(self.0).filter(|&ticks| ticks > 0)?;

        Some(Duration::new(
            ticks / Self::TICKS_PER_SECOND,
            ((ticks % Self::TICKS_PER_SECOND) * 100) as u32,
        ))
    }

    /// Returns the number of whole seconds between `self` and `now`,
    /// saturating at zero.
    pub fn seconds_until(&self, now: FileTime) -> u64 {
        now.0.saturating_sub(self.0) / Self::TICKS_PER_SECOND
    }

    /// Converts the time to a UTC date and time.
    ///
    /// Returns `None` for times before the Unix epoch or out of range.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let seconds = (self.0 / Self::TICKS_PER_SECOND).checked_sub(Self::UNIX_EPOCH_SECONDS)?;
        let nanos = (self.0 % Self::TICKS_PER_SECOND) * 100;

        DateTime::from_timestamp(i64::try_from(seconds).ok()?, nanos as u32)
    }
}

impl From<u64> for FileTime {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<FileTime> for u64 {
    fn from(value: FileTime) -> Self {
        value.0
    }
}

impl std::fmt::Display for FileTime {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> ::std::fmt::Result {
        match self.to_datetime() {
            Some(datetime) => write!(f, "{}", datetime.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "{}", self.0),
        }
    }
}
