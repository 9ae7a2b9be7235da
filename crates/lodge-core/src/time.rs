//! Timestamps.
//!
//! Modification times and token expiries are carried as whole seconds since
//! the Unix epoch.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Timestamp in seconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Creates a new timestamp from seconds since Unix epoch.
    pub const fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the current time as a timestamp.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now()).unwrap_or_default()
    }

    /// Returns the seconds since Unix epoch.
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Creates from a SystemTime. Times before the epoch yield `None`.
    pub fn from_system_time(time: SystemTime) -> Option<Self> {
        time.duration_since(UNIX_EPOCH).ok().map(|d| Self(d.as_secs()))
    }

    /// Converts to a SystemTime.
    pub fn to_system_time(&self) -> Option<SystemTime> {
        UNIX_EPOCH.checked_add(Duration::from_secs(self.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(secs: u64) -> Self {
        Self(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_roundtrip() {
        let ts = Timestamp::new(1_700_000_000);
        let st = ts.to_system_time().unwrap();
        assert_eq!(Timestamp::from_system_time(st), Some(ts));
    }

    #[test]
    fn test_before_epoch() {
        let st = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(Timestamp::from_system_time(st), None);
    }

    #[test]
    fn test_now_is_recent() {
        assert!(Timestamp::now().as_secs() > 1_600_000_000);
    }
}
