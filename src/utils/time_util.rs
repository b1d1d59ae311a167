use bincode::{Decode, Encode};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An on-disk timestamp: seconds since [UNIX_EPOCH] plus a nanosecond
/// fraction.
#[derive(Encode, Decode, Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TimeSpec {
    /// seconds
    pub sec: u64,
    /// fraction of a second in nanoseconds
    pub nsec: u32,
}

/// The current time as a [TimeSpec].
pub fn now() -> TimeSpec {
    SystemTime::now().into()
}

impl From<TimeSpec> for SystemTime {
    fn from(value: TimeSpec) -> Self {
        UNIX_EPOCH + Duration::new(value.sec, value.nsec)
    }
}

impl From<SystemTime> for TimeSpec {
    // times before the epoch clamp to it
    fn from(value: SystemTime) -> Self {
        let duration = value.duration_since(UNIX_EPOCH).unwrap_or_default();
        TimeSpec {
            sec: duration.as_secs(),
            nsec: duration.subsec_nanos(),
        }
    }
}
