use chrono::{DateTime, Local};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Clock shared by the engine's callers: monotonic microseconds for the
/// shutdown timer, wall-clock time for records and log lines.
#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    start: Instant,
}

impl TimeBase {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Monotonic microseconds since start.
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Wall-clock microseconds since Unix epoch (for stored records only).
    pub fn unix_us(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64
    }

    pub fn local_now(&self) -> DateTime<Local> {
        Local::now()
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}
