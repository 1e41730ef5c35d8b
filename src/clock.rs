//! Adjusted-time sources for the future-timestamp rule

use std::time::{SystemTime, UNIX_EPOCH};

pub trait TimeSource: Send + Sync {
    /// Network-adjusted time, seconds since the Unix epoch
    fn adjusted_time(&self) -> i64;
}

/// Local wall clock plus a fixed peer-derived offset
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource {
    pub offset: i64,
}

impl TimeSource for SystemTimeSource {
    fn adjusted_time(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        now + self.offset
    }
}

/// A frozen clock
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource(pub i64);

impl TimeSource for FixedTimeSource {
    fn adjusted_time(&self) -> i64 {
        self.0
    }
}
