//! Wall-clock helpers and the per-node version clock

use crate::types::Version;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in nanoseconds
pub fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Current unix time in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Issues record versions from the wall clock.
///
/// Versions are strictly increasing per clock even if the system time steps
/// backwards, and never fall behind a version the clock has observed from a
/// peer, so a local write always beats whatever copy it replaces.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next version: `max(now, last + 1)`
    pub fn next(&self) -> Version {
        let now = unix_nanos();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Version(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    /// Advance past a version seen on another node
    pub fn observe(&self, version: Version) {
        self.last.fetch_max(version.0, Ordering::AcqRel);
    }
}
