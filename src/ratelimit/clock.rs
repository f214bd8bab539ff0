//! Window clock.
//!
//! Fixed windows are implicit in whichever counter record exists for a key;
//! the only thing the stores need from the clock is "now" in epoch seconds
//! and a way to decide whether a record's window has elapsed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of wall-clock time in whole epoch seconds.
pub trait Clock: Send + Sync {
    /// Current time in seconds since the Unix epoch.
    fn now_secs(&self) -> u64;
}

/// Wall clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start` epoch seconds.
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute time.
    pub fn set(&self, secs: u64) {
        self.now.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Whether a window that opened at `window_start` is over at `now`.
///
/// A record is still live at exactly `window_start + window_secs`; it is
/// retired only once strictly more than `window_secs` have passed.
pub fn window_elapsed(now: u64, window_start: u64, window_secs: u64) -> bool {
    now.saturating_sub(window_start) > window_secs
}
