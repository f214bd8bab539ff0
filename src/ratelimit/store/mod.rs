//! Counter store contract and its two implementations.

mod distributed;
mod local;

use async_trait::async_trait;

use crate::error::StoreError;

pub use distributed::{
    DistributedCounterStore, DEFAULT_COMMAND_TIMEOUT, DEFAULT_RECONNECT_COOLDOWN,
};
pub use local::{CounterRecord, LocalCounterStore};

/// Result of a single increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Count for the key after this increment.
    pub count: u64,
    /// Whether this increment opened a new window for the key.
    pub first_in_window: bool,
}

impl CounterSnapshot {
    pub fn new(count: u64) -> Self {
        Self {
            count,
            first_in_window: count == 1,
        }
    }
}

/// Trait for counter store implementations.
///
/// This trait abstracts over the Redis-backed `DistributedCounterStore` and
/// the in-process `LocalCounterStore` so the admission controller can work
/// with either. Implementations must be safe to call concurrently and must
/// never lose an increment for the same key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Short backend name used in logs and decisions.
    fn name(&self) -> &'static str;

    /// Count one request against `key` and return the post-increment state.
    ///
    /// Errors must be reported rather than masked as a zero count.
    async fn increment_and_check(
        &self,
        key: &str,
        window_secs: u64,
    ) -> Result<CounterSnapshot, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_first_in_window() {
        assert!(CounterSnapshot::new(1).first_in_window);
        assert!(!CounterSnapshot::new(2).first_in_window);
    }
}
