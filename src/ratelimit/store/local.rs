//! In-process counter store.
//!
//! Used when the distributed store is unreachable. Counts are only visible to
//! the current process. A background sweep evicts records whose window has
//! elapsed so churned client identities do not accumulate forever.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::{CounterSnapshot, CounterStore};
use crate::error::StoreError;
use crate::ratelimit::clock::{window_elapsed, Clock};

/// Per-key state held by the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Requests counted in the current window
    pub count: u64,
    /// When the current window opened (epoch seconds)
    pub window_start: u64,
    /// Window length of the policy that owns this key
    pub window_secs: u64,
}

impl CounterRecord {
    fn is_expired(&self, now: u64) -> bool {
        window_elapsed(now, self.window_start, self.window_secs)
    }
}

/// The local counter store.
///
/// This struct is thread-safe and can be shared across multiple tasks. The
/// read-modify-write of a single key happens under that key's map shard
/// lock, so concurrent callers never lose an increment.
pub struct LocalCounterStore {
    /// Counter records indexed by policy-namespaced key
    records: Arc<DashMap<String, CounterRecord>>,
    clock: Arc<dyn Clock>,
    /// Handle of the running sweep task, if started
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl LocalCounterStore {
    /// Create a store reading time from `clock`. The sweep is not started.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            clock,
            sweeper: Mutex::new(None),
        }
    }

    /// Start the periodic sweep.
    ///
    /// `interval` should be strictly shorter than the shortest policy window.
    /// Calling `start` on a running store restarts the sweep with the new
    /// interval. Must be called from within a Tokio runtime.
    pub fn start(&self, interval: Duration) {
        let records = self.records.clone();
        let clock = self.clock.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = sweep_records(&records, clock.now_secs());
                if evicted > 0 {
                    debug!(evicted, remaining = records.len(), "Swept expired counters");
                }
            }
        });

        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
        info!(interval_ms = interval.as_millis() as u64, "Local counter sweep started");
    }

    /// Stop the periodic sweep. Counters are kept.
    pub fn stop(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
            info!("Local counter sweep stopped");
        }
    }

    /// Whether the sweep task is running.
    pub fn is_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Evict every record whose window has elapsed. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        sweep_records(&self.records, self.clock.now_secs())
    }

    /// Current record for `key`, if any.
    pub fn get(&self, key: &str) -> Option<CounterRecord> {
        self.records.get(key).map(|r| *r)
    }

    /// Get the number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clear all records.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.records.clear();
    }
}

impl Drop for LocalCounterStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

fn sweep_records(records: &DashMap<String, CounterRecord>, now: u64) -> usize {
    let before = records.len();
    records.retain(|_, record| !record.is_expired(now));
    before.saturating_sub(records.len())
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn increment_and_check(
        &self,
        key: &str,
        window_secs: u64,
    ) -> Result<CounterSnapshot, StoreError> {
        if window_secs == 0 {
            return Err(StoreError::Internal(format!(
                "zero-length window for key '{}'",
                key
            )));
        }

        let now = self.clock.now_secs();
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert(CounterRecord {
                count: 0,
                window_start: now,
                window_secs,
            });

        if record.is_expired(now) {
            trace!(
                key = %key,
                window_start = record.window_start,
                "Counter window elapsed, resetting"
            );
            record.count = 0;
            record.window_start = now;
        }
        record.window_secs = window_secs;
        record.count += 1;

        Ok(CounterSnapshot::new(record.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn store_at(start: u64) -> (Arc<ManualClock>, LocalCounterStore) {
        let clock = Arc::new(ManualClock::new(start));
        let store = LocalCounterStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_first_request_creates_record() {
        let (_, store) = store_at(1_000);

        let snapshot = store.increment_and_check("global:a", 60).await.unwrap();

        assert_eq!(snapshot, CounterSnapshot { count: 1, first_in_window: true });
        assert_eq!(
            store.get("global:a"),
            Some(CounterRecord { count: 1, window_start: 1_000, window_secs: 60 })
        );
    }

    #[tokio::test]
    async fn test_increments_within_window() {
        let (clock, store) = store_at(1_000);

        for expected in 1..=3 {
            let snapshot = store.increment_and_check("global:a", 60).await.unwrap();
            assert_eq!(snapshot.count, expected);
            clock.advance(20);
        }
        // Exactly at the window edge the record is still live.
        assert_eq!(clock.now_secs(), 1_060);
        let snapshot = store.increment_and_check("global:a", 60).await.unwrap();
        assert_eq!(snapshot.count, 4);
        assert!(!snapshot.first_in_window);
    }

    #[tokio::test]
    async fn test_resets_after_window() {
        let (clock, store) = store_at(1_000);

        store.increment_and_check("global:a", 60).await.unwrap();
        store.increment_and_check("global:a", 60).await.unwrap();
        clock.advance(61);

        let snapshot = store.increment_and_check("global:a", 60).await.unwrap();
        assert_eq!(snapshot.count, 1);
        assert!(snapshot.first_in_window);
        assert_eq!(store.get("global:a").unwrap().window_start, 1_061);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (_, store) = store_at(1_000);

        store.increment_and_check("global:a", 60).await.unwrap();
        store.increment_and_check("global:a", 60).await.unwrap();
        let other = store.increment_and_check("global:b", 60).await.unwrap();

        assert_eq!(other.count, 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_window_is_an_error() {
        let (_, store) = store_at(1_000);
        let result = store.increment_and_check("global:a", 0).await;
        assert!(matches!(result, Err(StoreError::Internal(_))));
    }

    #[tokio::test]
    async fn test_sweep_evicts_per_policy_window() {
        let (clock, store) = store_at(1_000);

        store.increment_and_check("global:a", 60).await.unwrap();
        store.increment_and_check("upload:a", 3600).await.unwrap();
        clock.advance(120);

        assert_eq!(store.sweep(), 1);
        assert!(store.get("global:a").is_none());
        assert!(store.get("upload:a").is_some());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let (_, store) = store_at(1_000);
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.increment_and_check("global:hot", 60).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("global:hot").unwrap().count, 400);
    }

    #[tokio::test]
    async fn test_start_and_stop_sweeper() {
        let (clock, store) = store_at(1_000);
        assert!(!store.is_running());

        store.start(Duration::from_millis(10));
        assert!(store.is_running());

        store.increment_and_check("global:a", 1).await.unwrap();
        clock.advance(5);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty());

        store.stop();
        assert!(!store.is_running());
    }

    #[tokio::test]
    async fn test_clear_records() {
        let (_, store) = store_at(1_000);
        store.increment_and_check("global:a", 60).await.unwrap();
        store.clear();
        assert!(store.is_empty());
    }
}
