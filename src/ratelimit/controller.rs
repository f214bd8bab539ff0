//! Admission controller.
//!
//! Resolves the policy key, counts the request against the distributed store
//! and falls back to the local store when the distributed store fails. When
//! no store can count the request, the request is admitted.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error, info, trace, warn};

use super::policy::AdmissionPolicy;
use super::store::{CounterSnapshot, CounterStore};
use crate::error::StoreError;

/// Default bound on a single distributed store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// How a request was judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Counted and within the policy's limit.
    Admitted,
    /// Counted and over the policy's limit.
    Denied,
    /// No store could count the request; admitted anyway.
    FailOpen,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    /// Post-increment count, when a store answered.
    pub count: Option<u64>,
    /// Seconds the client should wait; the policy window on denial, else zero.
    pub retry_after_secs: u64,
    /// Name of the store that produced the count.
    pub backend: Option<&'static str>,
}

impl Decision {
    /// Whether the request may proceed.
    pub fn allowed(&self) -> bool {
        !matches!(self.verdict, Verdict::Denied)
    }

    fn fail_open() -> Self {
        Self {
            verdict: Verdict::FailOpen,
            count: None,
            retry_after_secs: 0,
            backend: None,
        }
    }

    fn evaluate(
        policy: &AdmissionPolicy,
        snapshot: CounterSnapshot,
        backend: &'static str,
    ) -> Self {
        if snapshot.count > policy.max_requests() {
            Self {
                verdict: Verdict::Denied,
                count: Some(snapshot.count),
                retry_after_secs: policy.window_secs(),
                backend: Some(backend),
            }
        } else {
            Self {
                verdict: Verdict::Admitted,
                count: Some(snapshot.count),
                retry_after_secs: 0,
                backend: Some(backend),
            }
        }
    }
}

/// The admission controller.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct AdmissionController {
    distributed: Option<Arc<dyn CounterStore>>,
    local: Arc<dyn CounterStore>,
    store_timeout: Duration,
    /// Set while the distributed store is failing, so the outage is logged
    /// once rather than on every request.
    degraded: AtomicBool,
}

impl AdmissionController {
    /// Create a controller that only counts in the local store.
    pub fn new(local: Arc<dyn CounterStore>) -> Self {
        Self {
            distributed: None,
            local,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            degraded: AtomicBool::new(false),
        }
    }

    /// Create a controller that prefers `distributed` and falls back to `local`.
    pub fn with_distributed(
        distributed: Arc<dyn CounterStore>,
        local: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            distributed: Some(distributed),
            ..Self::new(local)
        }
    }

    /// Bound each distributed store call. A call that exceeds the bound is
    /// treated as a connection failure.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Whether the last distributed store call failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Decide whether `identity` may make another request under `policy`.
    ///
    /// Never fails: store errors are absorbed into the decision.
    pub async fn admit(&self, policy: &AdmissionPolicy, identity: &str) -> Decision {
        let key = policy.key(identity);

        trace!(key = %key, "Checking admission");

        if let Some(distributed) = &self.distributed {
            let window_secs = policy.window_secs();
            match self.increment_distributed(distributed.as_ref(), &key, window_secs).await {
                Ok(snapshot) => {
                    self.mark_healthy(distributed.name());
                    return self.decide(policy, &key, snapshot, distributed.name());
                }
                Err(e) => self.mark_degraded(distributed.name(), &e),
            }
        }

        match self.local.increment_and_check(&key, policy.window_secs()).await {
            Ok(snapshot) => self.decide(policy, &key, snapshot, self.local.name()),
            Err(e) => {
                error!(
                    key = %key,
                    store = self.local.name(),
                    error = %e,
                    "All counter stores failed, admitting request"
                );
                Decision::fail_open()
            }
        }
    }

    async fn increment_distributed(
        &self,
        store: &dyn CounterStore,
        key: &str,
        window_secs: u64,
    ) -> Result<CounterSnapshot, StoreError> {
        let call = AssertUnwindSafe(store.increment_and_check(key, window_secs)).catch_unwind();
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StoreError::Internal(format!("{} store panicked", store.name()))),
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        }
    }

    fn decide(
        &self,
        policy: &AdmissionPolicy,
        key: &str,
        snapshot: CounterSnapshot,
        backend: &'static str,
    ) -> Decision {
        let decision = Decision::evaluate(policy, snapshot, backend);
        if !decision.allowed() {
            debug!(
                key = %key,
                count = snapshot.count,
                limit = policy.max_requests(),
                store = backend,
                "Admission limit exceeded"
            );
        }
        decision
    }

    fn mark_degraded(&self, store: &'static str, err: &StoreError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(
                store,
                error = %err,
                unavailable = err.is_unavailable(),
                "Distributed counter store failed, falling back to local store"
            );
        } else {
            debug!(store, error = %err, "Distributed counter store still failing");
        }
    }

    fn mark_healthy(&self, store: &'static str) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!(store, "Distributed counter store recovered");
        }
    }
}
