//! Admission control logic and counter state management.

mod clock;
mod controller;
mod policy;
mod store;

pub use clock::{window_elapsed, Clock, ManualClock, SystemClock};
pub use controller::{AdmissionController, Decision, Verdict, DEFAULT_STORE_TIMEOUT};
pub use policy::{AdmissionPolicy, PolicySet, ANALYSIS_POLICY, GLOBAL_POLICY, UPLOAD_POLICY};
pub use store::{
    CounterRecord, CounterSnapshot, CounterStore, DistributedCounterStore, LocalCounterStore,
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_RECONNECT_COOLDOWN,
};
