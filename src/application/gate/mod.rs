//! Execution gates: bound extractor lifetime by wall-clock window and/or job quota.

pub mod controls;
pub mod execution;
pub mod window;

pub use controls::{
    AllGate, AnyGate, Gate, JobQuotaGate, TimeAndJobGate, TimeWindowGate, make_time_and_job_gate,
};
pub use execution::{
    ExecutionGate, GateOutcome, GateState, InlineWork, RunMode, RunStatus, WorkerContext,
};
pub use window::{GateWindow, parse_clock_time};
