//! Push-based observability for dataflow
//!
//! Metrics are collected in-process and emitted as log output at the end of a run.
//! No HTTP server, no incoming requests.

pub mod metrics;

pub use metrics::Metrics;
