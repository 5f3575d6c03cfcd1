//! Observability utilities for logging, metrics, and per-workload logs.

pub mod logging;
pub mod metrics;
pub mod workload_log;
