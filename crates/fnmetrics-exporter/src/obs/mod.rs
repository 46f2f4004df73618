//! Lightweight in-process metrics.
//!
//! Stores call instruments as atomics and renders them for the `/metrics`
//! handler. Implements `fnmetrics_core::MetricsBackend`.

pub mod metrics;
