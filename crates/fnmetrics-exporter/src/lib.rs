//! fnmetrics exporter library entry.
//!
//! Wires the in-process metrics store, the call interceptor and the
//! `build_info` publisher into a small HTTP service. Used by the binary
//! (`main.rs`) and by integration tests.

pub mod app_state;
pub mod build_info;
pub mod config;
pub mod obs;
pub mod ops;
pub mod router;
