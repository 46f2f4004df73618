//! Top-level facade crate for fnmetrics.
//!
//! Re-exports the core engine and the exporter library so users can depend on a single crate.

pub mod core {
    pub use fnmetrics_core::*;
}

pub mod exporter {
    pub use fnmetrics_exporter::*;
}

pub use fnmetrics_core::{call_site, CallIdentity, CallInterceptor, CallSite, MetricsBackend};
