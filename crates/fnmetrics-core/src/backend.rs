//! Metrics backend interface.
//!
//! The engine never stores numeric data itself (except the in-flight counts it
//! owns). It asks a [`MetricsBackend`] for instrument handles once per call
//! identity and updates those handles on every call.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Timer recording one sample per completed call.
pub const DURATION_TIMER: &str = "function.calls.duration";
/// Outcome counter, tagged with `result`.
pub const CALLS_COUNTER: &str = "function.calls";
/// Live in-flight gauge.
pub const CONCURRENCY_GAUGE: &str = "function.calls.concurrent";
/// Static build metadata gauge.
pub const BUILD_INFO_GAUGE: &str = "build_info";

pub const FUNCTION_KEY: &str = "function";
pub const MODULE_KEY: &str = "module";
pub const RESULT_KEY: &str = "result";
pub const OK_VALUE: &str = "ok";
pub const ERROR_VALUE: &str = "error";

/// Tag list as `(key, value)` pairs.
pub type Tags<'a> = &'a [(&'a str, &'a str)];

/// Value source for a gauge, read at scrape time.
pub type GaugeFn = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Handle to a monotonic counter.
pub trait CounterHandle: Send + Sync {
    fn increment(&self);
}

/// Handle to a duration timer.
pub trait TimerHandle: Send + Sync {
    fn record(&self, elapsed: Duration);
}

/// Registration/update interface of a metrics backend.
///
/// Implementations are expected to deduplicate: asking twice for the same
/// name and tags returns handles to the same underlying series.
///
/// Registration may run while the caller holds an internal lock of the
/// instrument registry, so implementations must not call back into it.
pub trait MetricsBackend: Send + Sync {
    fn counter(&self, name: &str, tags: Tags<'_>) -> Result<Arc<dyn CounterHandle>>;

    fn timer(&self, name: &str, tags: Tags<'_>) -> Result<Arc<dyn TimerHandle>>;

    fn register_gauge(&self, name: &str, tags: Tags<'_>, source: GaugeFn) -> Result<()>;
}
