//! fnmetrics core: call-site identities, the instrument registry and the call
//! interceptor.
//!
//! Wrap any fallible call with [`CallInterceptor::instrument`] and it gets a
//! duration timer, ok/error counters and a live in-flight gauge, tagged by the
//! call site's module and function. The storage and export of those numbers
//! belong to a [`MetricsBackend`]; this crate only talks to that trait.
//!
//! ```
//! use std::sync::Arc;
//! # use std::time::Duration;
//! # use fnmetrics_core::backend::{CounterHandle, GaugeFn, Tags, TimerHandle};
//! # use fnmetrics_core::Result as MetricsResult;
//! use fnmetrics_core::{call_site, CallInterceptor, MetricsBackend};
//! # struct Noop;
//! # impl CounterHandle for Noop { fn increment(&self) {} }
//! # impl TimerHandle for Noop { fn record(&self, _: Duration) {} }
//! # impl MetricsBackend for Noop {
//! #     fn counter(&self, _: &str, _: Tags<'_>) -> MetricsResult<Arc<dyn CounterHandle>> {
//! #         Ok(Arc::new(Noop))
//! #     }
//! #     fn timer(&self, _: &str, _: Tags<'_>) -> MetricsResult<Arc<dyn TimerHandle>> {
//! #         Ok(Arc::new(Noop))
//! #     }
//! #     fn register_gauge(&self, _: &str, _: Tags<'_>, _: GaugeFn) -> MetricsResult<()> {
//! #         Ok(())
//! #     }
//! # }
//! # let backend: Arc<dyn MetricsBackend> = Arc::new(Noop);
//!
//! let interceptor = CallInterceptor::new(backend);
//! let parsed: Result<u16, std::num::ParseIntError> =
//!     interceptor.instrument_site(&call_site!("parse_port"), || "8080".parse());
//! assert_eq!(parsed.unwrap(), 8080);
//! ```
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Telemetry failures
//! are logged and swallowed; the wrapped call's result is never altered.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backend;
pub mod error;
pub mod identity;
pub mod interceptor;
pub mod log_once;
pub mod registry;

pub use backend::MetricsBackend;
pub use error::{ErrorCode, MetricsError, Result};
pub use identity::{CallIdentity, CallSite, StaticCallSite};
pub use interceptor::CallInterceptor;
pub use registry::{CallInstruments, ConcurrencyCounter, InstrumentRegistry};
