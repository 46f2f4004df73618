//! Call interceptor: brackets a wrapped call with RED telemetry.
//!
//! For every call:
//! - acquire the identity's instruments (created once)
//! - in-flight +1, start timing
//! - run the wrapped call
//! - outcome counter, duration sample, in-flight -1
//! - hand back the wrapped call's own result
//!
//! The closing half lives in [`InFlight`]'s `Drop`, so it also runs when the
//! wrapped call panics. A panic is recorded as `result=error` and keeps
//! unwinding with its original payload.

use std::sync::Arc;
use std::time::Instant;

use crate::backend::MetricsBackend;
use crate::identity::{CallIdentity, CallSite};
use crate::log_once::LogOnce;
use crate::registry::{CallInstruments, InstrumentRegistry};

/// Wraps calls and records duration, outcome and concurrency per call site.
pub struct CallInterceptor {
    registry: InstrumentRegistry,
    // identities whose current registration failure was already warned about
    rejected: LogOnce<CallIdentity>,
}

impl CallInterceptor {
    pub fn new(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            registry: InstrumentRegistry::new(backend),
            rejected: LogOnce::new(),
        }
    }

    pub fn registry(&self) -> &InstrumentRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn MetricsBackend> {
        self.registry.backend()
    }

    /// Run `thunk` as an instrumented call of `site`.
    pub fn instrument_site<S, T, E, F>(&self, site: &S, thunk: F) -> Result<T, E>
    where
        S: CallSite + ?Sized,
        F: FnOnce() -> Result<T, E>,
    {
        self.instrument(&CallIdentity::resolve(site), thunk)
    }

    /// Run `thunk` as an instrumented call of `identity`.
    ///
    /// The return value is exactly what `thunk` returned. If the backend
    /// refuses to create instruments the call still runs, just unrecorded.
    pub fn instrument<T, E, F>(&self, identity: &CallIdentity, thunk: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let instruments = match self.registry.acquire(identity) {
            Ok(instruments) => {
                if !self.rejected.is_empty() {
                    self.rejected.forget(identity);
                }
                instruments
            }
            Err(e) => {
                if self.rejected.first(identity.clone()) {
                    tracing::warn!(
                        module = %identity.module(),
                        function = %identity.function(),
                        error = %e,
                        "instrument registration failed, call runs unrecorded"
                    );
                } else {
                    tracing::debug!(
                        module = %identity.module(),
                        function = %identity.function(),
                        error = %e,
                        "instrument registration still failing"
                    );
                }
                return thunk();
            }
        };

        let guard = InFlight::enter(instruments);
        let result = thunk();
        if result.is_err() {
            tracing::debug!(
                module = %identity.module(),
                function = %identity.function(),
                "instrumented call returned an error"
            );
        }
        guard.exit(result.is_ok());
        result
    }
}

/// Scope of one in-flight call.
///
/// Created after the counter increment; dropping it records the outcome,
/// the duration and the decrement, in that order, exactly once.
struct InFlight {
    instruments: Arc<CallInstruments>,
    start: Instant,
    ok: bool,
}

impl InFlight {
    fn enter(instruments: Arc<CallInstruments>) -> Self {
        instruments.concurrency().increment();
        Self {
            instruments,
            start: Instant::now(),
            // stays false if the wrapped call unwinds
            ok: false,
        }
    }

    fn exit(mut self, ok: bool) {
        self.ok = ok;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.instruments.outcome_counter(self.ok).increment();
        self.instruments
            .duration_timer()
            .record(self.start.elapsed());
        self.instruments.concurrency().decrement();
    }
}
