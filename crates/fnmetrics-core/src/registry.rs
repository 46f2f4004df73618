//! Instrument registry: identity -> instruments, created once per identity.
//!
//! - `CallIdentity -> CallInstruments` in a sharded `DashMap`
//! - known identities are served from a read-locked fast path
//! - creation happens inside the entry's write lock, so concurrent first
//!   callers of the same identity converge on one instance and the backend
//!   sees exactly one gauge registration

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::backend::{
    CounterHandle, GaugeFn, MetricsBackend, TimerHandle, CALLS_COUNTER, CONCURRENCY_GAUGE,
    DURATION_TIMER, ERROR_VALUE, FUNCTION_KEY, MODULE_KEY, OK_VALUE, RESULT_KEY,
};
use crate::error::Result;
use crate::identity::CallIdentity;

/// Number of in-flight invocations of one call site.
#[derive(Debug, Default)]
pub struct ConcurrencyCounter {
    value: AtomicI64,
}

impl ConcurrencyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) -> i64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn decrement(&self) -> i64 {
        self.value.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}

/// Cached instrument handles of one call identity.
pub struct CallInstruments {
    identity: CallIdentity,
    in_flight: Arc<ConcurrencyCounter>,
    ok: Arc<dyn CounterHandle>,
    error: Arc<dyn CounterHandle>,
    duration: Arc<dyn TimerHandle>,
}

impl CallInstruments {
    pub fn identity(&self) -> &CallIdentity {
        &self.identity
    }

    pub fn concurrency(&self) -> &Arc<ConcurrencyCounter> {
        &self.in_flight
    }

    pub(crate) fn outcome_counter(&self, ok: bool) -> &dyn CounterHandle {
        if ok {
            self.ok.as_ref()
        } else {
            self.error.as_ref()
        }
    }

    pub(crate) fn duration_timer(&self) -> &dyn TimerHandle {
        self.duration.as_ref()
    }
}

/// Find-or-create store for per-identity instruments.
pub struct InstrumentRegistry {
    backend: Arc<dyn MetricsBackend>,
    entries: DashMap<CallIdentity, Arc<CallInstruments>>,
}

impl InstrumentRegistry {
    pub fn new(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend,
            entries: DashMap::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn MetricsBackend> {
        &self.backend
    }

    /// Return the instruments for `identity`, creating and registering them
    /// on first use.
    ///
    /// A backend failure is returned as-is and leaves no entry behind; the
    /// next call retries creation.
    pub fn acquire(&self, identity: &CallIdentity) -> Result<Arc<CallInstruments>> {
        if let Some(hit) = self.entries.get(identity) {
            return Ok(Arc::clone(hit.value()));
        }

        match self.entries.entry(identity.clone()) {
            Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            Entry::Vacant(slot) => {
                let created = Arc::new(self.create(identity)?);
                slot.insert(Arc::clone(&created));
                tracing::debug!(
                    module = %identity.module(),
                    function = %identity.function(),
                    "registered call instruments"
                );
                Ok(created)
            }
        }
    }

    /// Live concurrency counter of an already-registered identity.
    pub fn concurrency(&self, identity: &CallIdentity) -> Option<Arc<ConcurrencyCounter>> {
        self.entries
            .get(identity)
            .map(|e| Arc::clone(&e.value().in_flight))
    }

    pub fn identities(&self) -> Vec<CallIdentity> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Gauge goes last: if any handle fails, nothing was registered for it.
    fn create(&self, identity: &CallIdentity) -> Result<CallInstruments> {
        let function = identity.function();
        let module = identity.module();

        let ok = self.backend.counter(
            CALLS_COUNTER,
            &[(FUNCTION_KEY, function), (MODULE_KEY, module), (RESULT_KEY, OK_VALUE)],
        )?;
        let error = self.backend.counter(
            CALLS_COUNTER,
            &[(FUNCTION_KEY, function), (MODULE_KEY, module), (RESULT_KEY, ERROR_VALUE)],
        )?;
        let duration = self
            .backend
            .timer(DURATION_TIMER, &[(FUNCTION_KEY, function), (MODULE_KEY, module)])?;

        let in_flight = Arc::new(ConcurrencyCounter::new());
        let live = Arc::clone(&in_flight);
        let source: GaugeFn = Arc::new(move || live.get());
        self.backend.register_gauge(
            CONCURRENCY_GAUGE,
            &[(FUNCTION_KEY, function), (MODULE_KEY, module)],
            source,
        )?;

        Ok(CallInstruments {
            identity: identity.clone(),
            in_flight,
            ok,
            error,
            duration,
        })
    }
}
