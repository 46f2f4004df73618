//! Interceptor behaviour against an in-memory backend.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Barrier};
use std::thread;

use fnmetrics_core::backend::{CALLS_COUNTER, CONCURRENCY_GAUGE, DURATION_TIMER};
use fnmetrics_core::{call_site, CallIdentity, CallInterceptor, StaticCallSite};

use recording_backend::RecordingBackend;

#[derive(Debug, PartialEq)]
enum LookupError {
    Missing(String),
    Corrupt,
}

fn setup() -> (Arc<RecordingBackend>, CallInterceptor) {
    let backend = RecordingBackend::new();
    let interceptor = CallInterceptor::new(backend.clone());
    (backend, interceptor)
}

fn calls(backend: &RecordingBackend, function: &str, module: &str, result: &str) -> Option<u64> {
    backend.counter_value(
        CALLS_COUNTER,
        &[("function", function), ("module", module), ("result", result)],
    )
}

fn samples(backend: &RecordingBackend, function: &str, module: &str) -> Option<u64> {
    backend.timer_count(DURATION_TIMER, &[("function", function), ("module", module)])
}

fn in_flight(backend: &RecordingBackend, function: &str, module: &str) -> Option<i64> {
    backend.gauge_value(CONCURRENCY_GAUGE, &[("function", function), ("module", module)])
}

#[test]
fn returns_value_unchanged() {
    let (_, interceptor) = setup();
    let id = CallIdentity::new("pkg", "Greeter.hello");

    let out: Result<&str, LookupError> = interceptor.instrument(&id, || Ok("Hello world response"));
    assert_eq!(out, Ok("Hello world response"));
}

#[test]
fn returns_original_error() {
    let (_, interceptor) = setup();
    let id = CallIdentity::new("pkg", "Store.get");

    let out: Result<(), LookupError> =
        interceptor.instrument(&id, || Err(LookupError::Missing("user:7".into())));
    assert_eq!(out, Err(LookupError::Missing("user:7".into())));

    let out: Result<(), LookupError> = interceptor.instrument(&id, || Err(LookupError::Corrupt));
    assert_eq!(out, Err(LookupError::Corrupt));
}

#[test]
fn thunk_runs_exactly_once() {
    let (_, interceptor) = setup();
    let id = CallIdentity::new("pkg", "once");
    let mut runs = 0;

    let _: Result<(), ()> = interceptor.instrument(&id, || {
        runs += 1;
        Err(())
    });
    assert_eq!(runs, 1);
}

#[test]
fn records_outcomes_and_durations() {
    let (backend, interceptor) = setup();
    let site = StaticCallSite::method("pkg", "Foo", "bar");

    for _ in 0..3 {
        let r: Result<&str, LookupError> = interceptor.instrument_site(&site, || Ok("success"));
        assert!(r.is_ok());
    }
    let r: Result<&str, LookupError> =
        interceptor.instrument_site(&site, || Err(LookupError::Missing("x".into())));
    assert!(r.is_err());
    let r: Result<&str, LookupError> =
        interceptor.instrument_site(&site, || Err(LookupError::Corrupt));
    assert!(r.is_err());

    assert_eq!(calls(&backend, "Foo.bar", "pkg", "ok"), Some(3));
    assert_eq!(calls(&backend, "Foo.bar", "pkg", "error"), Some(2));
    assert_eq!(samples(&backend, "Foo.bar", "pkg"), Some(5));
    assert_eq!(in_flight(&backend, "Foo.bar", "pkg"), Some(0));
}

#[test]
fn panic_counts_as_error_and_keeps_payload() {
    let (backend, interceptor) = setup();
    let id = CallIdentity::new("pkg", "Validator.check");

    let caught = panic::catch_unwind(AssertUnwindSafe(|| {
        let _: Result<(), LookupError> =
            interceptor.instrument(&id, || panic!("assertion failed: invariant"));
    }));

    let payload = caught.expect_err("panic must propagate");
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"assertion failed: invariant"));

    assert_eq!(calls(&backend, "Validator.check", "pkg", "error"), Some(1));
    assert_eq!(calls(&backend, "Validator.check", "pkg", "ok"), Some(0));
    assert_eq!(samples(&backend, "Validator.check", "pkg"), Some(1));
    assert_eq!(in_flight(&backend, "Validator.check", "pkg"), Some(0));
}

#[test]
fn gauge_tracks_calls_in_flight() {
    let (backend, interceptor) = setup();
    let id = CallIdentity::new("pkg", "Slow.run");
    let entered = Barrier::new(3);
    let release = Barrier::new(3);

    thread::scope(|s| {
        for i in 0..2 {
            let (interceptor, id, entered, release) = (&interceptor, &id, &entered, &release);
            s.spawn(move || {
                let _: Result<(), ()> = interceptor.instrument(id, || {
                    entered.wait();
                    release.wait();
                    if i == 0 { Ok(()) } else { Err(()) }
                });
            });
        }

        entered.wait();
        assert_eq!(in_flight(&backend, "Slow.run", "pkg"), Some(2));
        release.wait();
    });

    assert_eq!(in_flight(&backend, "Slow.run", "pkg"), Some(0));
    assert_eq!(samples(&backend, "Slow.run", "pkg"), Some(2));
}

#[test]
fn concurrent_first_use_creates_one_counter() {
    let (backend, interceptor) = setup();
    let id = CallIdentity::new("pkg", "Fresh.call");
    let threads = 8;
    let start = Barrier::new(threads);

    let counters: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let (interceptor, id, start) = (&interceptor, &id, &start);
                s.spawn(move || {
                    start.wait();
                    let _: Result<(), ()> = interceptor.instrument(id, || Ok(()));
                    interceptor.registry().concurrency(id).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(counters.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(backend.gauge_registrations(), 1);
    assert_eq!(interceptor.registry().len(), 1);
    assert_eq!(calls(&backend, "Fresh.call", "pkg", "ok"), Some(threads as u64));
    assert_eq!(in_flight(&backend, "Fresh.call", "pkg"), Some(0));
}

#[test]
fn identities_do_not_share_counters() {
    let (backend, interceptor) = setup();
    let a = CallIdentity::new("pkg", "A.run");
    let b = CallIdentity::new("pkg", "B.run");

    let _: Result<(), ()> = interceptor.instrument(&b, || Ok(()));
    let _: Result<(), ()> = interceptor.instrument(&a, || {
        assert_eq!(in_flight(&backend, "A.run", "pkg"), Some(1));
        assert_eq!(in_flight(&backend, "B.run", "pkg"), Some(0));
        Ok(())
    });

    let ca = interceptor.registry().concurrency(&a).unwrap();
    let cb = interceptor.registry().concurrency(&b).unwrap();
    assert!(!Arc::ptr_eq(&ca, &cb));
}

#[test]
fn repeated_calls_register_once() {
    let (backend, interceptor) = setup();
    let site = call_site!(Repeat, "tick");

    for _ in 0..10 {
        let _: Result<(), ()> = interceptor.instrument_site(&site, || Ok(()));
    }

    assert_eq!(backend.gauge_registrations(), 1);
    assert_eq!(interceptor.registry().len(), 1);
    assert_eq!(calls(&backend, "Repeat.tick", module_path!(), "ok"), Some(10));
}

#[test]
fn rejected_registration_still_runs_call_and_retries() {
    let (backend, interceptor) = setup();
    let id = CallIdentity::new("pkg", "Flaky.init");

    backend.reject_registrations(true);
    let out: Result<u32, LookupError> = interceptor.instrument(&id, || Ok(7));
    assert_eq!(out, Ok(7));
    let out: Result<u32, LookupError> = interceptor.instrument(&id, || Err(LookupError::Corrupt));
    assert_eq!(out, Err(LookupError::Corrupt));
    assert!(interceptor.registry().is_empty());
    assert_eq!(samples(&backend, "Flaky.init", "pkg"), None);

    backend.reject_registrations(false);
    let out: Result<u32, LookupError> = interceptor.instrument(&id, || Ok(8));
    assert_eq!(out, Ok(8));
    assert_eq!(calls(&backend, "Flaky.init", "pkg", "ok"), Some(1));
    assert_eq!(samples(&backend, "Flaky.init", "pkg"), Some(1));
}
