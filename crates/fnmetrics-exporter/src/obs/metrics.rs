//! In-process metrics store backing the call interceptor.
//!
//! Counter/gauge/histogram families are keyed by metric name; series inside a
//! family are keyed by label sets flattened into sorted `(key, value)` vectors
//! so the same tags in any order hit the same series. Histogram buckets are
//! fixed in microseconds to avoid floating point math on the hot path.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fnmetrics_core::backend::{CounterHandle, GaugeFn, MetricsBackend, Tags, TimerHandle};
use fnmetrics_core::error::{MetricsError, Result};
use fnmetrics_core::{call_site, StaticCallSite};

type LabelKey = Vec<(String, String)>;

fn label_key(labels: Tags<'_>) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Prometheus names allow `[a-zA-Z0-9_:]` only (`function.calls` -> `function_calls`).
fn prom_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect()
}

fn label_str(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", prom_name(k), escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

fn series_line(out: &mut String, name: &str, labels: &str, value: impl std::fmt::Display) {
    if labels.is_empty() {
        let _ = writeln!(out, "{} {}", name, value);
    } else {
        let _ = writeln!(out, "{}{{{}}} {}", name, labels, value);
    }
}

fn validate(name: &str, tags: Tags<'_>) -> Result<()> {
    if name.is_empty() {
        return Err(MetricsError::rejected(name, "empty metric name"));
    }
    if tags.iter().any(|(k, _)| k.is_empty()) {
        return Err(MetricsError::rejected(name, "empty label key"));
    }
    Ok(())
}

struct Counter(Arc<AtomicU64>);

impl CounterHandle for Counter {
    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct CounterVec {
    map: DashMap<LabelKey, Arc<AtomicU64>>,
}

impl CounterVec {
    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        let mut rows: Vec<(String, u64)> = self
            .map
            .iter()
            .map(|r| (label_str(r.key()), r.value().load(Ordering::Relaxed)))
            .collect();
        rows.sort();
        for (labels, val) in rows {
            series_line(out, name, &labels, val);
        }
    }
}

#[derive(Default)]
struct GaugeVec {
    map: DashMap<LabelKey, GaugeFn>,
}

impl GaugeVec {
    /// Values are read from the registered sources at render time.
    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        let mut rows: Vec<(String, i64)> = self
            .map
            .iter()
            .map(|r| (label_str(r.key()), (r.value())()))
            .collect();
        rows.sort();
        for (labels, val) in rows {
            series_line(out, name, &labels, val);
        }
    }
}

// Fixed Buckets in Microseconds (µs)
// 100us, 500us, 1ms, 5ms, 10ms, 50ms, 100ms, 500ms, 1s
const BUCKETS_MICROS: [u64; 9] = [
    100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000,
];

struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: [AtomicU64; 9],
}

impl Default for AtomicHistogram {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            buckets: Default::default(),
        }
    }
}

impl AtomicHistogram {
    /// Observe a duration and increment cumulative buckets (microsecond scale).
    fn observe(&self, duration: Duration) {
        let micros = duration.as_micros() as u64;

        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(micros, Ordering::Relaxed);

        for (i, &b) in BUCKETS_MICROS.iter().enumerate() {
            if micros <= b {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

struct Timer(Arc<AtomicHistogram>);

impl TimerHandle for Timer {
    fn record(&self, elapsed: Duration) {
        self.0.observe(elapsed);
    }
}

#[derive(Default)]
struct HistogramVec {
    map: DashMap<LabelKey, Arc<AtomicHistogram>>,
}

impl HistogramVec {
    /// Render in Prometheus text exposition format (unit: seconds).
    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} histogram", name);
        let mut rows: Vec<(String, Arc<AtomicHistogram>)> = self
            .map
            .iter()
            .map(|r| (label_str(r.key()), Arc::clone(r.value())))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        for (labels, hist) in rows {
            let prefix = if labels.is_empty() { String::new() } else { format!("{},", labels) };

            for (i, &le) in BUCKETS_MICROS.iter().enumerate() {
                let count = hist.buckets[i].load(Ordering::Relaxed);
                let le_secs = le as f64 / 1_000_000.0;
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le_secs, count);
            }
            let count = hist.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, count);

            let sum_secs = hist.sum.load(Ordering::Relaxed) as f64 / 1_000_000.0;
            series_line(out, &format!("{}_sum", name), &labels, sum_secs);
            series_line(out, &format!("{}_count", name), &labels, count);
        }
    }
}

/// Call site under which scrapes of [`MetricsStore::render`] are instrumented.
pub const RENDER_SITE: StaticCallSite = call_site!(MetricsStore, "render");

/// Metrics backend that keeps everything in memory and renders Prometheus text.
pub struct MetricsStore {
    counters: DashMap<String, Arc<CounterVec>>,
    gauges: DashMap<String, Arc<GaugeVec>>,
    histograms: DashMap<String, Arc<HistogramVec>>,
    series: AtomicUsize,
    max_series: usize,
    // series creations refused because of `max_series`
    rejected: AtomicU64,
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl MetricsStore {
    pub fn new(max_series: usize) -> Self {
        Self {
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
            series: AtomicUsize::new(0),
            max_series,
            rejected: AtomicU64::new(0),
        }
    }

    /// Number of series created so far, across all families.
    pub fn series_count(&self) -> usize {
        self.series.load(Ordering::Relaxed)
    }

    /// Number of series creations refused by the limit.
    pub fn rejected_series(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn counter_value(&self, name: &str, tags: Tags<'_>) -> Option<u64> {
        let family = self.counters.get(name)?;
        let cell = family.map.get(&label_key(tags))?;
        Some(cell.load(Ordering::Relaxed))
    }

    /// Number of samples recorded by a timer.
    pub fn timer_count(&self, name: &str, tags: Tags<'_>) -> Option<u64> {
        let family = self.histograms.get(name)?;
        let hist = family.map.get(&label_key(tags))?;
        Some(hist.count.load(Ordering::Relaxed))
    }

    pub fn gauge_value(&self, name: &str, tags: Tags<'_>) -> Option<i64> {
        let family = self.gauges.get(name).map(|f| Arc::clone(f.value()))?;
        let source = family.map.get(&label_key(tags)).map(|s| Arc::clone(s.value()))?;
        Some(source())
    }

    /// Render all families in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let mut counters: Vec<(String, Arc<CounterVec>)> = self
            .counters
            .iter()
            .map(|r| (prom_name(r.key()), Arc::clone(r.value())))
            .collect();
        counters.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, family) in counters {
            family.render(&name, &mut out);
        }

        let mut gauges: Vec<(String, Arc<GaugeVec>)> = self
            .gauges
            .iter()
            .map(|r| (prom_name(r.key()), Arc::clone(r.value())))
            .collect();
        gauges.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, family) in gauges {
            family.render(&name, &mut out);
        }

        let mut histograms: Vec<(String, Arc<HistogramVec>)> = self
            .histograms
            .iter()
            .map(|r| (prom_name(r.key()), Arc::clone(r.value())))
            .collect();
        histograms.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, family) in histograms {
            family.render(&name, &mut out);
        }

        out
    }

    fn reserve_series(&self, name: &str) -> Result<()> {
        let max = self.max_series;
        self.series
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map(|_| ())
            .map_err(|_| {
                // callers retry on every call; only the first refusal is a warn
                if self.rejected.fetch_add(1, Ordering::Relaxed) == 0 {
                    tracing::warn!(metric = %name, max_series = max, "series limit reached");
                } else {
                    tracing::debug!(metric = %name, max_series = max, "series limit reached");
                }
                MetricsError::rejected(name, format!("series limit {max} reached"))
            })
    }
}

impl MetricsBackend for MetricsStore {
    fn counter(&self, name: &str, tags: Tags<'_>) -> Result<Arc<dyn CounterHandle>> {
        validate(name, tags)?;
        let family = Arc::clone(
            self.counters
                .entry(name.to_string())
                .or_insert_with(Default::default)
                .value(),
        );

        let cell = match family.map.entry(label_key(tags)) {
            Entry::Occupied(e) => Arc::clone(e.get()),
            Entry::Vacant(slot) => {
                self.reserve_series(name)?;
                Arc::clone(slot.insert(Arc::new(AtomicU64::new(0))).value())
            }
        };
        Ok(Arc::new(Counter(cell)))
    }

    fn timer(&self, name: &str, tags: Tags<'_>) -> Result<Arc<dyn TimerHandle>> {
        validate(name, tags)?;
        let family = Arc::clone(
            self.histograms
                .entry(name.to_string())
                .or_insert_with(Default::default)
                .value(),
        );

        let hist = match family.map.entry(label_key(tags)) {
            Entry::Occupied(e) => Arc::clone(e.get()),
            Entry::Vacant(slot) => {
                self.reserve_series(name)?;
                Arc::clone(slot.insert(Arc::new(AtomicHistogram::default())).value())
            }
        };
        Ok(Arc::new(Timer(hist)))
    }

    /// Re-registering an existing name+tags keeps the first source.
    fn register_gauge(&self, name: &str, tags: Tags<'_>, source: GaugeFn) -> Result<()> {
        validate(name, tags)?;
        let family = Arc::clone(
            self.gauges
                .entry(name.to_string())
                .or_insert_with(Default::default)
                .value(),
        );

        match family.map.entry(label_key(tags)) {
            Entry::Occupied(_) => {
                tracing::debug!(metric = %name, "gauge already registered, keeping first source");
            }
            Entry::Vacant(slot) => {
                self.reserve_series(name)?;
                slot.insert(source);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn label_order_does_not_matter() {
        let store = MetricsStore::default();
        let a = store.counter("hits", &[("b", "2"), ("a", "1")]).unwrap();
        let b = store.counter("hits", &[("a", "1"), ("b", "2")]).unwrap();
        a.increment();
        b.increment();

        assert_eq!(store.counter_value("hits", &[("a", "1"), ("b", "2")]), Some(2));
        assert_eq!(store.series_count(), 1);
    }

    #[test]
    fn gauge_reads_live_source() {
        let store = MetricsStore::default();
        let value = Arc::new(AtomicU64::new(3));
        let live = Arc::clone(&value);
        store
            .register_gauge("depth", &[], Arc::new(move || live.load(Ordering::Relaxed) as i64))
            .unwrap();

        assert_eq!(store.gauge_value("depth", &[]), Some(3));
        value.store(5, Ordering::Relaxed);
        assert_eq!(store.gauge_value("depth", &[]), Some(5));
    }

    #[test]
    fn first_gauge_source_wins() {
        let store = MetricsStore::default();
        store.register_gauge("g", &[("k", "v")], Arc::new(|| 1_i64)).unwrap();
        store.register_gauge("g", &[("k", "v")], Arc::new(|| 2_i64)).unwrap();

        assert_eq!(store.gauge_value("g", &[("k", "v")]), Some(1));
        assert_eq!(store.series_count(), 1);
    }

    #[test]
    fn series_limit_rejects_new_series_only() {
        let store = MetricsStore::new(1);
        let first = store.counter("c", &[("n", "1")]).unwrap();

        let err = store.counter("c", &[("n", "2")]).err().unwrap();
        assert_eq!(err.code().as_str(), "REGISTRATION_REJECTED");

        // existing series keep working
        store.counter("c", &[("n", "1")]).unwrap().increment();
        first.increment();
        assert_eq!(store.counter_value("c", &[("n", "1")]), Some(2));
    }

    #[test]
    fn refused_series_are_counted() {
        let store = MetricsStore::new(1);
        store.counter("c", &[("n", "1")]).unwrap();
        assert_eq!(store.rejected_series(), 0);

        for _ in 0..3 {
            assert!(store.counter("c", &[("n", "2")]).is_err());
        }
        assert!(store.timer("t", &[]).is_err());

        assert_eq!(store.rejected_series(), 4);
        assert_eq!(store.series_count(), 1);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let store = MetricsStore::default();
        assert!(store.counter("", &[]).is_err());
        assert!(store.timer("t", &[("", "v")]).is_err());
        assert_eq!(store.series_count(), 0);
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let store = MetricsStore::default();
        let t = store.timer("lat", &[("op", "read")]).unwrap();
        t.record(Duration::from_micros(50));
        t.record(Duration::from_millis(3));
        t.record(Duration::from_secs(2));

        assert_eq!(store.timer_count("lat", &[("op", "read")]), Some(3));

        let text = store.render();
        assert!(text.contains("# TYPE lat histogram"));
        assert!(text.contains("lat_bucket{op=\"read\",le=\"0.0001\"} 1"));
        assert!(text.contains("lat_bucket{op=\"read\",le=\"0.005\"} 2"));
        assert!(text.contains("lat_bucket{op=\"read\",le=\"1\"} 2"));
        assert!(text.contains("lat_bucket{op=\"read\",le=\"+Inf\"} 3"));
        assert!(text.contains("lat_count{op=\"read\"} 3"));
    }

    #[test]
    fn render_sanitizes_names_and_escapes_values() {
        let store = MetricsStore::default();
        store
            .counter("function.calls", &[("service.name", "a\"b")])
            .unwrap()
            .increment();

        let text = store.render();
        assert!(text.contains("# TYPE function_calls counter"));
        assert!(text.contains("function_calls{service_name=\"a\\\"b\"} 1"));
    }
}
