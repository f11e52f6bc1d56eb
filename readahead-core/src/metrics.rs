//! Prometheus-format metrics
//!
//! Process-wide counters, gauges and histograms for the reader pipeline,
//! rendered in the text exposition format by [`gather_system_metrics`].

use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Monotonically increasing metric
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn render(&self, out: &mut String) {
        let _ = write!(
            out,
            "# HELP {name} {}\n# TYPE {name} counter\n{name} {}\n",
            self.help,
            self.get(),
            name = self.name
        );
    }
}

/// Metric that can go up and down
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    help: &'static str,
    value: AtomicI64,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicI64::new(0),
        }
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn render(&self, out: &mut String) {
        let _ = write!(
            out,
            "# HELP {name} {}\n# TYPE {name} gauge\n{name} {}\n",
            self.help,
            self.get(),
            name = self.name
        );
    }
}

/// Latency histogram in seconds with cumulative buckets
#[derive(Debug)]
pub struct Histogram {
    name: &'static str,
    help: &'static str,
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    /// Sum of observations in microseconds
    sum_micros: AtomicU64,
    count: AtomicU64,
}

const LATENCY_BOUNDS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
];

impl Histogram {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self::with_bounds(name, help, LATENCY_BOUNDS)
    }

    pub fn with_bounds(name: &'static str, help: &'static str, bounds: &'static [f64]) -> Self {
        Self {
            name,
            help,
            bounds,
            buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, seconds: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            if seconds <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Run `f` and record how long it took
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let started = Instant::now();
        let result = f();
        self.observe(started.elapsed().as_secs_f64());
        result
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn render(&self, out: &mut String) {
        let name = self.name;
        let _ = write!(out, "# HELP {name} {}\n# TYPE {name} histogram\n", self.help);
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {}", bucket.load(Ordering::Relaxed));
        }
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {}", self.count());
        let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(out, "{name}_sum {sum}");
        let _ = writeln!(out, "{name}_count {}", self.count());
    }
}

/// Reader pipeline metrics
pub mod standard {
    use super::{Counter, Gauge, Histogram};
    use std::sync::LazyLock;

    pub static STAGES_SCHEDULED: Counter =
        Counter::new("readahead_stages_scheduled_total", "Pipeline stages inserted into streams");

    pub static GRAPH_UPDATES: Counter =
        Counter::new("readahead_graph_updates_total", "Schedule graph parameter refreshes");

    pub static GRAPH_LAUNCHES: Counter =
        Counter::new("readahead_graph_launches_total", "Captured graph replays");

    pub static BATCHES_PREPARED: Counter =
        Counter::new("readahead_batches_prepared_total", "Batches through the precompute stage");

    pub static BATCHES_PUBLISHED: Counter =
        Counter::new("readahead_batches_published_total", "Batches made visible to compute");

    pub static BYTES_READ: Counter =
        Counter::new("readahead_bytes_read_total", "Bytes read from storage");

    pub static BYTES_TRANSFERRED: Counter =
        Counter::new("readahead_bytes_transferred_total", "Bytes copied by D2D stages");

    pub static STREAM_FAULTS: Counter =
        Counter::new("readahead_stream_faults_total", "Streams that entered the faulted state");

    pub static INFLIGHT_BATCHES: Gauge =
        Gauge::new("readahead_inflight_batches", "Raw batches holding a backpressure permit");

    pub static PRECOMPUTE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("readahead_precompute_duration_seconds", "Precompute kernel latency")
    });

    pub static READ_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("readahead_read_duration_seconds", "Storage read latency per source")
    });
}

/// Render every standard metric
pub fn gather_system_metrics() -> String {
    let mut out = String::new();

    for counter in [
        &standard::STAGES_SCHEDULED,
        &standard::GRAPH_UPDATES,
        &standard::GRAPH_LAUNCHES,
        &standard::BATCHES_PREPARED,
        &standard::BATCHES_PUBLISHED,
        &standard::BYTES_READ,
        &standard::BYTES_TRANSFERRED,
        &standard::STREAM_FAULTS,
    ] {
        counter.render(&mut out);
    }

    standard::INFLIGHT_BATCHES.render(&mut out);
    standard::PRECOMPUTE_DURATION.render(&mut out);
    standard::READ_DURATION.render(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_gauge() {
        let counter = Counter::new("test_counter", "Test counter");
        counter.inc();
        counter.inc_by(4);
        assert_eq!(counter.get(), 5);

        let gauge = Gauge::new("test_gauge", "Test gauge");
        gauge.set(3);
        gauge.dec();
        assert_eq!(gauge.get(), 2);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let histogram = Histogram::with_bounds("test_latency", "Test", &[0.01, 0.1]);
        histogram.observe(0.005);
        histogram.observe(0.05);
        histogram.observe(2.0);

        let mut out = String::new();
        histogram.render(&mut out);
        assert!(out.contains("test_latency_bucket{le=\"0.01\"} 1"));
        assert!(out.contains("test_latency_bucket{le=\"0.1\"} 2"));
        assert!(out.contains("test_latency_bucket{le=\"+Inf\"} 3"));
        assert!(out.contains("test_latency_count 3"));
    }

    #[test]
    fn test_gather_contains_reader_metrics() {
        let out = gather_system_metrics();
        assert!(out.contains("# TYPE readahead_stages_scheduled_total counter"));
        assert!(out.contains("readahead_precompute_duration_seconds_count"));
    }
}
