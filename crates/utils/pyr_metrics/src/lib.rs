//! Render statistics, cheap enough to leave on.
//!
//! Every metric is a couple of atomics: hot paths bump them with relaxed
//! ordering and nobody takes a lock. [`export`] turns a set of metrics into
//! one JSON value for dumping alongside a render.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// ---

/// Anything that can report itself into the exported JSON document.
pub trait Metric {
    fn to_json(&self) -> serde_json::Value;
}

/// Export named metrics as one JSON object, e.g. for an end-of-render dump.
pub fn export<'a>(metrics: impl IntoIterator<Item = (&'a str, &'a dyn Metric)>) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for (name, metric) in metrics {
        object.insert(name.to_owned(), metric.to_json());
    }
    serde_json::Value::Object(object)
}

// ---

/// A monotonically increasing count.
pub struct Counter {
    value: AtomicU64,
    unit: &'static str,
}

impl Counter {
    pub const fn new(unit: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            unit,
        }
    }

    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Metric for Counter {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "counter",
            "value": self.get(),
            "unit": self.unit,
        })
    }
}

/// A value that goes up and down; the export shows the latest.
pub struct Gauge {
    value: AtomicU64,
    unit: &'static str,
}

impl Gauge {
    pub const fn new(unit: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            unit,
        }
    }

    #[inline]
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Metric for Gauge {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "gauge",
            "value": self.get(),
            "unit": self.unit,
        })
    }
}

// ---

/// A fixed-range histogram with an underflow and an overflow bin.
pub struct Histogram {
    start: i64,
    end: i64,
    bin_size: f64,
    bins: Box<[AtomicU64]>,
    unit: &'static str,
}

impl Histogram {
    /// `num_bins` includes the underflow and overflow bins; at least 3.
    pub fn new(unit: &'static str, start: i64, end: i64, num_bins: usize) -> Self {
        debug_assert!(num_bins >= 3);
        debug_assert!(end > start);
        Self {
            start,
            end,
            bin_size: (end - start) as f64 / (num_bins - 2) as f64,
            bins: (0..num_bins).map(|_| AtomicU64::new(0)).collect(),
            unit,
        }
    }

    pub fn add(&self, value: i64) {
        let bin = if value < self.start {
            0
        } else {
            let offset = ((value - self.start) as f64 / self.bin_size) as usize + 1;
            offset.min(self.bins.len() - 1)
        };
        self.bins[bin].fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> Vec<u64> {
        self.bins
            .iter()
            .map(|bin| bin.load(Ordering::Relaxed))
            .collect()
    }
}

impl Metric for Histogram {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "histogram",
            "min": self.start,
            "max": self.end,
            "num_bins": self.bins.len(),
            "value": self.counts(),
            "unit": self.unit,
        })
    }
}

// ---

/// Accumulates wall-clock time across scoped measurements.
#[derive(Default)]
pub struct Stopwatch {
    nanos: AtomicU64,
}

impl Stopwatch {
    pub const fn new() -> Self {
        Self {
            nanos: AtomicU64::new(0),
        }
    }

    /// Time everything until the guard drops.
    pub fn scoped(&self) -> ScopedStopwatch<'_> {
        ScopedStopwatch {
            parent: self,
            start: Instant::now(),
        }
    }

    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }
}

impl Metric for Stopwatch {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "stopwatch",
            "value": self.nanos.load(Ordering::Relaxed),
            "unit": "nanoseconds",
        })
    }
}

impl std::fmt::Display for Stopwatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3} s", self.total().as_secs_f64())
    }
}

pub struct ScopedStopwatch<'a> {
    parent: &'a Stopwatch,
    start: Instant,
}

impl Drop for ScopedStopwatch<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_nanos() as u64;
        self.parent.nanos.fetch_add(elapsed, Ordering::Relaxed);
    }
}

// ---
