//! Metric extraction from log events.
//!
//! Counters and histograms are user callbacks keyed by a substring of the
//! event message. Callbacks run on the logging thread; a panicking callback
//! is contained and never affects the event.
//!
//! ```
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//! use tracing_log_pipeline::metrics::MetricProcessor;
//!
//! let logins = Arc::new(AtomicU64::new(0));
//! let counter = Arc::clone(&logins);
//! let metrics = MetricProcessor::new();
//! metrics
//!     .counter("user.login", move |_| {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     })
//!     .histogram("db.query", "duration_ms", |_value, _record| {});
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::processor::{ProcessResult, Processor};
use crate::record::EventRecord;

type CounterFn = Arc<dyn Fn(&EventRecord) + Send + Sync>;
type HistogramFn = Arc<dyn Fn(f64, &EventRecord) + Send + Sync>;

struct Histogram {
    value_field: String,
    callback: HistogramFn,
}

#[derive(Default)]
struct Registry {
    counters: Vec<(String, CounterFn)>,
    histograms: Vec<(String, Histogram)>,
}

/// Invokes registered callbacks for matching events and returns the record
/// unmodified.
///
/// Registering a pattern that already exists replaces its callback.
/// Registration is expected to happen during setup; lookups take a shared
/// read lock.
#[derive(Default)]
pub struct MetricProcessor {
    registry: RwLock<Registry>,
}

impl MetricProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `callback` for every event whose message contains `pattern`.
    pub fn counter<F>(&self, pattern: impl Into<String>, callback: F) -> &Self
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        let pattern = pattern.into();
        let callback: CounterFn = Arc::new(callback);
        let mut registry = self.registry.write();
        match registry.counters.iter_mut().find(|(p, _)| *p == pattern) {
            Some(slot) => slot.1 = callback,
            None => registry.counters.push((pattern, callback)),
        }
        self
    }

    /// Call `callback` with the numeric value of `value_field` for every
    /// event whose message contains `pattern`. Events where the field is
    /// missing or not numeric are skipped.
    pub fn histogram<F>(
        &self,
        pattern: impl Into<String>,
        value_field: impl Into<String>,
        callback: F,
    ) -> &Self
    where
        F: Fn(f64, &EventRecord) + Send + Sync + 'static,
    {
        let pattern = pattern.into();
        let histogram = Histogram {
            value_field: value_field.into(),
            callback: Arc::new(callback),
        };
        let mut registry = self.registry.write();
        match registry.histograms.iter_mut().find(|(p, _)| *p == pattern) {
            Some(slot) => slot.1 = histogram,
            None => registry.histograms.push((pattern, histogram)),
        }
        self
    }

    pub fn observe(&self, record: &EventRecord) {
        let message = record.message().map(ToString::to_string).unwrap_or_default();
        let registry = self.registry.read();

        for (pattern, callback) in &registry.counters {
            if message.contains(pattern.as_str()) {
                let _ = catch_unwind(AssertUnwindSafe(|| callback(record)));
            }
        }

        for (pattern, histogram) in &registry.histograms {
            if !message.contains(pattern.as_str()) {
                continue;
            }
            let Some(value) = record.get(&histogram.value_field).and_then(|v| v.as_f64()) else {
                continue;
            };
            let _ = catch_unwind(AssertUnwindSafe(|| (histogram.callback)(value, record)));
        }
    }
}

impl Processor for MetricProcessor {
    fn process(&self, _logger: &str, _method: &str, record: EventRecord) -> ProcessResult {
        self.observe(&record);
        Ok(record)
    }
}
