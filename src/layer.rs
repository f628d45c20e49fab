use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level as TracingLevel, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::config;
use crate::exceptions::CapturedError;
use crate::level::Level;
use crate::record::EventRecord;
use crate::value::Value;

/// `tracing_subscriber` layer that turns `tracing` events into
/// [`EventRecord`]s and dispatches them through the configured pipeline.
///
/// The event target becomes the logger name, so per-logger levels set with
/// [`set_logger_level`](crate::config::set_logger_level) apply to `tracing`
/// targets as well. Events raised while the current thread is already
/// dispatching (for example from inside a sink) are ignored.
#[derive(Clone, Default)]
pub struct PipelineLayer {
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Events handed to the pipeline.
    pub forwarded_events: Arc<AtomicU64>,
}

impl PipelineLayer {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Method name for a `tracing` level.
pub fn method_for(level: &TracingLevel) -> &'static str {
    match *level {
        TracingLevel::TRACE | TracingLevel::DEBUG => "debug",
        TracingLevel::INFO => "info",
        TracingLevel::WARN => "warning",
        _ => "error",
    }
}

impl<S> Layer<S> for PipelineLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if config::is_emitting() {
            return;
        }

        let meta = event.metadata();
        let method = method_for(meta.level());
        let target = meta.target();
        if !config::is_enabled(target, Level::parse_or(method, Level::Info)) {
            return;
        }

        let mut record = EventRecord::new();
        event.record(&mut FieldVisitor { record: &mut record });
        record.insert_if_absent("event", "");

        self.forwarded_events.fetch_add(1, Ordering::Relaxed);
        config::emit(target, method, record);
    }
}

/// Copies `tracing` fields into an [`EventRecord`]. The `message` field
/// becomes the record's `event`.
pub struct FieldVisitor<'a> {
    pub record: &'a mut EventRecord,
}

impl FieldVisitor<'_> {
    fn put(&mut self, field: &Field, value: impl Into<Value>) {
        let name = match field.name() {
            "message" => "event",
            other => other,
        };
        self.record.insert(name, value);
    }
}

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, CapturedError::from_dyn(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_for_levels() {
        assert_eq!(method_for(&TracingLevel::TRACE), "debug");
        assert_eq!(method_for(&TracingLevel::DEBUG), "debug");
        assert_eq!(method_for(&TracingLevel::INFO), "info");
        assert_eq!(method_for(&TracingLevel::WARN), "warning");
        assert_eq!(method_for(&TracingLevel::ERROR), "error");
    }
}
