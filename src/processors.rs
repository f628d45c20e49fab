//! Standard enrichment stages.
//!
//! These run in the shared chain built by [`configure`](crate::config::configure)
//! and give every event the fields the renderers rely on: `level`,
//! `severity`, `timestamp`, `service` and `message`.

use std::backtrace::Backtrace;

use chrono::{SecondsFormat, Utc};

use crate::exceptions::resolve_exc_info;
use crate::level::Level;
use crate::processor::{ProcessResult, Processor};
use crate::record::EventRecord;
use crate::value::Value;

/// Severity used when `level` is missing or not canonical (Informational).
pub const DEFAULT_SEVERITY: u8 = 6;

/// Set `logger` to the producing logger's name.
pub fn add_logger_name(logger: &str, _method: &str, mut record: EventRecord) -> ProcessResult {
    record.insert("logger", logger);
    Ok(record)
}

/// Set `level` to the called method name.
pub fn add_log_level(_logger: &str, method: &str, mut record: EventRecord) -> ProcessResult {
    record.insert("level", method);
    Ok(record)
}

/// Normalize `level` (or the method name when absent) to one of
/// `CRITICAL`, `ERROR`, `WARN`, `INFO`, `DEBUG`. Unknown names are
/// upper-cased.
pub fn normalize_level(_logger: &str, method: &str, mut record: EventRecord) -> ProcessResult {
    let raw = match record.get("level") {
        Some(level) => level.to_string(),
        None => method.to_string(),
    };
    let level = match Level::from_alias(&raw) {
        Some(level) => level.as_str().to_string(),
        None => raw.to_uppercase(),
    };
    record.insert("level", level);
    Ok(record)
}

/// Add the RFC 5424 `severity` code for the canonical `level`.
///
/// Must run after [`normalize_level`].
pub fn add_syslog_severity(_logger: &str, _method: &str, mut record: EventRecord) -> ProcessResult {
    let severity = record
        .get_str("level")
        .and_then(|name| Level::ALL.iter().find(|l| l.as_str() == name))
        .map(Level::severity)
        .unwrap_or(DEFAULT_SEVERITY);
    record.insert("severity", u32::from(severity));
    Ok(record)
}

/// Sets `service` unless the event already carries one.
#[derive(Debug, Clone)]
pub struct AddService {
    service: String,
}

impl Processor for AddService {
    fn process(&self, _logger: &str, _method: &str, mut record: EventRecord) -> ProcessResult {
        record.insert_if_absent("service", self.service.as_str());
        Ok(record)
    }
}

pub fn add_service(service: impl Into<String>) -> AddService {
    AddService {
        service: service.into(),
    }
}

/// Convert a non-string `event` to its display string.
pub fn ensure_event_is_str(_logger: &str, _method: &str, mut record: EventRecord) -> ProcessResult {
    if let Some(event) = record.get_mut("event") {
        if !matches!(event, Value::Str(_) | Value::Null) {
            *event = Value::Str(event.to_string());
        }
    }
    Ok(record)
}

/// Replace a truthy `stack_info` flag with a `stack` string holding the
/// current backtrace. The flag itself is always removed.
pub fn render_stack_info(_logger: &str, _method: &str, mut record: EventRecord) -> ProcessResult {
    if let Some(flag) = record.remove("stack_info") {
        if flag.is_truthy() {
            record.insert("stack", Backtrace::force_capture().to_string());
        }
    }
    Ok(record)
}

/// Replace `exc_info` with a plain-text `exception` traceback.
///
/// Falsy or unresolvable `exc_info` is removed without adding anything.
pub fn format_exc_info(_logger: &str, _method: &str, mut record: EventRecord) -> ProcessResult {
    let Some(exc_info) = record.remove("exc_info") else {
        return Ok(record);
    };
    if !exc_info.is_truthy() {
        return Ok(record);
    }
    if let Some(err) = resolve_exc_info(&exc_info) {
        record.insert("exception", err.format_traceback());
    }
    Ok(record)
}

/// Writes an ISO-8601 UTC timestamp with a `Z` suffix.
#[derive(Debug, Clone)]
pub struct TimeStamper {
    key: String,
}

impl Default for TimeStamper {
    fn default() -> Self {
        Self::new("timestamp")
    }
}

impl TimeStamper {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Processor for TimeStamper {
    fn process(&self, _logger: &str, _method: &str, mut record: EventRecord) -> ProcessResult {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        record.insert(self.key.as_str(), now);
        Ok(record)
    }
}

/// Renames the `event` field, typically to `message`.
#[derive(Debug, Clone)]
pub struct EventRenamer {
    to: String,
}

impl EventRenamer {
    pub fn new(to: impl Into<String>) -> Self {
        Self { to: to.into() }
    }
}

impl Processor for EventRenamer {
    fn process(&self, _logger: &str, _method: &str, mut record: EventRecord) -> ProcessResult {
        record.rename("event", &self.to);
        Ok(record)
    }
}

/// Identifiers of the active trace span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub trace_flags: u8,
}

impl TraceContext {
    /// A context is valid when both ids are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id != 0 && self.span_id != 0
    }
}

type TraceProvider = Box<dyn Fn() -> Option<TraceContext> + Send + Sync>;

/// Copies the current trace identifiers into `trace_id`, `span_id` and
/// `trace_flags`.
///
/// The provider is asked for the active context on every event; an absent
/// or invalid context leaves the record unchanged.
pub struct TraceContextProcessor {
    provider: TraceProvider,
}

impl TraceContextProcessor {
    pub fn new<F>(provider: F) -> Self
    where
        F: Fn() -> Option<TraceContext> + Send + Sync + 'static,
    {
        Self {
            provider: Box::new(provider),
        }
    }
}

impl Processor for TraceContextProcessor {
    fn process(&self, _logger: &str, _method: &str, mut record: EventRecord) -> ProcessResult {
        if let Some(ctx) = (self.provider)().filter(TraceContext::is_valid) {
            record.insert("trace_id", format!("{:032x}", ctx.trace_id));
            record.insert("span_id", format!("{:016x}", ctx.span_id));
            record.insert("trace_flags", u32::from(ctx.trace_flags));
        }
        Ok(record)
    }
}
