//! Structured error context.
//!
//! [`CapturedError`] is the error object carried in an event's `exc_info`
//! field. [`ExceptionDictProcessor`] turns that field into a JSON-friendly
//! `exception` sub-record with type, message, module, a bounded frame list
//! and one level of chained-cause information.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::error::Error as StdError;
use std::sync::Arc;

use serde::Serialize;

use crate::processor::{ProcessResult, Processor};
use crate::record::EventRecord;
use crate::value::{Map, Value};

/// Default cap on the number of frames kept in the `exception` sub-record.
pub const DEFAULT_MAX_FRAMES: usize = 20;

/// One stack frame of a captured error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub filename: String,
    pub lineno: u32,
    pub name: String,
    pub line: Option<String>,
    /// Display strings of local variables, when the producer captured them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locals: Option<Vec<(String, String)>>,
}

impl Frame {
    pub fn new(filename: impl Into<String>, lineno: u32, name: impl Into<String>) -> Self {
        Frame {
            filename: filename.into(),
            lineno,
            name: name.into(),
            line: None,
            locals: None,
        }
    }

    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.line = Some(line.into());
        self
    }

    pub fn with_locals<K, V>(mut self, locals: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.locals = Some(
            locals
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    fn to_value(&self, include_locals: bool) -> Value {
        let mut map = Map::new();
        map.insert("filename", self.filename.as_str());
        map.insert("lineno", self.lineno);
        map.insert("name", self.name.as_str());
        map.insert("line", self.line.clone());
        if include_locals {
            if let Some(locals) = self.locals.as_ref().filter(|l| !l.is_empty()) {
                let locals: Map = locals
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                map.insert("locals", locals);
            }
        }
        map.into()
    }

    /// Parse a frame from a map with `filename`, `lineno`, `name` and
    /// optional `line` entries.
    fn from_map(map: &Map) -> Option<Frame> {
        let filename = map.get_str("filename")?.as_str()?.to_string();
        let name = map.get_str("name")?.as_str()?.to_string();
        let lineno = map
            .get_str("lineno")
            .and_then(Value::as_i64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);
        let line = map
            .get_str("line")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Frame {
            filename,
            lineno,
            name,
            line,
            locals: None,
        })
    }
}

/// An error captured for logging.
///
/// Frames are ordered oldest first, so the frame closest to the fault is
/// last. `cause` is an explicit "caused by" link; `context` is the error
/// that was being handled when this one was captured. Setting an explicit
/// cause, or calling [`CapturedError::suppress_context`], hides `context`.
#[derive(Debug, Clone)]
pub struct CapturedError {
    type_name: String,
    module: String,
    message: String,
    frames: Vec<Frame>,
    cause: Option<Arc<CapturedError>>,
    context: Option<Arc<CapturedError>>,
    suppress_context: bool,
}

impl CapturedError {
    /// Build an error description by hand. A `module::Type` path is split
    /// into module and type name.
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        let (module, short) = split_type_path(&type_name.into());
        CapturedError {
            type_name: short,
            module,
            message: message.into(),
            frames: Vec::new(),
            cause: None,
            context: None,
            suppress_context: false,
        }
    }

    /// Capture a live error together with the current backtrace.
    ///
    /// The error's `source()` becomes the explicit cause. If another error
    /// is being handled on this thread (see [`handling`]), it is recorded as
    /// the implicit context.
    pub fn capture<E: StdError + 'static>(err: &E) -> Self {
        let mut captured = CapturedError::new(std::any::type_name::<E>(), err.to_string());
        captured.frames = backtrace_frames(&Backtrace::force_capture());
        captured.context = current_error();
        if let Some(source) = err.source() {
            captured = captured.with_cause(CapturedError::from_dyn(source));
        }
        captured
    }

    /// Describe a type-erased error. The type name is recovered from the
    /// error's `Debug` output on a best-effort basis.
    pub fn from_dyn(err: &(dyn StdError + 'static)) -> Self {
        let mut captured = CapturedError::new(debug_type_name(err), err.to_string());
        if let Some(source) = err.source() {
            captured = captured.with_cause(CapturedError::from_dyn(source));
        }
        captured
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn with_frames(mut self, frames: Vec<Frame>) -> Self {
        self.frames = frames;
        self
    }

    /// Explicit "caused by" link. Hides any implicit context.
    pub fn with_cause(mut self, cause: CapturedError) -> Self {
        self.cause = Some(Arc::new(cause));
        self.suppress_context = true;
        self
    }

    /// Record the error that was being handled when this one was raised.
    pub fn with_context(mut self, context: CapturedError) -> Self {
        self.context = Some(Arc::new(context));
        self
    }

    /// Drop the implicit context link without naming a cause.
    pub fn suppress_context(mut self) -> Self {
        self.suppress_context = true;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn cause(&self) -> Option<&Arc<CapturedError>> {
        self.cause.as_ref()
    }

    pub fn context(&self) -> Option<&Arc<CapturedError>> {
        self.context.as_ref()
    }

    /// The cause to report: the explicit cause if present, otherwise the
    /// implicit context unless it was suppressed.
    pub fn effective_cause(&self) -> Option<&Arc<CapturedError>> {
        match (&self.cause, self.suppress_context) {
            (Some(cause), _) => Some(cause),
            (None, false) => self.context.as_ref(),
            (None, true) => None,
        }
    }

    pub(crate) fn summary_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.type_name,
            "message": self.message,
        })
    }

    /// Plain-text rendering used when the error reaches a renderer without
    /// having been structured.
    pub fn format_traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in &self.frames {
            out.push_str(&format!(
                "  File \"{}\", line {}, in {}\n",
                frame.filename, frame.lineno, frame.name
            ));
            if let Some(line) = &frame.line {
                out.push_str(&format!("    {}\n", line.trim()));
            }
        }
        out.push_str(&format!("{}: {}", self.type_name, self.message));
        if let Some(cause) = self.effective_cause() {
            out.push_str(&format!(
                "\nCaused by: {}: {}",
                cause.type_name, cause.message
            ));
        }
        out
    }
}

fn split_type_path(full: &str) -> (String, String) {
    // Generic arguments may contain `::`; only split the outer path.
    let outer_end = full.find('<').unwrap_or(full.len());
    match full[..outer_end].rfind("::") {
        Some(idx) => (full[..idx].to_string(), full[idx + 2..].to_string()),
        None => (String::new(), full.to_string()),
    }
}

fn debug_type_name(err: &(dyn StdError + 'static)) -> String {
    let debug = format!("{:?}", err);
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if name.is_empty() {
        "Error".to_string()
    } else {
        name
    }
}

/// Parse the frames of a captured backtrace, oldest first.
///
/// Frames belonging to the backtrace machinery and to this module's
/// capture functions are skipped.
fn backtrace_frames(backtrace: &Backtrace) -> Vec<Frame> {
    let rendered = backtrace.to_string();
    let mut frames: Vec<Frame> = Vec::new();
    for line in rendered.lines() {
        let trimmed = line.trim_start();
        if let Some(location) = trimmed.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                let mut parts = location.rsplitn(3, ':');
                let _column = parts.next();
                let lineno = parts.next().and_then(|l| l.parse().ok()).unwrap_or(0);
                if let Some(file) = parts.next() {
                    frame.filename = file.to_string();
                    frame.lineno = lineno;
                }
            }
        } else if let Some((index, name)) = trimmed.split_once(": ") {
            if index.chars().all(|c| c.is_ascii_digit()) {
                frames.push(Frame::new("<unknown>", 0, name.trim()));
            }
        }
    }
    frames.retain(|f| {
        !f.name.starts_with("std::backtrace")
            && !f.name.contains("exceptions::CapturedError::capture")
    });
    frames.reverse();
    frames
}

thread_local! {
    static HANDLING: RefCell<Vec<Arc<CapturedError>>> = const { RefCell::new(Vec::new()) };
}

struct HandlingGuard;

impl Drop for HandlingGuard {
    fn drop(&mut self) {
        HANDLING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Run `f` while `err` is the error being handled on this thread.
///
/// Inside `f`, an `exc_info` of `true` resolves to `err`, and errors
/// captured with [`CapturedError::capture`] record `err` as their context.
pub fn handling<R>(err: Arc<CapturedError>, f: impl FnOnce() -> R) -> R {
    HANDLING.with(|stack| stack.borrow_mut().push(err));
    let _guard = HandlingGuard;
    f()
}

/// The innermost error currently being handled on this thread.
pub fn current_error() -> Option<Arc<CapturedError>> {
    HANDLING.with(|stack| stack.borrow().last().cloned())
}

/// Resolve an `exc_info` value to an error.
///
/// Accepts `true` (the error currently being handled), an error value, or
/// a `[type, value, traceback]` triple. Anything else, including malformed
/// triples, resolves to `None`.
pub fn resolve_exc_info(exc_info: &Value) -> Option<Arc<CapturedError>> {
    match exc_info {
        Value::Bool(true) => current_error(),
        Value::Error(err) => Some(Arc::clone(err)),
        Value::List(items) => {
            let items = items.lock().clone();
            from_triple(&items).map(Arc::new)
        }
        _ => None,
    }
}

fn from_triple(items: &[Value]) -> Option<CapturedError> {
    let [exc_type, exc_value, traceback] = items else {
        return None;
    };
    let type_name = exc_type.as_str().filter(|t| !t.is_empty())?;

    let mut err = match exc_value {
        Value::Error(inner) => {
            let mut err = CapturedError::clone(inner);
            let (module, short) = split_type_path(type_name);
            err.type_name = short;
            if !module.is_empty() {
                err.module = module;
            }
            err
        }
        Value::Null => CapturedError::new(type_name, ""),
        other => CapturedError::new(type_name, other.to_string()),
    };

    if let Value::List(frames) = traceback {
        let frames = frames.lock().clone();
        err.frames = frames
            .iter()
            .filter_map(|f| f.as_map().and_then(|m| Frame::from_map(&m.lock())))
            .collect();
    }
    Some(err)
}

/// Converts `exc_info` into a structured `exception` sub-record.
///
/// # Example
/// ```
/// use tracing_log_pipeline::exceptions::{CapturedError, ExceptionDictProcessor};
/// use tracing_log_pipeline::processor::Processor;
/// use tracing_log_pipeline::record::EventRecord;
///
/// let mut record = EventRecord::with_event("fail");
/// record.insert("exc_info", CapturedError::new("ValueError", "boom"));
///
/// let out = ExceptionDictProcessor::default().process("app", "error", record).unwrap();
/// assert!(out.contains_key("exception"));
/// assert!(!out.contains_key("exc_info"));
/// ```
#[derive(Debug, Clone)]
pub struct ExceptionDictProcessor {
    include_locals: bool,
    max_frames: usize,
}

impl Default for ExceptionDictProcessor {
    fn default() -> Self {
        Self {
            include_locals: false,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

impl ExceptionDictProcessor {
    pub fn new(include_locals: bool, max_frames: usize) -> Self {
        Self {
            include_locals,
            max_frames,
        }
    }

    fn structure(&self, err: &CapturedError) -> Map {
        let skip = err.frames.len().saturating_sub(self.max_frames);
        let frames: Vec<Value> = err.frames[skip..]
            .iter()
            .map(|f| f.to_value(self.include_locals))
            .collect();

        let mut exception = Map::new();
        exception.insert("type", err.type_name.as_str());
        exception.insert("message", err.message.as_str());
        exception.insert("module", err.module.as_str());
        exception.insert("frames", frames);

        if let Some(cause) = err.effective_cause() {
            exception.insert(
                "cause",
                Value::map([
                    ("type", cause.type_name.as_str()),
                    ("message", cause.message.as_str()),
                ]),
            );
        }
        exception
    }
}

impl Processor for ExceptionDictProcessor {
    fn process(&self, _logger: &str, _method: &str, mut record: EventRecord) -> ProcessResult {
        let Some(exc_info) = record.get("exc_info").filter(|v| v.is_truthy()) else {
            return Ok(record);
        };
        let Some(err) = resolve_exc_info(exc_info) else {
            return Ok(record);
        };

        let exception = self.structure(&err);
        record.insert("exception", exception);
        record.remove("exc_info");
        Ok(record)
    }
}
