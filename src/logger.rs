//! The call-site API.
//!
//! A [`Logger`] builds an [`EventRecord`] from the message, its bound fields
//! and the per-call fields, then hands it to the configured pipeline.
//!
//! ```
//! use tracing_log_pipeline::{fields, Logger};
//!
//! let log = Logger::named("billing").bind([("tenant", "acme")]);
//! log.info("charged {name}", fields! { "name" => "alice", "amount" => 42 });
//! log.opt().stack_info(true).warning("slow path", ());
//! ```

use std::fmt;
use std::sync::Arc;

use crate::config;
use crate::context::{bound_contextvars, ContextGuard};
use crate::error::ConfigError;
use crate::handler::HandlerId;
use crate::level::Level;
use crate::record::EventRecord;
use crate::sink::Sink;
use crate::value::Value;

/// Logger name used when none was given.
pub const ROOT_LOGGER: &str = "root";

/// Positional arguments and named fields of a single log call.
#[derive(Clone, Debug, Default)]
pub struct Fields {
    args: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument, referenced as `{}` or `{0}`.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a named field; a later value for the same key wins.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.named.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.named.push((key, value)),
        }
        self
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn named(&self) -> &[(String, Value)] {
        &self.named
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.named.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.named.is_empty()
    }
}

impl From<()> for Fields {
    fn from(_: ()) -> Self {
        Fields::new()
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Fields {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().fold(Fields::new(), |f, (k, v)| f.field(k, v))
    }
}

impl<K: Into<String>, V: Into<Value>> From<Vec<(K, V)>> for Fields {
    fn from(pairs: Vec<(K, V)>) -> Self {
        pairs.into_iter().fold(Fields::new(), |f, (k, v)| f.field(k, v))
    }
}

/// Build [`Fields`] from `key => value` pairs.
///
/// ```
/// use tracing_log_pipeline::fields;
///
/// let f = fields! { "user" => "alice", "attempt" => 3 };
/// assert_eq!(f.named().len(), 2);
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::logger::Fields::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        $crate::logger::Fields::new()$(.field($key, $value))+
    };
}

/// Result of a successful [`safe_format`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Formatted {
    pub message: String,
    /// Named fields referenced by placeholders, in order of first use.
    pub consumed: Vec<String>,
}

/// Substitute `{}`, `{0}` and `{name}` placeholders in `message`.
///
/// Returns `None` when there is nothing to substitute or when any
/// placeholder cannot be resolved; callers then log the raw message.
/// Attribute, index, conversion and format-spec syntax is not supported.
pub fn safe_format(message: &str, fields: &Fields) -> Option<Formatted> {
    if fields.is_empty() || !message.contains('{') {
        return None;
    }

    let mut out = String::with_capacity(message.len());
    let mut consumed: Vec<String> = Vec::new();
    let mut next_auto = 0usize;
    let mut used_auto = false;
    let mut used_manual = false;
    let mut chars = message.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => return None,
                        Some(ch) => field.push(ch),
                    }
                }
                if field.contains(['.', '[', ']', '!', ':']) {
                    return None;
                }
                let value = if field.is_empty() {
                    if used_manual {
                        return None;
                    }
                    used_auto = true;
                    let value = fields.args.get(next_auto)?;
                    next_auto += 1;
                    value
                } else if let Ok(index) = field.parse::<usize>() {
                    if used_auto {
                        return None;
                    }
                    used_manual = true;
                    fields.args.get(index)?
                } else {
                    let value = fields.get(&field)?;
                    if !consumed.contains(&field) {
                        consumed.push(field);
                    }
                    value
                };
                out.push_str(&value.to_string());
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return None,
            ch => out.push(ch),
        }
    }

    Some(Formatted {
        message: out,
        consumed,
    })
}

/// A cheap, clonable logging handle.
#[derive(Clone, Debug, Default)]
pub struct Logger {
    name: Option<Arc<str>>,
    bound: Vec<(String, Value)>,
}

/// The unnamed logger.
pub fn logger() -> Logger {
    Logger::new()
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl AsRef<str>) -> Self {
        Self {
            name: Some(Arc::from(name.as_ref())),
            bound: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(ROOT_LOGGER)
    }

    /// A new handle with `fields` added to this one's bound fields.
    pub fn bind<I, K, V>(&self, fields: I) -> Logger
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut bound = self.bound.clone();
        for (k, v) in fields {
            let (k, v) = (k.into(), v.into());
            match bound.iter_mut().find(|(key, _)| *key == k) {
                Some(slot) => slot.1 = v,
                None => bound.push((k, v)),
            }
        }
        Logger {
            name: self.name.clone(),
            bound,
        }
    }

    /// Bind `fields` into the thread context until the guard is dropped.
    pub fn contextualize<I, K, V>(&self, fields: I) -> ContextGuard
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        bound_contextvars(fields)
    }

    pub fn bound(&self) -> &[(String, Value)] {
        &self.bound
    }

    /// Options for exactly the next call made through the returned value.
    pub fn opt(&self) -> Opt<'_> {
        Opt {
            logger: self,
            exception: None,
            stack_info: false,
        }
    }

    pub fn trace(&self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("trace", message, fields)
    }

    pub fn debug(&self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("debug", message, fields)
    }

    pub fn info(&self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("info", message, fields)
    }

    pub fn success(&self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("success", message, fields)
    }

    pub fn warning(&self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("warning", message, fields)
    }

    pub fn warn(&self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("warn", message, fields)
    }

    pub fn error(&self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("error", message, fields)
    }

    pub fn critical(&self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("critical", message, fields)
    }

    pub fn fatal(&self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("fatal", message, fields)
    }

    /// Log at error level with `exc_info = true` unless the call sets it.
    pub fn exception(&self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("exception", message, fields)
    }

    /// Log through any level method name or alias.
    pub fn log(&self, method: &str, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.dispatch(method, &message, fields.into(), None, false);
    }

    /// Add a handler writing to `sink`, rendered in the configured mode.
    /// `level` defaults to the configured global level.
    pub fn add(&self, sink: impl Into<Sink>, level: Option<Level>) -> Result<HandlerId, ConfigError> {
        let sink = sink.into().into_log_sink()?;
        Ok(config::add_facade_handler(sink, level))
    }

    /// Remove a handler added through [`Logger::add`], or all of them for
    /// `None`. Returns `false` for ids this facade did not add.
    pub fn remove(&self, id: Option<HandlerId>) -> bool {
        match id {
            Some(id) => config::is_facade_handler(id) && config::remove_handler(id),
            None => {
                config::remove_facade_handlers();
                true
            }
        }
    }

    fn dispatch(
        &self,
        alias: &str,
        message: &dyn fmt::Display,
        fields: Fields,
        exception: Option<Value>,
        stack_info: bool,
    ) {
        let method = canonical_method(alias);
        let level = Level::parse_or(method, Level::Info);
        if !config::is_enabled(self.name(), level) {
            return;
        }

        let raw = message.to_string();
        let (event, consumed) = match safe_format(&raw, &fields) {
            Some(formatted) => (formatted.message, formatted.consumed),
            None => (raw, Vec::new()),
        };

        let mut record = EventRecord::new();
        record.extend(self.bound.iter().cloned());
        record.extend(
            fields
                .named
                .into_iter()
                .filter(|(k, _)| !consumed.contains(k)),
        );
        record.insert("event", event);
        if let Some(exception) = exception {
            record.insert_if_absent("exc_info", exception);
        } else if alias.eq_ignore_ascii_case("exception") {
            record.insert_if_absent("exc_info", true);
        }
        if stack_info {
            record.insert_if_absent("stack_info", true);
        }

        config::emit(self.name(), method, record);
    }
}

/// One-shot options for a single log call, from [`Logger::opt`].
#[must_use = "options apply only to the next level method called on them"]
pub struct Opt<'a> {
    logger: &'a Logger,
    exception: Option<Value>,
    stack_info: bool,
}

impl Opt<'_> {
    /// Attach an error (or `true` for the error currently being handled).
    pub fn exception(mut self, exception: impl Into<Value>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    pub fn stack_info(mut self, stack_info: bool) -> Self {
        self.stack_info = stack_info;
        self
    }

    pub fn trace(self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("trace", message, fields)
    }

    pub fn debug(self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("debug", message, fields)
    }

    pub fn info(self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("info", message, fields)
    }

    pub fn success(self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("success", message, fields)
    }

    pub fn warning(self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("warning", message, fields)
    }

    pub fn warn(self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("warn", message, fields)
    }

    pub fn error(self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("error", message, fields)
    }

    pub fn critical(self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("critical", message, fields)
    }

    pub fn fatal(self, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.log("fatal", message, fields)
    }

    pub fn log(self, method: &str, message: impl fmt::Display, fields: impl Into<Fields>) {
        self.logger
            .dispatch(method, &message, fields.into(), self.exception, self.stack_info);
    }
}

/// Map a level method alias onto the method name handed to processors.
fn canonical_method(alias: &str) -> &'static str {
    match Level::parse_or(alias, Level::Info) {
        Level::Debug => "debug",
        Level::Info => "info",
        Level::Warn => "warning",
        Level::Error => "error",
        Level::Critical => "critical",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(message: &str, fields: Fields) -> Option<String> {
        safe_format(message, &fields).map(|f| f.message)
    }

    #[test]
    fn test_named_placeholder_is_consumed() {
        let out = safe_format("Hello {name}", &fields! { "name" => "world", "id" => 7 }).unwrap();
        assert_eq!(out.message, "Hello world");
        assert_eq!(out.consumed, vec!["name".to_string()]);
    }

    #[test]
    fn test_positional_placeholders() {
        assert_eq!(format("{} + {} = 3", Fields::new().arg(1).arg(2)).as_deref(), Some("1 + 2 = 3"));
        assert_eq!(format("{1} before {0}", Fields::new().arg("a").arg("b")).as_deref(), Some("b before a"));
        assert_eq!(format("only {}", Fields::new().arg(1).arg(2)).as_deref(), Some("only 1"));
    }

    #[test]
    fn test_escaped_braces() {
        assert_eq!(
            format("{{literal}} {x}", fields! { "x" => 1 }).as_deref(),
            Some("{literal} 1")
        );
    }

    #[test]
    fn test_failures_return_none() {
        assert_eq!(format("Hello {missing}", fields! { "name" => "x" }), None);
        assert_eq!(format("{3}", Fields::new().arg(1)), None);
        assert_eq!(format("{user.name}", fields! { "user" => "x" }), None);
        assert_eq!(format("{0!x}", Fields::new().arg(1)), None);
        assert_eq!(format("open {", Fields::new().arg(1)), None);
        assert_eq!(format("close }", Fields::new().arg(1)), None);
        assert_eq!(format("{} {0}", Fields::new().arg(1)), None);
    }

    #[test]
    fn test_not_attempted_without_fields_or_braces() {
        assert_eq!(format("Hello {name}", Fields::new()), None);
        assert_eq!(format("Hello", fields! { "name" => "x" }), None);
    }

    #[test]
    fn test_fields_from_pairs() {
        let f: Fields = [("a", 1), ("a", 2)].into();
        assert_eq!(f.named().len(), 1);
        assert_eq!(f.get("a"), Some(&Value::Int(2)));
        let f: Fields = ().into();
        assert!(f.is_empty());
    }

    #[test]
    fn test_bind_overrides_and_keeps_name() {
        let base = Logger::named("svc").bind([("a", 1), ("b", 2)]);
        let derived = base.bind([("b", 3)]);
        assert_eq!(derived.name(), "svc");
        assert_eq!(derived.bound()[1], ("b".to_string(), Value::Int(3)));
        assert_eq!(base.bound()[1], ("b".to_string(), Value::Int(2)));
        assert_eq!(Logger::new().name(), ROOT_LOGGER);
    }

    #[test]
    fn test_canonical_method() {
        assert_eq!(canonical_method("trace"), "debug");
        assert_eq!(canonical_method("success"), "info");
        assert_eq!(canonical_method("warn"), "warning");
        assert_eq!(canonical_method("exception"), "error");
        assert_eq!(canonical_method("fatal"), "critical");
    }
}
