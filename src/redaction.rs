//! Sensitive data redaction.
//!
//! [`RedactingProcessor`] replaces values stored under sensitive keys and
//! applies regex substitutions to every string value, at any nesting depth.
//! Containers shared between several places, or containing themselves, are
//! visited once per call.

use std::collections::HashSet;

use regex::{NoExpand, Regex};

use crate::processor::{ProcessResult, Processor};
use crate::record::EventRecord;
use crate::value::{Key, Value};

/// Lower-cased key names redacted by default.
pub const DEFAULT_SENSITIVE_KEYS: [&str; 14] = [
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "access_token",
    "refresh_token",
    "authorization",
    "cookie",
    "session_id",
    "credit_card",
    "ssn",
    "private_key",
];

pub const DEFAULT_REPLACEMENT: &str = "[REDACTED]";

/// Processor that masks sensitive values.
///
/// A value under a key whose lower-cased name is in the sensitive set is
/// replaced wholesale; pattern substitution is not applied to it. Only
/// string keys are checked against the set, but values under any key are
/// still traversed.
#[derive(Debug, Clone)]
pub struct RedactingProcessor {
    keys: HashSet<String>,
    patterns: Vec<Regex>,
    replacement: String,
}

impl Default for RedactingProcessor {
    fn default() -> Self {
        Self {
            keys: DEFAULT_SENSITIVE_KEYS.iter().map(|k| k.to_string()).collect(),
            patterns: Vec::new(),
            replacement: DEFAULT_REPLACEMENT.to_string(),
        }
    }
}

impl RedactingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the sensitive key set. Names are lower-cased.
    pub fn with_sensitive_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keys = keys
            .into_iter()
            .map(|k| k.as_ref().to_lowercase())
            .collect();
        self
    }

    pub fn with_patterns(mut self, patterns: impl IntoIterator<Item = Regex>) -> Self {
        self.patterns.extend(patterns);
        self
    }

    /// Compile and add patterns. Patterns that fail to compile are skipped
    /// and the remaining ones are still applied.
    pub fn with_pattern_strs<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            match Regex::new(pattern.as_ref()) {
                Ok(re) => self.patterns.push(re),
                Err(e) => {
                    tracing::warn!(pattern = pattern.as_ref(), error = %e, "skipping invalid redaction pattern");
                }
            }
        }
        self
    }

    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = replacement.into();
        self
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.keys.contains(&key.to_lowercase())
    }

    /// Redact every field of `record`.
    pub fn redact(&self, mut record: EventRecord) -> EventRecord {
        let mut visited = HashSet::new();
        for (key, value) in record.iter_mut() {
            if self.is_sensitive(key) {
                *value = Value::Str(self.replacement.clone());
            } else {
                self.redact_value(value, &mut visited);
            }
        }
        record
    }

    fn redact_value(&self, value: &mut Value, visited: &mut HashSet<usize>) {
        match value {
            Value::Str(s) => {
                if let Some(scrubbed) = self.scrub(s) {
                    *s = scrubbed;
                }
            }
            Value::Map(map) => {
                if !visited.insert(map.id()) {
                    return;
                }
                // No lock is held while recursing: another thread may be
                // walking the same containers from a different root.
                let entries: Vec<(Key, Value)> = map
                    .lock()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (key, mut child) in entries {
                    let sensitive = key.as_str().is_some_and(|k| self.is_sensitive(k));
                    if let Some(replaced) = self.redact_child(&mut child, sensitive, visited) {
                        if let Some(slot) = map.lock().get_mut(&key) {
                            *slot = replaced;
                        }
                    }
                }
            }
            Value::List(list) => {
                if !visited.insert(list.id()) {
                    return;
                }
                let items: Vec<Value> = list.lock().clone();
                for (index, mut item) in items.into_iter().enumerate() {
                    if let Some(replaced) = self.redact_child(&mut item, false, visited) {
                        if let Some(slot) = list.lock().get_mut(index) {
                            *slot = replaced;
                        }
                    }
                }
            }
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Error(_) => {}
        }
    }

    /// Redact a value copied out of a container. Returns the value to store
    /// back when it changed; nested containers are updated in place.
    fn redact_child(
        &self,
        child: &mut Value,
        sensitive: bool,
        visited: &mut HashSet<usize>,
    ) -> Option<Value> {
        if sensitive {
            return Some(Value::Str(self.replacement.clone()));
        }
        match child {
            Value::Str(s) => self.scrub(s).map(Value::Str),
            _ => {
                self.redact_value(child, visited);
                None
            }
        }
    }

    fn scrub(&self, s: &str) -> Option<String> {
        if self.patterns.is_empty() {
            return None;
        }
        let mut current = s.to_string();
        for pattern in &self.patterns {
            current = pattern
                .replace_all(&current, NoExpand(&self.replacement))
                .into_owned();
        }
        (current != s).then_some(current)
    }
}

impl Processor for RedactingProcessor {
    fn process(&self, _logger: &str, _method: &str, record: EventRecord) -> ProcessResult {
        Ok(self.redact(record))
    }
}
