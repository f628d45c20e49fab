//! Ambient, thread-scoped context fields.
//!
//! Fields bound here are merged into every event logged on the same thread
//! by [`merge_contextvars`]. Middleware binds request identifiers once and
//! every log call inside the request picks them up.

use std::cell::RefCell;

use crate::processor::ProcessResult;
use crate::record::EventRecord;
use crate::value::Value;

thread_local! {
    static CONTEXT: RefCell<Vec<(String, Value)>> = const { RefCell::new(Vec::new()) };
}

fn set(key: String, value: Value) {
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        match ctx.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => ctx.push((key, value)),
        }
    });
}

/// Bind fields for the rest of the current thread's context.
pub fn bind_contextvars<I, K, V>(fields: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    for (k, v) in fields {
        set(k.into(), v.into());
    }
}

/// Remove the given keys from the context.
pub fn unbind_contextvars<I, K>(keys: I)
where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        for key in keys {
            ctx.retain(|(k, _)| k != key.as_ref());
        }
    });
}

pub fn clear_contextvars() {
    CONTEXT.with(|ctx| ctx.borrow_mut().clear());
}

/// Snapshot of the fields currently bound on this thread.
pub fn get_contextvars() -> EventRecord {
    CONTEXT.with(|ctx| ctx.borrow().iter().cloned().collect())
}

/// Restores the bindings that [`bound_contextvars`] replaced when dropped.
#[must_use = "the fields are unbound as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Vec<(String, Option<Value>)>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        for (key, previous) in self.previous.drain(..).rev() {
            match previous {
                Some(value) => set(key, value),
                None => unbind_contextvars([key]),
            }
        }
    }
}

/// Bind fields until the returned guard is dropped.
///
/// ```
/// use tracing_log_pipeline::context::{bound_contextvars, get_contextvars};
///
/// {
///     let _guard = bound_contextvars([("request_id", "r-1")]);
///     assert_eq!(get_contextvars().get_str("request_id"), Some("r-1"));
/// }
/// assert!(get_contextvars().get("request_id").is_none());
/// ```
pub fn bound_contextvars<I, K, V>(fields: I) -> ContextGuard
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    let mut previous = Vec::new();
    for (k, v) in fields {
        let key = k.into();
        let old = CONTEXT.with(|ctx| {
            ctx.borrow()
                .iter()
                .find(|(existing, _)| *existing == key)
                .map(|(_, v)| v.clone())
        });
        previous.push((key.clone(), old));
        set(key, v.into());
    }
    ContextGuard { previous }
}

/// Merge the thread's context fields into the record.
///
/// Context fields come first; fields already present in the record win.
pub fn merge_contextvars(_logger: &str, _method: &str, record: EventRecord) -> ProcessResult {
    let mut merged = get_contextvars();
    if merged.is_empty() {
        return Ok(record);
    }
    for (key, value) in record.iter() {
        merged.insert(key, value.clone());
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_merge() {
        clear_contextvars();
        bind_contextvars([("request_id", "abc"), ("user", "u1")]);
        let mut record = EventRecord::with_event("hi");
        record.insert("user", "override");
        let out = merge_contextvars("t", "info", record).unwrap();

        let keys: Vec<&str> = out.keys().collect();
        assert_eq!(keys, vec!["request_id", "user", "event"]);
        assert_eq!(out.get_str("user"), Some("override"));
        clear_contextvars();
    }

    #[test]
    fn test_guard_restores_previous_binding() {
        clear_contextvars();
        bind_contextvars([("tenant", "outer")]);
        {
            let _guard = bound_contextvars([("tenant", "inner"), ("span", "s1")]);
            let ctx = get_contextvars();
            assert_eq!(ctx.get_str("tenant"), Some("inner"));
            assert_eq!(ctx.get_str("span"), Some("s1"));
        }
        let ctx = get_contextvars();
        assert_eq!(ctx.get_str("tenant"), Some("outer"));
        assert!(!ctx.contains_key("span"));
        clear_contextvars();
    }

    #[test]
    fn test_unbind() {
        clear_contextvars();
        bind_contextvars([("a", 1), ("b", 2)]);
        unbind_contextvars(["a"]);
        let ctx = get_contextvars();
        assert!(!ctx.contains_key("a"));
        assert!(ctx.contains_key("b"));
        clear_contextvars();
    }

    #[test]
    fn test_context_is_thread_local() {
        clear_contextvars();
        bind_contextvars([("request_id", "main")]);
        let seen = std::thread::spawn(|| get_contextvars().len()).join().unwrap();
        assert_eq!(seen, 0);
        clear_contextvars();
    }
}
