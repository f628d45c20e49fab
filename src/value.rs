use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Serialize, Serializer};

use crate::exceptions::CapturedError;

/// Placeholder rendered when a container is reached again while it is
/// still being rendered.
pub const CYCLE_MARKER: &str = "<cycle>";

/// Key of a nested [`Map`].
///
/// Only [`Key::Str`] keys take part in sensitive-key matching; the other
/// variants exist so that maps produced by adapters (numeric ids, composite
/// keys) can flow through the pipeline unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Str(String),
    Int(i64),
    Tuple(Vec<Key>),
}

impl Key {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => f.write_str(s),
            Key::Int(n) => write!(f, "{}", n),
            Key::Tuple(parts) => {
                f.write_str("(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", part)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Int(n as i64)
    }
}

/// Insertion-ordered mapping used for nested containers.
#[derive(Debug, Clone, Default)]
pub struct Map {
    entries: Vec<(Key, Value)>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &Key) -> Option<&mut Value> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Lookup by string key.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    /// Insert or replace a value. Replacing keeps the original position.
    pub fn insert(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Key, &mut Value)> {
        self.entries.iter_mut().map(|(k, v)| (&*k, v))
    }
}

impl<K: Into<Key>, V: Into<Value>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Map::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Reference-counted, interior-mutable [`Map`].
///
/// Clones share the same allocation; [`SharedMap::id`] is the identity used
/// for cycle detection. A map may (directly or indirectly) contain itself.
#[derive(Clone, Default)]
pub struct SharedMap(Arc<Mutex<Map>>);

impl SharedMap {
    pub fn new(map: Map) -> Self {
        SharedMap(Arc::new(Mutex::new(map)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Map> {
        self.0.lock()
    }

    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &SharedMap) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Contents are not printed: the map may contain itself.
        f.debug_struct("SharedMap").field("id", &self.id()).finish()
    }
}

/// Reference-counted, interior-mutable list of values.
#[derive(Clone, Default)]
pub struct SharedList(Arc<Mutex<Vec<Value>>>);

impl SharedList {
    pub fn new(items: Vec<Value>) -> Self {
        SharedList(Arc::new(Mutex::new(items)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<Value>> {
        self.0.lock()
    }

    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &SharedList) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedList").field("id", &self.id()).finish()
    }
}

/// A heterogeneous event value.
///
/// Containers are shared handles: cloning a `Value::Map` or `Value::List`
/// yields another reference to the same container, not a deep copy.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(SharedMap),
    List(SharedList),
    Error(Arc<CapturedError>),
}

impl Value {
    /// Build a shared map value from key/value pairs.
    pub fn map<K: Into<Key>, V: Into<Value>>(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        Value::Map(SharedMap::new(entries.into_iter().collect()))
    }

    /// Build a shared list value.
    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Value::List(SharedList::new(items.into_iter().map(Into::into).collect()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view: integers, floats and strings that parse as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&SharedMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&SharedList> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&Arc<CapturedError>> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Truthiness: null, `false`, zero, and empty strings or containers are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Map(m) => !m.lock().is_empty(),
            Value::List(l) => !l.lock().is_empty(),
            Value::Error(_) => true,
        }
    }

    /// Convert to a `serde_json::Value`.
    ///
    /// A container reached again while it is on the current rendering path
    /// is emitted as [`CYCLE_MARKER`]. Non-string map keys are rendered with
    /// their display form.
    pub fn to_json(&self) -> serde_json::Value {
        let mut path = Vec::new();
        self.to_json_on_path(&mut path)
    }

    fn to_json_on_path(&self, path: &mut Vec<usize>) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Map(m) => {
                let id = m.id();
                if path.contains(&id) {
                    return serde_json::Value::String(CYCLE_MARKER.to_string());
                }
                // Children are rendered with the lock released, so two
                // threads entering a shared cycle from different ends
                // never wait on each other.
                let entries: Vec<(Key, Value)> =
                    m.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                path.push(id);
                let mut obj = serde_json::Map::new();
                for (k, v) in &entries {
                    obj.insert(k.to_string(), v.to_json_on_path(path));
                }
                path.pop();
                serde_json::Value::Object(obj)
            }
            Value::List(l) => {
                let id = l.id();
                if path.contains(&id) {
                    return serde_json::Value::String(CYCLE_MARKER.to_string());
                }
                let items: Vec<Value> = l.lock().clone();
                path.push(id);
                let items = items.iter().map(|v| v.to_json_on_path(path)).collect();
                path.pop();
                serde_json::Value::Array(items)
            }
            Value::Error(e) => e.summary_json(),
        }
    }
}

/// Scalars compare by value; containers and errors compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
            Value::Error(e) => write!(f, "{}: {}", e.type_name(), e.message()),
            Value::Map(_) | Value::List(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Str(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        i64::try_from(n).map(Value::Int).unwrap_or(Value::Float(n as f64))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::from(n as u64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f as f64)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(SharedMap::new(map))
    }
}

impl From<SharedMap> for Value {
    fn from(map: SharedMap) -> Self {
        Value::Map(map)
    }
}

impl From<SharedList> for Value {
    fn from(list: SharedList) -> Self {
        Value::List(list)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(SharedList::new(items))
    }
}

impl From<CapturedError> for Value {
    fn from(err: CapturedError) -> Self {
        Value::Error(Arc::new(err))
    }
}

impl From<Arc<CapturedError>> for Value {
    fn from(err: Arc<CapturedError>) -> Self {
        Value::Error(err)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::list(items.into_iter().map(Value::from))
            }
            serde_json::Value::Object(obj) => {
                Value::map(obj.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_json_from_both_ends_of_a_cycle() {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let a = SharedMap::new(Map::new());
        let b = SharedMap::new(Map::new());
        a.lock().insert("peer", b.clone());
        b.lock().insert("peer", a.clone());

        let (done_tx, done_rx) = mpsc::channel();
        for root in [a.clone(), b.clone()] {
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                let value = Value::from(root);
                for _ in 0..2_000 {
                    let _ = value.to_json();
                }
                let _ = done_tx.send(value.to_json());
            });
        }
        for _ in 0..2 {
            let rendered = done_rx
                .recv_timeout(Duration::from_secs(10))
                .expect("both threads finish rendering the cycle");
            assert_eq!(rendered["peer"]["peer"], json!(CYCLE_MARKER));
        }

        a.lock().remove(&Key::from("peer"));
    }

    #[test]
    fn test_map_insert_preserves_position() {
        let mut map = Map::new();
        map.insert("a", 1);
        map.insert("b", 2);
        map.insert("a", 3);
        let keys: Vec<String> = map.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(map.get_str("a"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_to_json_nested() {
        let value = Value::map([
            ("name", Value::from("alice")),
            ("tags", Value::list(["x", "y"])),
        ]);
        assert_eq!(value.to_json(), json!({"name": "alice", "tags": ["x", "y"]}));
    }

    #[test]
    fn test_to_json_self_reference_terminates() {
        let shared = SharedMap::new(Map::new());
        shared.lock().insert("self", Value::Map(shared.clone()));
        shared.lock().insert("n", 1);

        let rendered = Value::Map(shared.clone()).to_json();
        assert_eq!(rendered, json!({"self": CYCLE_MARKER, "n": 1}));
    }

    #[test]
    fn test_to_json_shared_but_acyclic_is_rendered_twice() {
        let inner = Value::map([("k", 1)]);
        let outer = Value::list([inner.clone(), inner]);
        assert_eq!(outer.to_json(), json!([{"k": 1}, {"k": 1}]));
    }

    #[test]
    fn test_non_string_keys_rendered_with_display() {
        let mut map = Map::new();
        map.insert(7, "seven");
        map.insert(Key::Tuple(vec![Key::Int(1), Key::from("a")]), true);
        let rendered = Value::from(map).to_json();
        assert_eq!(rendered, json!({"7": "seven", "(1, a)": true}));
    }

    #[test]
    fn test_container_equality_is_identity() {
        let a = Value::map([("k", 1)]);
        let b = Value::map([("k", 1)]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(Value::from(3).as_f64(), Some(3.0));
        assert_eq!(Value::from("12.5").as_f64(), Some(12.5));
        assert_eq!(Value::from("not-a-number").as_f64(), None);
        assert_eq!(Value::Bool(true).as_f64(), None);
    }

    #[test]
    fn test_from_json_round_structure() {
        let value = Value::from(json!({"a": [1, 2.5, null], "b": {"c": "d"}}));
        assert_eq!(value.to_json(), json!({"a": [1, 2.5, null], "b": {"c": "d"}}));
    }
}
