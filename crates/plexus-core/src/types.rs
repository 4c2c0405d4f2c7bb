//! Dynamic values flowing through compiled programs.
//!
//! `Value` extends the scalar set (null, bool, ints, floats, string, bytes)
//! with lists, records, string-keyed maps, asynchronously-produced values and
//! opaque engine handles. Equality and hashing are defined so that values can
//! key hash-join indexes, group-by maps and distinct sets: integers compare by
//! their i64 value, floats by their canonical f64 bits, and the two numeric
//! families never collide. Cross-family numeric equality (`1 == 1.0`) is the
//! business of `ops::equals`, not of `Eq`.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::Deserializer;
use serde::ser::{Error as _, SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{DataType, Field};

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
    List(Vec<Value>),
    Record(Record),
    Map(BTreeMap<String, Value>),
    Future(AsyncValue),
    Opaque(Opaque),
}

/// Fixed-shape record: ordered, unique field names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            fields: Vec::with_capacity(n),
        }
    }

    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        let mut rec = Record::new();
        for (k, v) in pairs {
            rec.set(k, v);
        }
        rec
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Later sets override earlier ones in place, keeping the first position.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn merge(&mut self, other: &Record) {
        for (k, v) in &other.fields {
            self.set(k.clone(), v.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }
}

type SharedResult = Shared<BoxFuture<'static, Result<Value>>>;

/// A value that completes later. Cloning shares the same underlying
/// computation; every reader observes the same outcome.
#[derive(Clone)]
pub struct AsyncValue {
    inner: Arc<SharedResult>,
}

impl AsyncValue {
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            inner: Arc::new(fut.boxed().shared()),
        }
    }

    pub fn ready(value: Value) -> Self {
        Self::new(futures::future::ready(Ok(value)))
    }

    pub fn failed(error: Error) -> Self {
        Self::new(futures::future::ready(Err(error)))
    }

    /// Completed outcome, if any, without polling.
    pub fn peek(&self) -> Option<Result<Value>> {
        self.inner.peek().cloned()
    }

    /// Await completion. Unbounded: callers apply deadlines.
    pub async fn get(&self) -> Result<Value> {
        (*self.inner).clone().await
    }

    pub fn same(&self, other: &AsyncValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for AsyncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peek() {
            Some(Ok(v)) => write!(f, "AsyncValue(ready {:?})", v),
            Some(Err(e)) => write!(f, "AsyncValue(failed {})", e),
            None => write!(f, "AsyncValue(pending)"),
        }
    }
}

/// Engine-owned handle stored inside a value (task contexts, stream
/// accumulators). Identity semantics.
#[derive(Clone)]
pub struct Opaque {
    kind: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    pub fn new<T: Any + Send + Sync>(kind: &'static str, value: T) -> Self {
        Self {
            kind,
            inner: Arc::new(value),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.kind)
    }
}

fn canonical_bits(f: f64) -> u64 {
    if f == 0.0 {
        0
    } else if f.is_nan() {
        f64::NAN.to_bits()
    } else {
        f.to_bits()
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::I32(_) => "int32",
            Value::I64(_) => "int64",
            Value::F32(_) => "float32",
            Value::F64(_) => "float64",
            Value::Str(_) => "string",
            Value::Bin(_) => "binary",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Map(_) => "map",
            Value::Future(_) => "future",
            Value::Opaque(o) => o.kind(),
        }
    }

    /// Shallow runtime type; container element types are not inspected.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Bool(_) => DataType::Boolean,
            Value::I32(_) => DataType::Int32,
            Value::I64(_) => DataType::Int64,
            Value::F32(_) => DataType::Float32,
            Value::F64(_) => DataType::Float64,
            Value::Str(_) => DataType::Utf8,
            Value::Bin(_) => DataType::Binary,
            Value::List(_) => DataType::list(DataType::Any),
            Value::Record(r) => DataType::Struct(
                r.iter()
                    .map(|(n, _)| Field::new(n, DataType::Any, true))
                    .collect(),
            ),
            Value::Map(_) => DataType::Map(Box::new(DataType::Any)),
            Value::Future(_) => DataType::future(DataType::Any),
            Value::Opaque(o) => DataType::Opaque(o.kind().to_string()),
        }
    }

    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            Value::I32(_) => Some(0),
            Value::I64(_) => Some(1),
            Value::F32(_) => Some(2),
            Value::F64(_) => Some(3),
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
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I32(v) => Some(*v as f64),
            Value::I64(v) => Some(*v as f64),
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Iterable view: lists iterate their items, null iterates nothing.
    pub fn into_items(self) -> Result<Vec<Value>> {
        match self {
            Value::List(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(Error::Type(format!(
                "expected an iterable value, found {}",
                other.type_name()
            ))),
        }
    }

    /// Property lookup on records and maps. `None` when absent.
    pub fn property(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(r) => r.get(name),
            Value::Map(m) => m.get(name),
            _ => None,
        }
    }

    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::I64(i),
                None => Value::F64(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Record(Record::from_pairs(
                map.into_iter().map(|(k, v)| (k, Value::from_json(v))),
            )),
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (I32(_) | I64(_), I32(_) | I64(_)) => self.as_i64() == other.as_i64(),
            (F32(_) | F64(_), F32(_) | F64(_)) => {
                let (a, b) = (self.as_f64().unwrap_or(0.0), other.as_f64().unwrap_or(0.0));
                canonical_bits(a) == canonical_bits(b)
            }
            (Str(a), Str(b)) => a == b,
            (Bin(a), Bin(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Record(a), Record(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Future(a), Future(b)) => a.same(b),
            (Opaque(a), Opaque(b)) => a.addr() == b.addr(),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::I32(_) | Value::I64(_) => {
                1u8.hash(state);
                self.as_i64().hash(state);
            }
            Value::F32(_) | Value::F64(_) => {
                2u8.hash(state);
                canonical_bits(self.as_f64().unwrap_or(0.0)).hash(state);
            }
            Value::Bool(b) => {
                3u8.hash(state);
                b.hash(state);
            }
            Value::Str(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Bin(b) => {
                5u8.hash(state);
                b.hash(state);
            }
            Value::List(items) => {
                6u8.hash(state);
                items.hash(state);
            }
            Value::Record(r) => {
                7u8.hash(state);
                r.hash(state);
            }
            Value::Map(m) => {
                8u8.hash(state);
                m.hash(state);
            }
            Value::Future(a) => {
                9u8.hash(state);
                a.addr().hash(state);
            }
            Value::Opaque(o) => {
                10u8.hash(state);
                o.addr().hash(state);
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::I32(v) => write!(f, "I32({})", v),
            Value::I64(v) => write!(f, "I64({})", v),
            Value::F32(v) => write!(f, "F32({})", v),
            Value::F64(v) => write!(f, "F64({})", v),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Bin(b) => write!(f, "Bin({} bytes)", b.len()),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Record(r) => f.debug_map().entries(r.iter()).finish(),
            Value::Map(m) => write!(f, "Map{:?}", m),
            Value::Future(a) => write!(f, "{:?}", a),
            Value::Opaque(o) => write!(f, "{:?}", o),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            other => match serde_json::to_string(other) {
                Ok(s) => write!(f, "{}", s),
                Err(_) => write!(f, "{:?}", other),
            },
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::I32(v) => serializer.serialize_i32(*v),
            Value::I64(v) => serializer.serialize_i64(*v),
            Value::F32(v) => serializer.serialize_f32(*v),
            Value::F64(v) => serializer.serialize_f64(*v),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bin(b) => serializer.serialize_bytes(b),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Record(r) => {
                let mut map = serializer.serialize_map(Some(r.len()))?;
                for (k, v) in r.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Future(a) => match a.peek() {
                Some(Ok(v)) => v.serialize(serializer),
                Some(Err(e)) => Err(S::Error::custom(format!("failed async value: {}", e))),
                None => Err(S::Error::custom("cannot serialize a pending async value")),
            },
            Value::Opaque(o) => Err(S::Error::custom(format!(
                "cannot serialize engine handle '{}'",
                o.kind()
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from_json)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_int_widths_hash_and_compare_equal() {
        let mut set = HashSet::new();
        set.insert(Value::I32(7));
        assert!(set.contains(&Value::I64(7)));
        assert_ne!(Value::I64(1), Value::F64(1.0));
        assert_eq!(Value::F64(0.0), Value::F64(-0.0));
    }

    #[test]
    fn test_record_set_overrides_in_place() {
        let mut rec = Record::from_pairs([("a", Value::I32(1)), ("b", Value::I32(2))]);
        rec.set("a", Value::I32(9));
        assert_eq!(rec.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(rec.get("a"), Some(&Value::I32(9)));
    }

    #[test]
    fn test_json_roundtrip_keeps_structure() {
        let json = serde_json::json!({"id": 1, "tags": ["x", null], "score": 2.5});
        let value = Value::from_json(json.clone());
        assert_eq!(value.to_json().expect("to json"), json);
    }

    #[test]
    fn test_opaque_identity() {
        let a = Value::Opaque(Opaque::new("context", 1u8));
        let b = a.clone();
        let c = Value::Opaque(Opaque::new("context", 1u8));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(serde_json::to_string(&a).is_err());
    }

    #[tokio::test]
    async fn test_async_value_shared_outcome() {
        let v = AsyncValue::new(async { Ok(Value::I32(5)) });
        let w = v.clone();
        assert_eq!(v.get().await.expect("first"), Value::I32(5));
        assert_eq!(w.get().await.expect("second"), Value::I32(5));
        assert!(matches!(w.peek(), Some(Ok(Value::I32(5)))));
        assert_eq!(Value::Future(v.clone()), Value::Future(w));
    }
}
