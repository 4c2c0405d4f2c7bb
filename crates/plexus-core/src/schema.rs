//! Static types seen by the compiler. Pure data.
//!
//! `DataType` describes what an expression produces; `Value` (in `types.rs`)
//! is what it produces at run time. `Any` marks dynamically-typed positions,
//! where checks move from compile time to evaluation.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Any,
    Null,
    /// Produced by effect-only expressions; never stored in a slot.
    Void,
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
    List(Box<DataType>),
    Struct(Vec<Field>),
    /// Dynamically-keyed map with string keys.
    Map(Box<DataType>),
    /// Asynchronously-produced value of the inner type.
    Future(Box<DataType>),
    /// Engine-owned handle (task context, stream accumulator).
    Opaque(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

impl DataType {
    pub fn list(inner: DataType) -> Self {
        DataType::List(Box::new(inner))
    }

    pub fn future(inner: DataType) -> Self {
        DataType::Future(Box::new(inner))
    }

    pub fn is_numeric(&self) -> bool {
        self.numeric_rank().is_some()
    }

    /// I32 < I64 < F32 < F64.
    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            DataType::Int32 => Some(0),
            DataType::Int64 => Some(1),
            DataType::Float32 => Some(2),
            DataType::Float64 => Some(3),
            _ => None,
        }
    }

    /// `Any` and `Null` adapt to whatever they meet.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, DataType::Any | DataType::Null)
    }

    pub fn is_iterable(&self) -> bool {
        matches!(self, DataType::List(_) | DataType::Any | DataType::Null)
    }

    /// Strip one level of `Future`: the type RESOLVE produces.
    pub fn resolved(&self) -> DataType {
        match self {
            DataType::Future(inner) => (**inner).clone(),
            other => other.clone(),
        }
    }

    pub fn element_type(&self) -> Option<DataType> {
        match self {
            DataType::List(inner) => Some((**inner).clone()),
            DataType::Any | DataType::Null => Some(DataType::Any),
            _ => None,
        }
    }

    pub fn property_type(&self, name: &str) -> Option<DataType> {
        match self {
            DataType::Struct(fields) => fields
                .iter()
                .find(|f| f.name == name)
                .map(|f| f.data_type.clone()),
            DataType::Map(inner) => Some((**inner).clone()),
            DataType::Any | DataType::Null => Some(DataType::Any),
            _ => None,
        }
    }
}

/// Lenient unification for branch joins (IF, CATCH, COALESCE, ARRAY).
/// Never fails: incompatible types widen to `Any`.
pub fn unify(a: &DataType, b: &DataType) -> DataType {
    use DataType::*;
    match (a, b) {
        _ if a == b => a.clone(),
        (Null, other) | (other, Null) => other.clone(),
        (Void, other) | (other, Void) => other.clone(),
        (Any, _) | (_, Any) => Any,
        (List(x), List(y)) => DataType::list(unify(x, y)),
        (Map(x), Map(y)) => Map(Box::new(unify(x, y))),
        (Future(x), Future(y)) => DataType::future(unify(x, y)),
        _ => match (a.numeric_rank(), b.numeric_rank()) {
            (Some(ra), Some(rb)) => {
                if ra >= rb {
                    a.clone()
                } else {
                    b.clone()
                }
            }
            _ => Any,
        },
    }
}

pub fn unify_all<'a>(types: impl IntoIterator<Item = &'a DataType>) -> DataType {
    types
        .into_iter()
        .fold(DataType::Null, |acc, t| unify(&acc, t))
}

/// Strict unification for arithmetic. `None` means the operands can never
/// be combined, which the compiler reports as a unification failure.
pub fn unify_numeric(a: &DataType, b: &DataType) -> Option<DataType> {
    match (a.is_dynamic(), b.is_dynamic()) {
        (true, true) => Some(DataType::Any),
        (true, false) => b.is_numeric().then_some(DataType::Any),
        (false, true) => a.is_numeric().then_some(DataType::Any),
        (false, false) => {
            let (ra, rb) = (a.numeric_rank()?, b.numeric_rank()?);
            Some(if ra >= rb { a.clone() } else { b.clone() })
        }
    }
}

/// Strict unification for equality and ordering.
pub fn unify_comparable(a: &DataType, b: &DataType) -> Option<DataType> {
    if a.is_dynamic() || b.is_dynamic() {
        return Some(DataType::Any);
    }
    if a == b {
        return Some(a.clone());
    }
    match (a, b) {
        (DataType::List(_), DataType::List(_)) => Some(DataType::Any),
        (DataType::Struct(_), DataType::Struct(_)) => Some(DataType::Any),
        (DataType::Map(_), DataType::Map(_)) => Some(DataType::Any),
        _ => unify_numeric(a, b),
    }
}

/// Whether a value of type `source` may be stored where `target` is
/// declared. Numbers may widen, never narrow; dynamic types defer the check
/// to evaluation.
pub fn is_assignable(target: &DataType, source: &DataType) -> bool {
    use DataType::*;
    if target == source || target.is_dynamic() || source.is_dynamic() {
        return true;
    }
    match (target, source) {
        (List(t), List(s)) | (Map(t), Map(s)) | (Future(t), Future(s)) => is_assignable(t, s),
        (Future(t), s) => is_assignable(t, s),
        (Struct(tf), Struct(sf)) => tf.iter().all(|t| {
            match sf.iter().find(|s| s.name == t.name) {
                Some(s) => is_assignable(&t.data_type, &s.data_type),
                None => t.nullable,
            }
        }),
        (Map(t), Struct(sf)) => sf.iter().all(|s| is_assignable(t, &s.data_type)),
        _ => match (target.numeric_rank(), source.numeric_rank()) {
            (Some(rt), Some(rs)) => rs <= rt,
            _ => false,
        },
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Any => write!(f, "any"),
            DataType::Null => write!(f, "null"),
            DataType::Void => write!(f, "void"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Int64 => write!(f, "int64"),
            DataType::Float32 => write!(f, "float32"),
            DataType::Float64 => write!(f, "float64"),
            DataType::Utf8 => write!(f, "string"),
            DataType::Binary => write!(f, "binary"),
            DataType::List(inner) => write!(f, "list<{}>", inner),
            DataType::Map(inner) => write!(f, "map<{}>", inner),
            DataType::Future(inner) => write!(f, "future<{}>", inner),
            DataType::Opaque(name) => write!(f, "{}", name),
            DataType::Struct(fields) => {
                write!(f, "struct{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.data_type)?;
                }
                write!(f, "}}")
            }
        }
    }
}
