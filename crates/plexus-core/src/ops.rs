//! Value-level semantics shared by the compiler and the stream stages:
//! arithmetic with numeric promotion, null-aware equality and ordering,
//! truthiness, membership and casts.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::DataType;
use crate::types::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mult,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Lteq,
    Gt,
    Gteq,
}

fn type_order(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::I32(_) | Value::I64(_) | Value::F32(_) | Value::F64(_) => 2,
        Value::Str(_) => 3,
        Value::Bin(_) => 4,
        Value::List(_) => 5,
        Value::Record(_) => 6,
        Value::Map(_) => 7,
        Value::Future(_) => 8,
        Value::Opaque(_) => 9,
    }
}

/// Total order used by COMPARE, order-by and sort helpers.
///
/// Nulls sort first; numbers compare across widths; values of different
/// kinds order by kind.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    use Value::*;
    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Bool(x), Bool(y)) => x.cmp(y),
        (I32(_) | I64(_), I32(_) | I64(_)) => a.as_i64().cmp(&b.as_i64()),
        (x, y) if x.numeric_rank().is_some() && y.numeric_rank().is_some() => {
            let (fx, fy) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            fx.total_cmp(&fy)
        }
        (Str(x), Str(y)) => x.cmp(y),
        (Bin(x), Bin(y)) => x.cmp(y),
        (List(x), List(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let o = compare(l, r);
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        (Record(x), Record(y)) => {
            for ((ln, lv), (rn, rv)) in x.iter().zip(y.iter()) {
                let o = ln.cmp(rn).then_with(|| compare(lv, rv));
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        (Map(x), Map(y)) => {
            for ((ln, lv), (rn, rv)) in x.iter().zip(y.iter()) {
                let o = ln.cmp(rn).then_with(|| compare(lv, rv));
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_order(a).cmp(&type_order(b)),
    }
}

/// EQ semantics: numbers compare across widths and families, null equals
/// only null.
pub fn equals(a: &Value, b: &Value) -> bool {
    match (a.numeric_rank(), b.numeric_rank()) {
        (Some(_), Some(_)) => compare(a, b) == Ordering::Equal,
        _ => a == b,
    }
}

/// BOOLEAN_COMPARE semantics: false whenever either side is null.
pub fn compare_op(op: Comparison, a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    let o = compare(a, b);
    match op {
        Comparison::Lt => o == Ordering::Less,
        Comparison::Lteq => o != Ordering::Greater,
        Comparison::Gt => o == Ordering::Greater,
        Comparison::Gteq => o != Ordering::Less,
    }
}

/// BOOL semantics.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::I32(i) => *i != 0,
        Value::I64(i) => *i != 0,
        Value::F32(f) => *f != 0.0,
        Value::F64(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::Bin(b) => !b.is_empty(),
        Value::List(items) => !items.is_empty(),
        Value::Record(r) => !r.is_empty(),
        Value::Map(m) => !m.is_empty(),
        Value::Future(_) | Value::Opaque(_) => true,
    }
}

/// CONTAINS semantics; IN is the same with arguments swapped.
/// A null on either side is `false`, never an error.
pub fn contains(collection: &Value, item: &Value) -> bool {
    if collection.is_null() || item.is_null() {
        return false;
    }
    match collection {
        Value::List(items) => items.iter().any(|v| equals(v, item)),
        Value::Str(s) => item.as_str().map(|needle| s.contains(needle)).unwrap_or(false),
        Value::Record(r) => item.as_str().map(|k| r.get(k).is_some()).unwrap_or(false),
        Value::Map(m) => item.as_str().map(|k| m.contains_key(k)).unwrap_or(false),
        other => equals(other, item),
    }
}

pub fn arithmetic(op: ArithmeticOp, a: &Value, b: &Value) -> Result<Value> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    let rank = match (a.numeric_rank(), b.numeric_rank()) {
        (Some(ra), Some(rb)) => ra.max(rb),
        _ => {
            return Err(Error::Type(format!(
                "cannot apply {:?} to {} and {}",
                op,
                a.type_name(),
                b.type_name()
            )))
        }
    };
    match rank {
        0 | 1 => {
            let (x, y) = (a.as_i64().unwrap_or(0), b.as_i64().unwrap_or(0));
            let out = int_math(op, x, y)?;
            if rank == 0 {
                Ok(Value::I32(out as i32))
            } else {
                Ok(Value::I64(out))
            }
        }
        _ => {
            let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            let out = match op {
                ArithmeticOp::Add => x + y,
                ArithmeticOp::Sub => x - y,
                ArithmeticOp::Mult => x * y,
                ArithmeticOp::Div => x / y,
                ArithmeticOp::Mod => x % y,
                ArithmeticOp::Pow => x.powf(y),
            };
            if rank == 2 {
                Ok(Value::F32(out as f32))
            } else {
                Ok(Value::F64(out))
            }
        }
    }
}

fn int_math(op: ArithmeticOp, x: i64, y: i64) -> Result<i64> {
    match op {
        ArithmeticOp::Add => Ok(x.wrapping_add(y)),
        ArithmeticOp::Sub => Ok(x.wrapping_sub(y)),
        ArithmeticOp::Mult => Ok(x.wrapping_mul(y)),
        ArithmeticOp::Div => {
            if y == 0 {
                Err(Error::Exec("division by zero".into()))
            } else {
                Ok(x.wrapping_div(y))
            }
        }
        ArithmeticOp::Mod => {
            if y == 0 {
                Err(Error::Exec("division by zero".into()))
            } else {
                Ok(x.wrapping_rem(y))
            }
        }
        ArithmeticOp::Pow => u32::try_from(y)
            .ok()
            .and_then(|e| x.checked_pow(e))
            .ok_or_else(|| Error::Exec(format!("integer power {}^{} out of range", x, y))),
    }
}

pub fn negate(v: &Value) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::I32(i) => Ok(Value::I32(i.wrapping_neg())),
        Value::I64(i) => Ok(Value::I64(i.wrapping_neg())),
        Value::F32(f) => Ok(Value::F32(-f)),
        Value::F64(f) => Ok(Value::F64(-f)),
        other => Err(Error::Type(format!("cannot negate {}", other.type_name()))),
    }
}

fn cast_error(v: &Value, ty: &DataType) -> Error {
    Error::Type(format!("cannot cast {} to {}", v.type_name(), ty))
}

/// Convert `v` to `ty`. Null casts to null for every target.
pub fn cast(v: Value, ty: &DataType) -> Result<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    match ty {
        DataType::Any | DataType::Future(_) | DataType::Opaque(_) => Ok(v),
        DataType::Void => Ok(Value::Null),
        DataType::Null => Err(cast_error(&v, ty)),
        DataType::Boolean => match v {
            Value::Bool(_) => Ok(v),
            Value::Str(ref s) => match s.parse::<bool>() {
                Ok(b) => Ok(Value::Bool(b)),
                Err(_) => Err(cast_error(&v, ty)),
            },
            ref x if x.numeric_rank().is_some() => Ok(Value::Bool(truthy(x))),
            _ => Err(cast_error(&v, ty)),
        },
        DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64 => {
            cast_numeric(v, ty)
        }
        DataType::Utf8 => match v {
            Value::Str(_) => Ok(v),
            Value::Bin(b) => String::from_utf8(b)
                .map(Value::Str)
                .map_err(|e| Error::Type(format!("binary is not utf-8: {}", e))),
            other => Ok(Value::Str(other.to_string())),
        },
        DataType::Binary => match v {
            Value::Bin(_) => Ok(v),
            Value::Str(s) => Ok(Value::Bin(s.into_bytes())),
            other => Err(cast_error(&other, ty)),
        },
        DataType::List(inner) => match v {
            Value::List(items) => items
                .into_iter()
                .map(|item| cast(item, inner))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            other => Err(cast_error(&other, ty)),
        },
        DataType::Struct(fields) => {
            let source = match v {
                Value::Record(r) => r,
                Value::Map(m) => Record::from_pairs(m),
                other => return Err(cast_error(&other, ty)),
            };
            let mut out = Record::with_capacity(fields.len());
            for field in fields {
                match source.get(&field.name) {
                    Some(value) => out.set(&field.name, cast(value.clone(), &field.data_type)?),
                    None if field.nullable => out.set(&field.name, Value::Null),
                    None => {
                        return Err(Error::Type(format!(
                            "record is missing required field '{}'",
                            field.name
                        )))
                    }
                }
            }
            Ok(Value::Record(out))
        }
        DataType::Map(inner) => {
            let pairs: Vec<(String, Value)> = match v {
                Value::Record(r) => r.into_fields(),
                Value::Map(m) => m.into_iter().collect(),
                other => return Err(cast_error(&other, ty)),
            };
            let mut out = BTreeMap::new();
            for (k, value) in pairs {
                out.insert(k, cast(value, inner)?);
            }
            Ok(Value::Map(out))
        }
    }
}

fn cast_numeric(v: Value, ty: &DataType) -> Result<Value> {
    let parsed = match &v {
        Value::Str(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Value::I64(i),
                Err(_) => Value::F64(s.parse::<f64>().map_err(|_| cast_error(&v, ty))?),
            }
        }
        Value::Bool(b) => Value::I64(*b as i64),
        x if x.numeric_rank().is_some() => x.clone(),
        _ => return Err(cast_error(&v, ty)),
    };
    // Fractions truncate toward zero; anything out of range is an error.
    let as_int = || -> Result<i64> {
        let f = match &parsed {
            Value::F32(f) => f64::from(*f),
            Value::F64(f) => *f,
            other => return other.as_i64().ok_or_else(|| cast_error(&v, ty)),
        };
        if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            Ok(f as i64)
        } else {
            Err(cast_error(&v, ty))
        }
    };
    Ok(match ty {
        DataType::Int32 => {
            Value::I32(i32::try_from(as_int()?).map_err(|_| cast_error(&v, ty))?)
        }
        DataType::Int64 => Value::I64(as_int()?),
        DataType::Float32 => {
            let f = parsed.as_f64().ok_or_else(|| cast_error(&v, ty))?;
            if f.is_finite() && f.abs() > f64::from(f32::MAX) {
                return Err(cast_error(&v, ty));
            }
            Value::F32(f as f32)
        }
        _ => Value::F64(parsed.as_f64().ok_or_else(|| cast_error(&v, ty))?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    #[test]
    fn test_arithmetic_promotion() {
        assert_eq!(
            arithmetic(ArithmeticOp::Add, &Value::I32(2), &Value::I32(3)).expect("add"),
            Value::I32(5)
        );
        assert_eq!(
            arithmetic(ArithmeticOp::Mult, &Value::I32(2), &Value::I64(3)).expect("mult"),
            Value::I64(6)
        );
        assert_eq!(
            arithmetic(ArithmeticOp::Div, &Value::I64(7), &Value::F64(2.0)).expect("div"),
            Value::F64(3.5)
        );
        assert_eq!(
            arithmetic(ArithmeticOp::Pow, &Value::I32(2), &Value::I32(10)).expect("pow"),
            Value::I32(1024)
        );
    }

    #[test]
    fn test_arithmetic_null_and_errors() {
        assert_eq!(
            arithmetic(ArithmeticOp::Sub, &Value::Null, &Value::I32(1)).expect("null"),
            Value::Null
        );
        assert!(matches!(
            arithmetic(ArithmeticOp::Mod, &Value::I32(1), &Value::I32(0)),
            Err(Error::Exec(_))
        ));
        assert!(matches!(
            arithmetic(ArithmeticOp::Add, &Value::str("a"), &Value::I32(1)),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn test_compare_nulls_first_and_mixed_numbers() {
        let mut vals = vec![Value::I64(3), Value::Null, Value::F64(1.5), Value::I32(2)];
        vals.sort_by(compare);
        assert_eq!(
            vals,
            vec![Value::Null, Value::F64(1.5), Value::I32(2), Value::I64(3)]
        );
    }

    #[test]
    fn test_compare_op_with_nulls_is_false() {
        assert!(!compare_op(Comparison::Lt, &Value::Null, &Value::I32(1)));
        assert!(!compare_op(Comparison::Gteq, &Value::I32(1), &Value::Null));
        assert!(compare_op(Comparison::Lteq, &Value::I32(1), &Value::F64(1.0)));
    }

    #[test]
    fn test_equals_across_numeric_families() {
        assert!(equals(&Value::I32(1), &Value::F64(1.0)));
        assert!(equals(&Value::Null, &Value::Null));
        assert!(!equals(&Value::Null, &Value::I32(0)));
    }

    #[test]
    fn test_contains_and_null_membership() {
        let list = Value::from(vec![1i64, 2, 3]);
        assert!(contains(&list, &Value::I32(2)));
        assert!(!contains(&list, &Value::Null));
        assert!(!contains(&Value::Null, &Value::I32(2)));
        assert!(contains(&Value::str("hello"), &Value::str("ell")));
    }

    #[test]
    fn test_cast_struct_fills_nullable_fields() {
        let ty = DataType::Struct(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("note", DataType::Utf8, true),
        ]);
        let rec = Value::Record(Record::from_pairs([("id", Value::str("42"))]));
        let out = cast(rec, &ty).expect("cast");
        let out = out.as_record().expect("record");
        assert_eq!(out.get("id"), Some(&Value::I32(42)));
        assert_eq!(out.get("note"), Some(&Value::Null));
    }

    #[test]
    fn test_numeric_cast_range_is_checked() {
        let max = Value::I64(i64::from(i32::MAX));
        assert_eq!(cast(max, &DataType::Int32).expect("fits"), Value::I32(i32::MAX));
        let min = Value::I64(i64::from(i32::MIN));
        assert_eq!(cast(min, &DataType::Int32).expect("fits"), Value::I32(i32::MIN));

        let over = cast(Value::I64(i64::from(i32::MAX) + 1), &DataType::Int32);
        assert!(matches!(over, Err(Error::Type(_))));
        assert!(cast(Value::I64(5_000_000_000), &DataType::Int32).is_err());
        assert!(cast(Value::F64(1e30), &DataType::Int64).is_err());
        assert!(cast(Value::F64(f64::NAN), &DataType::Int64).is_err());
        assert!(cast(Value::F64(1e300), &DataType::Float32).is_err());
        assert_eq!(cast(Value::F64(-2.7), &DataType::Int64).expect("truncates"), Value::I64(-2));
    }
}
