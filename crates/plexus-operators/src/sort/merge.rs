//! Bottom-up merge sort driven by an async comparator.
//!
//! Stable: equal items keep their input order. Performs O(n log n)
//! comparator calls and never recurses.

use std::cmp::Ordering;

use plexus_core::types::Value;

use crate::traits::{apply, OpError, RowFunction};

/// Interpret a comparator result: negative, zero or positive.
fn ordering_of(v: &Value) -> Result<Ordering, OpError> {
    if v.is_null() {
        return Ok(Ordering::Equal);
    }
    if let Some(i) = v.as_i64() {
        return Ok(i.cmp(&0));
    }
    match v.as_f64() {
        Some(f) => Ok(f.partial_cmp(&0.0).unwrap_or(Ordering::Equal)),
        None => Err(OpError::Exec(format!(
            "comparator must return a number, found {}",
            v.type_name()
        ))),
    }
}

async fn compare(cmp: &dyn RowFunction, a: &Value, b: &Value) -> Result<Ordering, OpError> {
    let out = apply(cmp, "order_by", vec![a.clone(), b.clone()]).await?;
    ordering_of(&out)
}

pub async fn sort_by(items: Vec<Value>, cmp: &dyn RowFunction) -> Result<Vec<Value>, OpError> {
    let n = items.len();
    if n < 2 {
        return Ok(items);
    }
    let mut src = items;
    let mut dst: Vec<Value> = Vec::with_capacity(n);
    let mut width = 1;
    while width < n {
        dst.clear();
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let hi = (start + 2 * width).min(n);
            let (mut i, mut j) = (start, mid);
            while i < mid && j < hi {
                // Take from the right run only when strictly smaller.
                if compare(cmp, &src[j], &src[i]).await? == Ordering::Less {
                    dst.push(src[j].clone());
                    j += 1;
                } else {
                    dst.push(src[i].clone());
                    i += 1;
                }
            }
            dst.extend_from_slice(&src[i..mid]);
            dst.extend_from_slice(&src[j..hi]);
            start = hi;
        }
        std::mem::swap(&mut src, &mut dst);
        width *= 2;
    }
    Ok(src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::RowFn;
    use plexus_core::ops;
    use plexus_core::schema::DataType;
    use plexus_core::types::Record;

    #[tokio::test]
    async fn test_sorts_numbers() {
        let cmp = RowFn::new(DataType::Int32, |args: Vec<Value>| {
            Ok(Value::I32(ops::compare(&args[0], &args[1]) as i32))
        });
        let items: Vec<Value> = [5i64, 3, 9, 1, 4, 1, 8].iter().map(|&v| v.into()).collect();
        let sorted = sort_by(items, &cmp).await.expect("sort");
        let expected: Vec<Value> = [1i64, 1, 3, 4, 5, 8, 9].iter().map(|&v| v.into()).collect();
        assert_eq!(sorted, expected);
    }

    #[tokio::test]
    async fn test_sort_is_stable() {
        let row = |k: i64, tag: &str| {
            Value::Record(Record::from_pairs([
                ("k", Value::I64(k)),
                ("tag", Value::str(tag)),
            ]))
        };
        let by_key = RowFn::new(DataType::Int32, |args: Vec<Value>| {
            let (a, b) = (args[0].property("k"), args[1].property("k"));
            Ok(match (a, b) {
                (Some(a), Some(b)) => Value::I32(ops::compare(a, b) as i32),
                _ => Value::Null,
            })
        });
        let items = vec![row(2, "a"), row(1, "b"), row(2, "c"), row(1, "d")];
        let sorted = sort_by(items, &by_key).await.expect("sort");
        let tags: Vec<_> = sorted
            .iter()
            .filter_map(|r| r.property("tag").and_then(|t| t.as_str().map(String::from)))
            .collect();
        assert_eq!(tags, vec!["b", "d", "a", "c"]);
    }
}
