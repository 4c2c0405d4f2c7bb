//! Hash join.
//!
//! The right side is evaluated and indexed once in `prepare`; left rows look up
//! the index as they stream through. Null keys never match. The downstream
//! stage is wrapped in skip-nulls so an output function may drop a pair by
//! returning null.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::skip_nulls::SkipNulls;
use crate::traits::{apply, Flow, OpError, RowFunction, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    /// Unmatched left rows are emitted once, paired with a null right row.
    LeftOuter,
}

pub struct HashJoin {
    kind: JoinKind,
    right: Arc<dyn RowFunction>,
    left_key: Arc<dyn RowFunction>,
    right_key: Arc<dyn RowFunction>,
    output: Arc<dyn RowFunction>,
    index: HashMap<Value, Vec<Value>>,
    next: Box<dyn Stage>,
}

impl HashJoin {
    pub fn new(
        kind: JoinKind,
        right: Arc<dyn RowFunction>,
        left_key: Arc<dyn RowFunction>,
        right_key: Arc<dyn RowFunction>,
        output: Arc<dyn RowFunction>,
        next: Box<dyn Stage>,
    ) -> Self {
        Self {
            kind,
            right,
            left_key,
            right_key,
            output,
            index: HashMap::new(),
            next: SkipNulls::wrap(next),
        }
    }

    pub fn indexed_keys(&self) -> usize {
        self.index.len()
    }

    fn stage_name(&self) -> &'static str {
        match self.kind {
            JoinKind::Inner => "hash_join",
            JoinKind::LeftOuter => "outer_hash_join",
        }
    }
}

#[async_trait]
impl Stage for HashJoin {
    fn name(&self) -> &'static str {
        self.stage_name()
    }

    async fn prepare(&mut self, _item_type: &DataType) -> Result<(), OpError> {
        let name = self.stage_name();
        let rows = apply(&*self.right, name, Vec::new()).await?.into_items()?;
        self.index.clear();
        for row in rows {
            if row.is_null() {
                continue;
            }
            let key = apply(&*self.right_key, name, vec![row.clone()]).await?;
            if key.is_null() {
                continue;
            }
            self.index.entry(key).or_default().push(row);
        }
        self.next.prepare(&self.output.result_type()).await
    }

    async fn item(&mut self, left: Value) -> Result<Flow, OpError> {
        let name = self.stage_name();
        let key = apply(&*self.left_key, name, vec![left.clone()]).await?;
        let matches = if key.is_null() {
            None
        } else {
            self.index.get(&key)
        };
        match (matches, self.kind) {
            (Some(rows), _) => {
                for right in rows {
                    let row = apply(&*self.output, name, vec![left.clone(), right.clone()]).await?;
                    if self.next.item(row).await? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Ok(Flow::Continue)
            }
            (None, JoinKind::Inner) => Ok(Flow::Continue),
            (None, JoinKind::LeftOuter) => {
                let row = apply(&*self.output, name, vec![left, Value::Null]).await?;
                self.next.item(row).await
            }
        }
    }

    async fn end(&mut self) -> Result<Value, OpError> {
        self.next.end().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Accumulate;
    use crate::traits::RowFn;
    use plexus_core::types::Record;

    fn rec(pairs: &[(&str, Value)]) -> Value {
        Value::Record(Record::from_pairs(pairs.iter().cloned()))
    }

    fn join(kind: JoinKind) -> HashJoin {
        let right = RowFn::shared(DataType::list(DataType::Any), |_| {
            Ok(Value::List(vec![
                rec(&[("id", Value::I64(1)), ("tag", Value::str("a"))]),
                rec(&[("id", Value::I64(1)), ("tag", Value::str("b"))]),
                rec(&[("id", Value::I64(3)), ("tag", Value::str("c"))]),
            ]))
        });
        let key = || {
            RowFn::shared(DataType::Any, |args: Vec<Value>| {
                Ok(args[0].property("id").cloned().unwrap_or(Value::Null))
            })
        };
        let output = RowFn::shared(DataType::Any, |args: Vec<Value>| {
            let tag = args[1].property("tag").cloned().unwrap_or(Value::Null);
            Ok(rec(&[("left", args[0].property("id").cloned().unwrap_or(Value::Null)), ("tag", tag)]))
        });
        HashJoin::new(kind, right, key(), key(), output, Box::new(Accumulate::new()))
    }

    async fn run(mut stage: HashJoin, ids: &[i64]) -> Vec<Value> {
        stage.prepare(&DataType::Any).await.expect("prepare");
        assert_eq!(stage.indexed_keys(), 2);
        for &id in ids {
            stage.item(rec(&[("id", Value::I64(id))])).await.expect("item");
        }
        stage.end().await.expect("end").into_items().expect("list")
    }

    #[tokio::test]
    async fn test_inner_join_one_row_per_match() {
        let rows = run(join(JoinKind::Inner), &[1, 2, 3]).await;
        let tags: Vec<_> = rows.iter().map(|r| r.property("tag").cloned()).collect();
        assert_eq!(
            tags,
            vec![Some(Value::str("a")), Some(Value::str("b")), Some(Value::str("c"))]
        );
    }

    #[tokio::test]
    async fn test_outer_join_pads_unmatched_left_rows() {
        let rows = run(join(JoinKind::LeftOuter), &[1, 2, 3]).await;
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[2].property("left"), Some(&Value::I64(2)));
        assert_eq!(rows[2].property("tag"), Some(&Value::Null));
    }
}
