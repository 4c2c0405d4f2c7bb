//! Group-by: a materialization barrier keyed by first-seen key order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::traits::{apply, Flow, OpError, RowFunction, Stage};

/// Rows grouped under their key; groups keep the order their key first
/// appeared in.
#[derive(Debug, Default)]
pub struct KeyedGroups {
    index: HashMap<Value, usize>,
    groups: Vec<(Value, Vec<Value>)>,
}

impl KeyedGroups {
    pub fn push(&mut self, key: Value, row: Value) {
        match self.index.get(&key) {
            Some(&i) => self.groups[i].1.push(row),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push((key, vec![row]));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn into_groups(self) -> Vec<(Value, Vec<Value>)> {
        self.groups
    }
}

/// `key(row)` picks the group; `output(key, rows)` produces one row per group.
pub struct GroupBy {
    pub key: Arc<dyn RowFunction>,
    pub output: Arc<dyn RowFunction>,
    groups: KeyedGroups,
    pub next: Box<dyn Stage>,
}

impl GroupBy {
    pub fn new(
        key: Arc<dyn RowFunction>,
        output: Arc<dyn RowFunction>,
        next: Box<dyn Stage>,
    ) -> Self {
        Self {
            key,
            output,
            groups: KeyedGroups::default(),
            next,
        }
    }
}

#[async_trait]
impl Stage for GroupBy {
    fn name(&self) -> &'static str {
        "group_by"
    }

    async fn prepare(&mut self, _item_type: &DataType) -> Result<(), OpError> {
        self.groups = KeyedGroups::default();
        Ok(())
    }

    async fn item(&mut self, item: Value) -> Result<Flow, OpError> {
        let key = apply(&*self.key, "group_by", vec![item.clone()]).await?;
        self.groups.push(key, item);
        Ok(Flow::Continue)
    }

    async fn end(&mut self) -> Result<Value, OpError> {
        let groups = std::mem::take(&mut self.groups).into_groups();
        self.next.prepare(&self.output.result_type()).await?;
        for (key, rows) in groups {
            let row = apply(&*self.output, "group_by", vec![key, Value::List(rows)]).await?;
            if self.next.item(row).await? == Flow::Stop {
                break;
            }
        }
        self.next.end().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Accumulate;
    use crate::traits::RowFn;
    use plexus_core::types::Record;

    #[tokio::test]
    async fn test_group_by_parity_counts() {
        let key = RowFn::shared(DataType::Int64, |args: Vec<Value>| {
            Ok(Value::I64(args[0].as_i64().unwrap_or(0) % 2))
        });
        let output = RowFn::shared(DataType::Any, |args: Vec<Value>| {
            let n = args[1].as_list().map(|l| l.len()).unwrap_or(0) as i64;
            Ok(Value::Record(Record::from_pairs([
                ("key", args[0].clone()),
                ("count", Value::I64(n)),
            ])))
        });
        let mut stage = GroupBy::new(key, output, Box::new(Accumulate::new()));
        stage.prepare(&DataType::Int64).await.expect("prepare");
        for v in [3i64, 4, 5, 7, 8] {
            stage.item(Value::I64(v)).await.expect("item");
        }
        let out = stage.end().await.expect("end");
        let rows = out.as_list().expect("list").to_vec();
        assert_eq!(rows.len(), 2);
        // Odd keys were seen first.
        assert_eq!(rows[0].property("key"), Some(&Value::I64(1)));
        assert_eq!(rows[0].property("count"), Some(&Value::I64(3)));
        assert_eq!(rows[1].property("count"), Some(&Value::I64(2)));
    }
}
