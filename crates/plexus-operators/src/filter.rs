//! Row-dropping streaming stages: filter and distinct.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use plexus_core::ops::truthy;
use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::traits::{apply, Flow, OpError, RowFunction, Stage};

/// Forward items the predicate does not reject. A null verdict rejects.
pub struct Filter {
    pub predicate: Arc<dyn RowFunction>,
    pub next: Box<dyn Stage>,
}

#[async_trait]
impl Stage for Filter {
    fn name(&self) -> &'static str {
        "filter"
    }

    async fn prepare(&mut self, item_type: &DataType) -> Result<(), OpError> {
        self.next.prepare(item_type).await
    }

    async fn item(&mut self, item: Value) -> Result<Flow, OpError> {
        let verdict = apply(&*self.predicate, "filter", vec![item.clone()]).await?;
        if !truthy(&verdict) {
            return Ok(Flow::Continue);
        }
        self.next.item(item).await
    }

    async fn end(&mut self) -> Result<Value, OpError> {
        self.next.end().await
    }
}

/// Forward first occurrences only.
pub struct Distinct {
    seen: HashSet<Value>,
    pub next: Box<dyn Stage>,
}

impl Distinct {
    pub fn new(next: Box<dyn Stage>) -> Self {
        Self {
            seen: HashSet::new(),
            next,
        }
    }
}

#[async_trait]
impl Stage for Distinct {
    fn name(&self) -> &'static str {
        "distinct"
    }

    async fn prepare(&mut self, item_type: &DataType) -> Result<(), OpError> {
        self.seen.clear();
        self.next.prepare(item_type).await
    }

    async fn item(&mut self, item: Value) -> Result<Flow, OpError> {
        if self.seen.contains(&item) {
            return Ok(Flow::Continue);
        }
        self.seen.insert(item.clone());
        self.next.item(item).await
    }

    async fn end(&mut self) -> Result<Value, OpError> {
        self.next.end().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Accumulate;

    #[tokio::test]
    async fn test_distinct_keeps_first_occurrence_order() {
        let mut stage = Distinct::new(Box::new(Accumulate::new()));
        stage.prepare(&DataType::Int64).await.expect("prepare");
        for v in [3i64, 1, 3, 2, 1] {
            stage.item(Value::I64(v)).await.expect("item");
        }
        let out = stage.end().await.expect("end");
        assert_eq!(out, Value::List(vec![3i64.into(), 1i64.into(), 2i64.into()]));
    }
}
