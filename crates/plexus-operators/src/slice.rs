//! Offset / limit / slice.
//!
//! The bounds are expressions evaluated once in `prepare`. Once the limit is
//! exhausted the stage returns `Flow::Stop` so upstream stops delivering.

use std::sync::Arc;

use async_trait::async_trait;

use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::traits::{apply, as_count, Flow, OpError, RowFunction, Stage};

pub struct Slice {
    offset_fn: Option<Arc<dyn RowFunction>>,
    limit_fn: Option<Arc<dyn RowFunction>>,
    to_skip: usize,
    remaining: Option<usize>,
    pub next: Box<dyn Stage>,
}

impl Slice {
    pub fn new(
        offset: Option<Arc<dyn RowFunction>>,
        limit: Option<Arc<dyn RowFunction>>,
        next: Box<dyn Stage>,
    ) -> Self {
        Self {
            offset_fn: offset,
            limit_fn: limit,
            to_skip: 0,
            remaining: None,
            next,
        }
    }

    pub fn offset(offset: Arc<dyn RowFunction>, next: Box<dyn Stage>) -> Self {
        Self::new(Some(offset), None, next)
    }

    pub fn limit(limit: Arc<dyn RowFunction>, next: Box<dyn Stage>) -> Self {
        Self::new(None, Some(limit), next)
    }
}

#[async_trait]
impl Stage for Slice {
    fn name(&self) -> &'static str {
        "slice"
    }

    async fn prepare(&mut self, item_type: &DataType) -> Result<(), OpError> {
        self.to_skip = match &self.offset_fn {
            Some(f) => as_count(&apply(&**f, "offset", Vec::new()).await?, "offset")?.unwrap_or(0),
            None => 0,
        };
        self.remaining = match &self.limit_fn {
            Some(f) => as_count(&apply(&**f, "limit", Vec::new()).await?, "limit")?,
            None => None,
        };
        self.next.prepare(item_type).await
    }

    async fn item(&mut self, item: Value) -> Result<Flow, OpError> {
        if self.to_skip > 0 {
            self.to_skip -= 1;
            return Ok(Flow::Continue);
        }
        match self.remaining {
            Some(0) => Ok(Flow::Stop),
            Some(n) => {
                self.remaining = Some(n - 1);
                let flow = self.next.item(item).await?;
                if n == 1 {
                    Ok(Flow::Stop)
                } else {
                    Ok(flow)
                }
            }
            None => self.next.item(item).await,
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

    fn count(n: i64) -> Arc<dyn RowFunction> {
        RowFn::shared(DataType::Int64, move |_| Ok(Value::I64(n)))
    }

    async fn run(mut stage: Slice, items: &[i64]) -> (Value, usize) {
        stage.prepare(&DataType::Int64).await.expect("prepare");
        let mut delivered = 0;
        for &v in items {
            delivered += 1;
            if stage.item(Value::I64(v)).await.expect("item") == Flow::Stop {
                break;
            }
        }
        (stage.end().await.expect("end"), delivered)
    }

    #[tokio::test]
    async fn test_slice_offset_one_limit_two() {
        let stage = Slice::new(Some(count(1)), Some(count(2)), Box::new(Accumulate::new()));
        let (out, delivered) = run(stage, &[10, 20, 30, 40]).await;
        assert_eq!(out, Value::List(vec![20i64.into(), 30i64.into()]));
        // Short-circuits: the fourth row is never delivered.
        assert_eq!(delivered, 3);
    }

    #[tokio::test]
    async fn test_zero_limit_stops_immediately() {
        let stage = Slice::limit(count(0), Box::new(Accumulate::new()));
        let (out, delivered) = run(stage, &[1, 2, 3]).await;
        assert_eq!(out, Value::List(vec![]));
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_offset_past_end() {
        let stage = Slice::offset(count(10), Box::new(Accumulate::new()));
        let (out, _) = run(stage, &[1, 2]).await;
        assert_eq!(out, Value::List(vec![]));
    }
}
