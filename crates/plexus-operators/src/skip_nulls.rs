//! Drops null rows before they reach the wrapped stage.

use async_trait::async_trait;

use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::traits::{Flow, OpError, Stage};

pub struct SkipNulls {
    pub next: Box<dyn Stage>,
}

impl SkipNulls {
    pub fn wrap(next: Box<dyn Stage>) -> Box<dyn Stage> {
        Box::new(Self { next })
    }
}

#[async_trait]
impl Stage for SkipNulls {
    fn name(&self) -> &'static str {
        "skip_nulls"
    }

    async fn prepare(&mut self, item_type: &DataType) -> Result<(), OpError> {
        self.next.prepare(item_type).await
    }

    async fn item(&mut self, item: Value) -> Result<Flow, OpError> {
        if item.is_null() {
            return Ok(Flow::Continue);
        }
        self.next.item(item).await
    }

    async fn end(&mut self) -> Result<Value, OpError> {
        self.next.end().await
    }
}
