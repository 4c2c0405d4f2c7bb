//! Order-by: a materialization barrier that forwards rows in comparator order.

pub mod merge;

use std::sync::Arc;

use async_trait::async_trait;

use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::traits::{Flow, OpError, RowFunction, Stage};

pub use merge::sort_by;

pub struct OrderBy {
    pub comparator: Arc<dyn RowFunction>,
    item_type: DataType,
    items: Vec<Value>,
    pub next: Box<dyn Stage>,
}

impl OrderBy {
    pub fn new(comparator: Arc<dyn RowFunction>, next: Box<dyn Stage>) -> Self {
        Self {
            comparator,
            item_type: DataType::Any,
            items: Vec::new(),
            next,
        }
    }
}

#[async_trait]
impl Stage for OrderBy {
    fn name(&self) -> &'static str {
        "order_by"
    }

    async fn prepare(&mut self, item_type: &DataType) -> Result<(), OpError> {
        self.item_type = item_type.clone();
        self.items.clear();
        Ok(())
    }

    async fn item(&mut self, item: Value) -> Result<Flow, OpError> {
        self.items.push(item);
        Ok(Flow::Continue)
    }

    async fn end(&mut self) -> Result<Value, OpError> {
        let items = std::mem::take(&mut self.items);
        let sorted = sort_by(items, &*self.comparator).await?;
        self.next.prepare(&self.item_type).await?;
        for item in sorted {
            if self.next.item(item).await? == Flow::Stop {
                break;
            }
        }
        self.next.end().await
    }
}
