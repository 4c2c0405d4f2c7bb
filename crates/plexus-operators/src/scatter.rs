//! Scatter: accumulate, then map every item concurrently through the task
//! runtime. Output order is input order.

use std::sync::Arc;

use async_trait::async_trait;

use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::traits::{Flow, OpError, RowFunction, Stage, TaskRuntime};

pub struct Scatter {
    pub function: Arc<dyn RowFunction>,
    pub runtime: Arc<dyn TaskRuntime>,
    items: Vec<Value>,
    pub next: Box<dyn Stage>,
}

impl Scatter {
    pub fn new(
        function: Arc<dyn RowFunction>,
        runtime: Arc<dyn TaskRuntime>,
        next: Box<dyn Stage>,
    ) -> Self {
        Self {
            function,
            runtime,
            items: Vec::new(),
            next,
        }
    }
}

#[async_trait]
impl Stage for Scatter {
    fn name(&self) -> &'static str {
        "scatter"
    }

    async fn prepare(&mut self, _item_type: &DataType) -> Result<(), OpError> {
        self.items.clear();
        Ok(())
    }

    async fn item(&mut self, item: Value) -> Result<Flow, OpError> {
        self.items.push(item);
        Ok(Flow::Continue)
    }

    async fn end(&mut self) -> Result<Value, OpError> {
        let items = std::mem::take(&mut self.items);
        let results = self
            .runtime
            .scatter(self.function.clone(), items)
            .await
            .map_err(|e| OpError::Value(e.wrap("stage 'scatter'")))?;
        self.next.prepare(&self.function.result_type()).await?;
        for result in results {
            if self.next.item(result).await? == Flow::Stop {
                break;
            }
        }
        self.next.end().await
    }
}
