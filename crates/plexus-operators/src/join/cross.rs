//! Cross join: for each left row, pair it with every element of a right-hand
//! collection computed from that row, forwarding every row the output
//! function yields for each pair.

use std::sync::Arc;

use async_trait::async_trait;

use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::traits::{apply, Flow, OpError, RowFunction, Stage};

pub struct Cross {
    pub right: Arc<dyn RowFunction>,
    pub output: Arc<dyn RowFunction>,
    pub next: Box<dyn Stage>,
}

#[async_trait]
impl Stage for Cross {
    fn name(&self) -> &'static str {
        "cross"
    }

    async fn prepare(&mut self, _item_type: &DataType) -> Result<(), OpError> {
        let out = self.output.result_type();
        let row_type = out.element_type().ok_or_else(|| {
            OpError::Plan(format!("cross output must yield a list of rows, found {}", out))
        })?;
        self.next.prepare(&row_type).await
    }

    async fn item(&mut self, left: Value) -> Result<Flow, OpError> {
        let rights = apply(&*self.right, "cross", vec![left.clone()])
            .await?
            .into_items()?;
        for right in rights {
            let rows = apply(&*self.output, "cross", vec![left.clone(), right])
                .await?
                .into_items()?;
            for row in rows {
                if self.next.item(row).await? == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn end(&mut self) -> Result<Value, OpError> {
        self.next.end().await
    }
}
