//! Drives a compiled stage chain over a finite input.

use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::skip_nulls::SkipNulls;
use crate::traits::{Flow, OpError, Stage};

pub struct Pipeline {
    head: Box<dyn Stage>,
    max_items: Option<usize>,
}

impl Pipeline {
    /// Null input rows are dropped before they reach `head`.
    pub fn new(head: Box<dyn Stage>) -> Self {
        Self {
            head: SkipNulls::wrap(head),
            max_items: None,
        }
    }

    /// Fail the run if more than `max` rows are offered.
    pub fn with_max_items(mut self, max: Option<usize>) -> Self {
        self.max_items = max;
        self
    }

    /// prepare -> item* -> end. Delivery stops early when a stage reports
    /// `Flow::Stop`.
    pub async fn run(
        mut self,
        item_type: &DataType,
        items: Vec<Value>,
    ) -> Result<Value, OpError> {
        self.head.prepare(item_type).await?;
        for (n, item) in items.into_iter().enumerate() {
            if let Some(max) = self.max_items {
                if n >= max {
                    return Err(OpError::Exec(format!(
                        "stream exceeded the limit of {} items",
                        max
                    )));
                }
            }
            if self.head.item(item).await? == Flow::Stop {
                break;
            }
        }
        self.head.end().await
    }
}
