//! Per-row streaming stages: transform, flatten, resolve.

use std::sync::Arc;

use async_trait::async_trait;

use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::traits::{apply, Flow, OpError, RowFunction, Stage, TaskRuntime};

/// Apply `function` to each item and forward the result.
pub struct Transform {
    pub function: Arc<dyn RowFunction>,
    pub next: Box<dyn Stage>,
}

#[async_trait]
impl Stage for Transform {
    fn name(&self) -> &'static str {
        "transform"
    }

    async fn prepare(&mut self, _item_type: &DataType) -> Result<(), OpError> {
        self.next.prepare(&self.function.result_type()).await
    }

    async fn item(&mut self, item: Value) -> Result<Flow, OpError> {
        let out = apply(&*self.function, "transform", vec![item]).await?;
        self.next.item(out).await
    }

    async fn end(&mut self) -> Result<Value, OpError> {
        self.next.end().await
    }
}

/// Forward every element of every item. Null items contribute nothing.
pub struct Flatten {
    pub next: Box<dyn Stage>,
}

#[async_trait]
impl Stage for Flatten {
    fn name(&self) -> &'static str {
        "flatten"
    }

    async fn prepare(&mut self, item_type: &DataType) -> Result<(), OpError> {
        let element = item_type.element_type().ok_or_else(|| {
            OpError::Plan(format!("flatten expects a list item type, found {}", item_type))
        })?;
        self.next.prepare(&element).await
    }

    async fn item(&mut self, item: Value) -> Result<Flow, OpError> {
        for element in item.into_items()? {
            if self.next.item(element).await? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    async fn end(&mut self) -> Result<Value, OpError> {
        self.next.end().await
    }
}

/// Await asynchronous items before forwarding them; plain items pass through.
pub struct Resolve {
    pub runtime: Arc<dyn TaskRuntime>,
    pub next: Box<dyn Stage>,
}

#[async_trait]
impl Stage for Resolve {
    fn name(&self) -> &'static str {
        "resolve"
    }

    async fn prepare(&mut self, item_type: &DataType) -> Result<(), OpError> {
        self.next.prepare(&item_type.resolved()).await
    }

    async fn item(&mut self, item: Value) -> Result<Flow, OpError> {
        let item = match item {
            Value::Future(pending) => self.runtime.resolve(pending).await?,
            other => other,
        };
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
    use crate::traits::RowFn;
    use plexus_core::error::Error;

    #[tokio::test]
    async fn test_transform_then_flatten() {
        let dup = RowFn::shared(DataType::list(DataType::Int64), |args: Vec<Value>| {
            Ok(Value::List(vec![args[0].clone(), args[0].clone()]))
        });
        let mut stage = Transform {
            function: dup,
            next: Box::new(Flatten {
                next: Box::new(Accumulate::new()),
            }),
        };
        stage.prepare(&DataType::Int64).await.expect("prepare");
        stage.item(Value::I64(1)).await.expect("item");
        stage.item(Value::I64(2)).await.expect("item");
        let out = stage.end().await.expect("end");
        assert_eq!(
            out,
            Value::List(vec![1i64.into(), 1i64.into(), 2i64.into(), 2i64.into()])
        );
    }

    #[tokio::test]
    async fn test_flatten_rejects_scalar_item_type() {
        let mut stage = Flatten {
            next: Box::new(Accumulate::new()),
        };
        assert!(matches!(
            stage.prepare(&DataType::Utf8).await,
            Err(OpError::Plan(_))
        ));
    }

    #[tokio::test]
    async fn test_transform_error_names_stage() {
        let boom = RowFn::shared(DataType::Int64, |_| Err(Error::Exec("boom".into())));
        let mut stage = Transform {
            function: boom,
            next: Box::new(Accumulate::new()),
        };
        stage.prepare(&DataType::Int64).await.expect("prepare");
        let err = stage.item(Value::I64(1)).await.expect_err("item should fail").into_error();
        assert!(err.to_string().contains("stage 'transform'"));
        assert_eq!(err.root_cause(), &Error::Exec("boom".into()));
    }
}
