//! Terminal stages.

use std::sync::Arc;

use async_trait::async_trait;

use plexus_core::error::Error;
use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::traits::{Flow, OpError, Stage};

/// Materialize every item into a list.
#[derive(Debug, Default)]
pub struct Accumulate {
    items: Vec<Value>,
}

impl Accumulate {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Stage for Accumulate {
    fn name(&self) -> &'static str {
        "accumulate"
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
        Ok(Value::List(std::mem::take(&mut self.items)))
    }
}

/// External receiver of pushed rows.
pub trait StreamTarget: Send + Sync {
    fn receive(&self, item: Value) -> Result<(), Error>;
}

/// Push each item to a `StreamTarget` as it arrives. Produces no value.
pub struct StreamSink {
    target: Arc<dyn StreamTarget>,
    pushed: usize,
}

impl StreamSink {
    pub fn new(target: Arc<dyn StreamTarget>) -> Self {
        Self { target, pushed: 0 }
    }

    pub fn pushed(&self) -> usize {
        self.pushed
    }
}

#[async_trait]
impl Stage for StreamSink {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn prepare(&mut self, _item_type: &DataType) -> Result<(), OpError> {
        Ok(())
    }

    async fn item(&mut self, item: Value) -> Result<Flow, OpError> {
        self.target.receive(item)?;
        self.pushed += 1;
        Ok(Flow::Continue)
    }

    async fn end(&mut self) -> Result<Value, OpError> {
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Value>>);

    impl StreamTarget for Collect {
        fn receive(&self, item: Value) -> Result<(), Error> {
            self.0
                .lock()
                .map_err(|_| Error::Invariant("poisoned".into()))?
                .push(item);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stream_sink_pushes_in_order() {
        let target = Arc::new(Collect::default());
        let mut sink = StreamSink::new(target.clone());
        sink.prepare(&DataType::Int64).await.expect("prepare");
        for i in 0..3i64 {
            sink.item(Value::I64(i)).await.expect("item");
        }
        assert_eq!(sink.end().await.expect("end"), Value::Null);
        assert_eq!(sink.pushed(), 3);
        assert_eq!(
            *target.0.lock().expect("lock"),
            vec![Value::I64(0), Value::I64(1), Value::I64(2)]
        );
    }
}
