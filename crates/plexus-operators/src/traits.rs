//! Stage trait + the seams through which stages reach compiled code.
//!
//! The exec crate compiles every per-row function of a stream plan into a
//! `RowFunction` and hands stages a `TaskRuntime` for the two operations that
//! need the ambient context: awaiting an async value under the deadline and
//! position-preserving parallel map.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use plexus_core::error::Error;
use plexus_core::schema::DataType;
use plexus_core::types::{AsyncValue, Value};

#[derive(Debug, Error)]
pub enum OpError {
    #[error("planning error: {0}")]
    Plan(String),

    #[error("execution error: {0}")]
    Exec(String),

    #[error(transparent)]
    Value(#[from] Error),
}

impl OpError {
    /// Lower into the runtime error carried by values and result handlers.
    pub fn into_error(self) -> Error {
        match self {
            OpError::Plan(msg) => Error::Exec(format!("planning error: {}", msg)),
            OpError::Exec(msg) => Error::Exec(msg),
            OpError::Value(e) => e,
        }
    }
}

/// Whether upstream should keep delivering items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Downstream needs no more items (an exhausted limit).
    Stop,
}

/// One stage of a stream pipeline.
///
/// Lifecycle: `prepare` once, `item` once per upstream row until it returns
/// `Flow::Stop` or rows run out, then `end` once. Streaming stages prepare
/// their downstream inside `prepare`; barrier stages prepare it in `end`,
/// once the rows they will emit are known.
#[async_trait]
pub trait Stage: Send {
    /// Human-readable stage name (stable).
    fn name(&self) -> &'static str;

    async fn prepare(&mut self, item_type: &DataType) -> Result<(), OpError>;

    async fn item(&mut self, item: Value) -> Result<Flow, OpError>;

    async fn end(&mut self) -> Result<Value, OpError>;
}

/// A compiled per-row function (transform body, predicate, key, comparator...).
#[async_trait]
pub trait RowFunction: Send + Sync {
    fn result_type(&self) -> DataType;

    async fn call(&self, args: Vec<Value>) -> Result<Value, Error>;
}

/// Runtime services a stage may need from the ambient task context.
#[async_trait]
pub trait TaskRuntime: Send + Sync {
    /// Await `value`, bounded by the context deadline.
    async fn resolve(&self, value: AsyncValue) -> Result<Value, Error>;

    /// Apply `function` to every item concurrently; results keep input order.
    async fn scatter(
        &self,
        function: Arc<dyn RowFunction>,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, Error>;
}

/// Call `f`, tagging a failure with the stage it happened in.
pub(crate) async fn apply(
    f: &dyn RowFunction,
    stage: &'static str,
    args: Vec<Value>,
) -> Result<Value, OpError> {
    f.call(args)
        .await
        .map_err(|e| OpError::Value(e.wrap(format!("stage '{}'", stage))))
}

/// `RowFunction` over a plain closure. Handy for builtins and tests.
pub struct RowFn<F> {
    result_type: DataType,
    f: F,
}

impl<F> RowFn<F>
where
    F: Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
{
    pub fn new(result_type: DataType, f: F) -> Self {
        Self { result_type, f }
    }

    pub fn shared(result_type: DataType, f: F) -> Arc<dyn RowFunction> {
        Arc::new(Self::new(result_type, f))
    }
}

impl<F> fmt::Debug for RowFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowFn(-> {})", self.result_type)
    }
}

#[async_trait]
impl<F> RowFunction for RowFn<F>
where
    F: Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
{
    fn result_type(&self) -> DataType {
        self.result_type.clone()
    }

    async fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        (self.f)(args)
    }
}

/// Read a row count produced by an offset/limit expression.
/// Null means "unbounded"; negatives clamp to zero.
pub(crate) fn as_count(v: &Value, what: &str) -> Result<Option<usize>, OpError> {
    match v {
        Value::Null => Ok(None),
        other => match other.as_i64() {
            Some(n) => Ok(Some(n.max(0) as usize)),
            None => Err(OpError::Plan(format!(
                "{} must be an integer, found {}",
                what,
                other.type_name()
            ))),
        },
    }
}
