//! Runs compiled streams on the operator pipeline.
//!
//! Stage functions are bound to the frame that executes the stream, so
//! they see its locals, slots and context. A `StreamHandle` buffers items
//! pushed by STREAM_COMPLETE (or by a stream sink) and runs its pipeline
//! exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use plexus_core::error::{Error, Result};
use plexus_core::schema::DataType;
use plexus_core::types::{Opaque, Value};
use plexus_operators::filter::{Distinct, Filter};
use plexus_operators::group::GroupBy;
use plexus_operators::join::{Cross, HashJoin};
use plexus_operators::map::{Flatten, Resolve, Transform};
use plexus_operators::scatter::Scatter;
use plexus_operators::slice::Slice;
use plexus_operators::sort::OrderBy;
use plexus_operators::{
    Accumulate, Pipeline, RowFunction, Stage, StreamSink, StreamTarget, TaskRuntime,
};

use crate::context::TaskContext;
use crate::eval::eval;
use crate::frame::{Frame, Locals};
use crate::ir::{CompiledFn, CompiledSink, CompiledStage, CompiledStream};

pub const STREAM_KIND: &str = "stream";

/// A compiled function closed over the frame it runs in.
struct BoundFunction {
    function: Arc<CompiledFn>,
    frame: Frame,
}

#[async_trait]
impl RowFunction for BoundFunction {
    fn result_type(&self) -> DataType {
        self.function.body.ty.clone()
    }

    async fn call(&self, args: Vec<Value>) -> Result<Value> {
        if args.len() != self.function.params.len() {
            return Err(Error::Invariant(format!(
                "function takes {} arguments, got {}",
                self.function.params.len(),
                args.len()
            )));
        }
        let frame = self
            .function
            .params
            .iter()
            .cloned()
            .zip(args)
            .fold(self.frame.clone(), |f, (name, v)| f.bind(name, v));
        eval(&self.function.body, &frame).await
    }
}

fn bind(function: &Arc<CompiledFn>, frame: &Frame) -> Arc<dyn RowFunction> {
    Arc::new(BoundFunction {
        function: function.clone(),
        frame: frame.clone(),
    })
}

fn build_pipeline(stream: &CompiledStream, frame: &Frame, sink: Box<dyn Stage>) -> Box<dyn Stage> {
    let runtime: Arc<dyn TaskRuntime> = Arc::new(frame.context.clone());
    let mut next = sink;
    for stage in stream.stages.iter().rev() {
        next = match stage {
            CompiledStage::Transform(f) => Box::new(Transform {
                function: bind(f, frame),
                next,
            }),
            CompiledStage::Filter(f) => Box::new(Filter {
                predicate: bind(f, frame),
                next,
            }),
            CompiledStage::Distinct => Box::new(Distinct::new(next)),
            CompiledStage::Flatten => Box::new(Flatten { next }),
            CompiledStage::Resolve => Box::new(Resolve {
                runtime: runtime.clone(),
                next,
            }),
            CompiledStage::Slice { offset, limit } => Box::new(Slice::new(
                offset.as_ref().map(|f| bind(f, frame)),
                limit.as_ref().map(|f| bind(f, frame)),
                next,
            )),
            CompiledStage::OrderBy(cmp) => Box::new(OrderBy::new(bind(cmp, frame), next)),
            CompiledStage::GroupBy { key, output } => {
                Box::new(GroupBy::new(bind(key, frame), bind(output, frame), next))
            }
            CompiledStage::Cross { right, output } => Box::new(Cross {
                right: bind(right, frame),
                output: bind(output, frame),
                next,
            }),
            CompiledStage::HashJoin {
                kind,
                right,
                left_key,
                right_key,
                output,
            } => Box::new(HashJoin::new(
                *kind,
                bind(right, frame),
                bind(left_key, frame),
                bind(right_key, frame),
                bind(output, frame),
                next,
            )),
            CompiledStage::Scatter(f) => {
                Box::new(Scatter::new(bind(f, frame), runtime.clone(), next))
            }
        };
    }
    next
}

/// Run `stream` over `items` in `frame`.
pub async fn execute(stream: &CompiledStream, frame: &Frame, items: Vec<Value>) -> Result<Value> {
    let sink: Box<dyn Stage> = match &stream.sink {
        CompiledSink::Accumulate => Box::new(Accumulate::new()),
        CompiledSink::Stream(target) => {
            let handle = StreamHandle::from_value(&eval(target, frame).await?)?;
            Box::new(StreamSink::new(Arc::new(handle)))
        }
    };
    let head = build_pipeline(stream, frame, sink);
    Pipeline::new(head)
        .with_max_items(frame.program.max_stream_items)
        .run(&stream.input_type, items)
        .await
        .map_err(|e| e.into_error())
}

/// Accumulating stream created by STREAM_CREATE.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    stream: Arc<CompiledStream>,
    locals: Locals,
    context: TaskContext,
    buffer: Mutex<Vec<Value>>,
    completed: AtomicBool,
}

impl StreamHandle {
    /// The handle remembers the locals and context it was created under.
    pub fn new(stream: Arc<CompiledStream>, frame: &Frame) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                stream,
                locals: frame.locals.clone(),
                context: frame.context.clone(),
                buffer: Mutex::new(Vec::new()),
                completed: AtomicBool::new(false),
            }),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Opaque(Opaque::new(STREAM_KIND, self))
    }

    pub fn from_value(value: &Value) -> Result<StreamHandle> {
        match value {
            Value::Opaque(o) => o.downcast_ref::<StreamHandle>().cloned().ok_or_else(|| {
                Error::Type(format!("expected a stream, found handle '{}'", o.kind()))
            }),
            other => Err(Error::Type(format!(
                "expected a stream, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn buffered(&self) -> usize {
        self.inner
            .buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn extend(&self, items: Vec<Value>) -> Result<()> {
        if self.is_completed() {
            return Err(Error::Exec("stream already completed".into()));
        }
        self.inner
            .buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(items);
        Ok(())
    }

    /// Run the pipeline over everything buffered so far. A second call fails.
    pub async fn complete(&self, frame: &Frame) -> Result<Value> {
        if self.inner.completed.swap(true, Ordering::SeqCst) {
            return Err(Error::Exec("stream already completed".into()));
        }
        let items = std::mem::take(&mut *self.inner.buffer.lock().unwrap_or_else(|e| e.into_inner()));
        let owner = Frame {
            program: frame.program.clone(),
            context: self.inner.context.clone(),
            locals: self.inner.locals.clone(),
        };
        tracing::debug!(items = items.len(), "completing stream");
        execute(&self.inner.stream, &owner, items).await
    }
}

impl StreamTarget for StreamHandle {
    fn receive(&self, item: Value) -> Result<()> {
        self.extend(vec![item])
    }
}
