//! Task context: deadline, tracing span and worker pool of one computation.
//!
//! Contexts form a tree. Children never outlive their parent's deadline: a
//! derived deadline is always the minimum of the parent's and the requested
//! one. Contexts travel through compiled programs as opaque values.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use plexus_core::error::{Error, Result};
use plexus_core::types::{AsyncValue, Opaque, Value};
use plexus_operators::{RowFunction, TaskRuntime};

use crate::scheduler::Scheduler;

pub const CONTEXT_KIND: &str = "context";

/// Deadline used when the builder is not given one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct TaskContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    root: Option<TaskContext>,
    deadline: Instant,
    span: tracing::Span,
    scheduler: Arc<Scheduler>,
    dims: Vec<(String, String)>,
    ended: AtomicBool,
}

pub struct ContextBuilder {
    timeout: Duration,
    scheduler: Option<Arc<Scheduler>>,
    span: Option<tracing::Span>,
}

impl ContextBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Must be called inside a tokio runtime (the deadline uses its clock).
    pub fn build(self) -> TaskContext {
        TaskContext {
            inner: Arc::new(ContextInner {
                root: None,
                deadline: Instant::now() + self.timeout,
                span: self
                    .span
                    .unwrap_or_else(|| tracing::info_span!("context", root = true)),
                scheduler: self.scheduler.unwrap_or_default(),
                dims: Vec::new(),
                ended: AtomicBool::new(false),
            }),
        }
    }
}

impl TaskContext {
    pub fn builder() -> ContextBuilder {
        ContextBuilder {
            timeout: DEFAULT_TIMEOUT,
            scheduler: None,
            span: None,
        }
    }

    fn derive(&self, deadline: Instant, span: tracing::Span, dims: Vec<(String, String)>) -> Self {
        TaskContext {
            inner: Arc::new(ContextInner {
                root: Some(self.root()),
                deadline: deadline.min(self.inner.deadline),
                span,
                scheduler: self.inner.scheduler.clone(),
                dims,
                ended: AtomicBool::new(false),
            }),
        }
    }

    pub fn root(&self) -> TaskContext {
        match &self.inner.root {
            Some(root) => root.clone(),
            None => self.clone(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.inner.root.is_none()
    }

    /// Child context with its own tracing span carrying `dims`.
    pub fn start(&self, dims: Vec<(String, String)>) -> TaskContext {
        let span = tracing::info_span!(parent: &self.inner.span, "context", dims = ?dims);
        tracing::debug!(parent: &span, "context started");
        self.derive(self.inner.deadline, span, dims)
    }

    /// Child context whose deadline is at most `timeout` from now.
    pub fn timeout(&self, timeout: Duration) -> TaskContext {
        self.derive(
            Instant::now() + timeout,
            self.inner.span.clone(),
            self.inner.dims.clone(),
        )
    }

    /// Fail unless at least `min` remains; otherwise bound by `max`.
    pub fn timeout_guard(&self, min: Duration, max: Duration) -> Result<TaskContext> {
        let remaining = self.remaining();
        if remaining < min {
            return Err(Error::Timeout(format!(
                "{}ms remaining, {}ms required",
                remaining.as_millis(),
                min.as_millis()
            )));
        }
        Ok(self.timeout(max))
    }

    pub fn deadline(&self) -> Instant {
        self.inner.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.inner.deadline.saturating_duration_since(Instant::now())
    }

    pub fn dims(&self) -> &[(String, String)] {
        &self.inner.dims
    }

    pub fn span(&self) -> &tracing::Span {
        &self.inner.span
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.inner.scheduler
    }

    /// Close this context's span. Returns `false` if it was already ended.
    pub fn end(&self) -> bool {
        let first = !self.inner.ended.swap(true, Ordering::SeqCst);
        if first {
            tracing::debug!(parent: &self.inner.span, "context ended");
        }
        first
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst)
    }

    /// Await `fut`, failing with `Timeout` once the deadline passes.
    pub async fn run_timeout<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout_at(self.inner.deadline, fut).await {
            Ok(out) => out,
            Err(_) => {
                tracing::warn!(parent: &self.inner.span, "deadline exceeded");
                Err(Error::Timeout("context deadline exceeded".into()))
            }
        }
    }

    /// Run `fut` on its own task under this context's deadline.
    pub async fn enforce<F>(&self, fut: F) -> Result<Value>
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        let abort = handle.abort_handle();
        let out = self
            .run_timeout(async move {
                handle
                    .await
                    .map_err(|e| Error::Exec(format!("task failed: {}", e)))?
            })
            .await;
        if out.is_err() {
            abort.abort();
        }
        out
    }

    pub async fn resolve(&self, value: AsyncValue) -> Result<Value> {
        if let Some(done) = value.peek() {
            return done;
        }
        self.run_timeout(value.get()).await
    }

    pub async fn scatter(
        &self,
        function: Arc<dyn RowFunction>,
        items: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let scheduler = self.inner.scheduler.clone();
        self.run_timeout(scheduler.scatter(function, items)).await
    }

    pub fn into_value(self) -> Value {
        Value::Opaque(Opaque::new(CONTEXT_KIND, self))
    }

    pub fn from_value(value: &Value) -> Result<TaskContext> {
        match value {
            Value::Opaque(o) => o.downcast_ref::<TaskContext>().cloned().ok_or_else(|| {
                Error::Type(format!("expected a context, found handle '{}'", o.kind()))
            }),
            other => Err(Error::Type(format!(
                "expected a context, found {}",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("root", &self.is_root())
            .field("remaining", &self.remaining())
            .field("dims", &self.inner.dims)
            .field("ended", &self.is_ended())
            .finish()
    }
}

#[async_trait]
impl TaskRuntime for TaskContext {
    async fn resolve(&self, value: AsyncValue) -> Result<Value> {
        TaskContext::resolve(self, value).await
    }

    async fn scatter(
        &self,
        function: Arc<dyn RowFunction>,
        items: Vec<Value>,
    ) -> Result<Vec<Value>> {
        TaskContext::scatter(self, function, items).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_deadline_is_thirty_seconds() {
        let ctx = TaskContext::builder().build();
        let remaining = ctx.remaining();
        assert!(remaining <= DEFAULT_TIMEOUT);
        assert!(remaining > Duration::from_secs(29));
        assert!(ctx.is_root());
    }

    #[tokio::test]
    async fn test_child_deadline_never_extends_parent() {
        let ctx = TaskContext::builder()
            .timeout(Duration::from_millis(50))
            .build();
        let child = ctx.timeout(Duration::from_secs(60));
        assert!(child.deadline() <= ctx.deadline());
        assert!(!child.is_root());
        assert!(child.root().is_root());
    }

    #[tokio::test]
    async fn test_timeout_guard_rejects_short_budget() {
        let ctx = TaskContext::builder()
            .timeout(Duration::from_millis(20))
            .build();
        let err = ctx
            .timeout_guard(Duration::from_secs(1), Duration::from_secs(2))
            .expect_err("timeout_guard should fail");
        assert!(err.is_timeout());
        assert!(ctx
            .timeout_guard(Duration::ZERO, Duration::from_millis(5))
            .is_ok());
    }

    #[tokio::test]
    async fn test_resolve_times_out() {
        let ctx = TaskContext::builder()
            .timeout(Duration::from_millis(20))
            .build();
        let never = AsyncValue::new(futures::future::pending());
        let err = ctx.resolve(never).await.expect_err("resolve should fail");
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let ctx = TaskContext::builder().build().start(vec![("op".into(), "x".into())]);
        assert_eq!(ctx.dims().len(), 1);
        assert!(ctx.end());
        assert!(!ctx.end());
        assert!(ctx.is_ended());
    }

    #[tokio::test]
    async fn test_context_round_trips_through_value() {
        let ctx = TaskContext::builder().build();
        let v = ctx.clone().into_value();
        let back = TaskContext::from_value(&v).expect("context");
        assert_eq!(back.deadline(), ctx.deadline());
        assert!(TaskContext::from_value(&Value::I64(1)).is_err());
    }
}
