//! Task scheduling on the ambient tokio runtime.
//!
//! The scheduler never owns threads. It spawns onto whichever runtime is
//! current when a task is submitted and bounds scatter fan-out with a
//! per-call semaphore, so nested scatters cannot starve each other.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use plexus_core::error::{Error, Result};
use plexus_core::types::Value;
use plexus_operators::RowFunction;

use crate::metrics::emit_span;

/// Aborts every still-running task when dropped (deadline hit, caller gone).
struct AbortOnDrop(Vec<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Counts one task as active for as long as it is alive. Dropped on
/// completion, panic or abort alike.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct Scheduler {
    max_parallel: usize,
    active_tasks: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            active_tasks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Tasks currently running on behalf of this scheduler.
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    /// Spawn one task. A panic surfaces as an `Exec` error.
    pub fn spawn<F, T>(&self, fut: F) -> impl Future<Output = Result<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let active = ActiveGuard::enter(&self.active_tasks);
        let handle = tokio::spawn(async move {
            let _active = active;
            fut.await
        });
        async move {
            match handle.await {
                Ok(out) => out,
                Err(e) => Err(Error::Exec(format!("task failed: {}", e))),
            }
        }
    }

    /// Apply `function` to every item on its own task, at most
    /// `max_parallel` at a time. `output[i] == function(items[i])`.
    pub async fn scatter(
        &self,
        function: Arc<dyn RowFunction>,
        items: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let n = items.len();
        emit_span(
            "scatter",
            &[("items", n.to_string()), ("max_parallel", self.max_parallel.to_string())],
        );
        if n == 0 {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Result<Value>)>();
        let mut tasks = AbortOnDrop(Vec::with_capacity(n));

        for (i, item) in items.into_iter().enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Exec(format!("scatter semaphore closed: {}", e)))?;
            let function = function.clone();
            let tx = tx.clone();
            let active = ActiveGuard::enter(&self.active_tasks);

            tasks.0.push(tokio::spawn(async move {
                let _permit = permit; // held for the duration of the item
                let out = function.call(vec![item]).await;
                // Released before the send so a drained channel means idle.
                drop(active);
                tx.send((i, out)).ok();
            }));
        }
        drop(tx); // channel closes once every task is done

        let mut slots: Vec<Option<Value>> = vec![None; n];
        while let Some((i, out)) = rx.recv().await {
            match out {
                Ok(v) => slots[i] = Some(v),
                Err(e) => return Err(e.wrap(format!("scatter item {}", i))),
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| Error::Invariant(format!("scatter item {} produced no result", i)))
            })
            .collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(4)
    }
}
