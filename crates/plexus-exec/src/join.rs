//! Join coordinator: gather named values from concurrent producers and run
//! a body exactly once, when every slot has been filled.
//!
//! A `JoinTask` owns one slot per name. Each producer gets a `JoinSender`
//! for the names it provides and delivers them all at once; the sender that
//! fills the last slot fires the body. Slots are write-once.

use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use tokio::sync::oneshot;

use plexus_core::error::{Error, Result};
use plexus_core::types::Value;

use crate::eval::{eval, settle};
use crate::frame::Frame;
use crate::ir::{Expr, JoinArm};
use crate::metrics::emit_span;

type Body = Box<dyn FnOnce(Vec<(Arc<str>, Value)>) + Send>;

pub struct JoinTask {
    names: Vec<Arc<str>>,
    state: Mutex<JoinState>,
}

struct JoinState {
    slots: Vec<Option<Value>>,
    remaining: usize,
    body: Option<Body>,
}

impl JoinTask {
    pub fn new(body: impl FnOnce(Vec<(Arc<str>, Value)>) + Send + 'static) -> Self {
        Self {
            names: Vec::new(),
            state: Mutex::new(JoinState {
                slots: Vec::new(),
                remaining: 0,
                body: Some(Box::new(body)),
            }),
        }
    }

    /// Declare a slot. Only valid before the task is shared.
    pub fn add_value(&mut self, name: impl Into<Arc<str>>) -> Result<usize> {
        let name = name.into();
        if self.names.contains(&name) {
            return Err(Error::Invariant(format!("join slot '{}' declared twice", name)));
        }
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        state.slots.push(None);
        state.remaining += 1;
        self.names.push(name);
        Ok(self.names.len() - 1)
    }

    /// Sender for the slots named `names`, in that order.
    pub fn create_runnable(self: &Arc<Self>, names: &[Arc<str>]) -> Result<JoinSender> {
        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            let idx = self
                .names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| Error::Invariant(format!("unknown join slot '{}'", name)))?;
            if indices.contains(&idx) {
                return Err(Error::Invariant(format!("join slot '{}' requested twice", name)));
            }
            indices.push(idx);
        }
        Ok(JoinSender {
            task: self.clone(),
            indices,
        })
    }

    pub fn remaining(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).remaining
    }

    pub fn has_fired(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.remaining == 0 && state.body.is_none()
    }
}

pub struct JoinSender {
    task: Arc<JoinTask>,
    indices: Vec<usize>,
}

impl JoinSender {
    /// Fill this sender's slots. Returns true if this call fired the body.
    ///
    /// Either every slot is written or none is; a slot that already holds a
    /// value makes the whole send fail.
    pub fn send(&self, values: Vec<Value>) -> Result<bool> {
        if values.len() != self.indices.len() {
            return Err(Error::Invariant(format!(
                "join sender expects {} values, got {}",
                self.indices.len(),
                values.len()
            )));
        }
        let fire = {
            let mut state = self.task.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(&idx) = self.indices.iter().find(|&&i| state.slots[i].is_some()) {
                return Err(Error::Invariant(format!(
                    "join slot '{}' written twice",
                    self.task.names[idx]
                )));
            }
            for (&idx, v) in self.indices.iter().zip(values) {
                state.slots[idx] = Some(v);
            }
            state.remaining -= self.indices.len();
            if state.remaining == 0 {
                state.body.take().map(|body| {
                    let bound: Vec<(Arc<str>, Value)> = self
                        .task
                        .names
                        .iter()
                        .cloned()
                        .zip(state.slots.iter_mut().map(|s| s.take().unwrap_or(Value::Null)))
                        .collect();
                    (body, bound)
                })
            } else {
                None
            }
        };
        match fire {
            Some((body, bound)) => {
                body(bound);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Values an arm provides: a single name takes the whole value, several
/// names destructure a record by field name.
fn destructure(names: &[Arc<str>], value: Value) -> Result<Vec<Value>> {
    if names.len() == 1 {
        return Ok(vec![value]);
    }
    match value {
        Value::Null => Ok(vec![Value::Null; names.len()]),
        v @ (Value::Record(_) | Value::Map(_)) => Ok(names
            .iter()
            .map(|n| v.property(n).cloned().unwrap_or(Value::Null))
            .collect()),
        other => Err(Error::Type(format!(
            "join input providing {} names must be a record, found {}",
            names.len(),
            other.type_name()
        ))),
    }
}

pub(crate) async fn eval_join(arms: &[JoinArm], body: &Expr, frame: &Frame) -> Result<Value> {
    if arms.iter().all(|a| a.names.is_empty()) {
        for arm in arms {
            settle(eval(&arm.expr, frame).await?, &frame.context).await?;
        }
        return eval(body, frame).await;
    }

    let (tx, rx) = oneshot::channel();
    let mut task = JoinTask::new(move |bound| {
        let _ = tx.send(bound);
    });
    for arm in arms {
        for name in &arm.names {
            task.add_value(name.clone())?;
        }
    }
    let task = Arc::new(task);

    let mut producers = Vec::with_capacity(arms.len());
    for arm in arms {
        let sender = task.create_runnable(&arm.names)?;
        let expr = arm.expr.clone();
        let names = arm.names.clone();
        let inner = frame.clone();
        producers.push(frame.context.scheduler().spawn(async move {
            let v = settle(eval(&expr, &inner).await?, &inner.context).await?;
            if names.is_empty() {
                return Ok(false);
            }
            sender.send(destructure(&names, v)?)
        }));
    }
    let fired = frame.context.run_timeout(try_join_all(producers)).await?;

    let bound = rx
        .await
        .map_err(|_| Error::Invariant("join completed without firing".into()))?;
    emit_span(
        "join_fired",
        &[
            ("slots", bound.len().to_string()),
            ("producers", fired.len().to_string()),
        ],
    );
    let inner = bound
        .into_iter()
        .fold(frame.clone(), |f, (name, v)| f.bind(name, v));
    eval(body, &inner).await
}
