//! Evaluation state: per-run program slots plus the locals and task context
//! of the expression being evaluated.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use plexus_core::error::{Error, Result};
use plexus_core::id::ValueId;
use plexus_core::types::Value;

use crate::context::TaskContext;

/// Persistent list of local bindings. Binding shares the tail, so frames
/// are cheap to extend and to hand to spawned tasks.
#[derive(Clone, Default)]
pub struct Locals(Option<Arc<Binding>>);

struct Binding {
    name: Arc<str>,
    value: Value,
    next: Locals,
}

impl Locals {
    pub fn bind(&self, name: Arc<str>, value: Value) -> Locals {
        Locals(Some(Arc::new(Binding {
            name,
            value,
            next: self.clone(),
        })))
    }

    /// Innermost binding wins.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let mut cur = self.0.as_deref();
        while let Some(b) = cur {
            if &*b.name == name {
                return Some(&b.value);
            }
            cur = b.next.0.as_deref();
        }
        None
    }

    /// Fresh list holding only `names` (those that are bound).
    pub fn capture(&self, names: &[Arc<str>]) -> Locals {
        names.iter().fold(Locals::default(), |acc, name| match self.get(name) {
            Some(v) => acc.bind(name.clone(), v.clone()),
            None => acc,
        })
    }

    pub fn len(&self) -> usize {
        let mut n = 0;
        let mut cur = self.0.as_deref();
        while let Some(b) = cur {
            n += 1;
            cur = b.next.0.as_deref();
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// Slot values of one invocation. Every slot is write-once.
pub struct ProgramState {
    slots: HashMap<ValueId, OnceLock<Value>>,
    pub max_stream_items: Option<usize>,
}

impl ProgramState {
    pub fn new(slots: impl IntoIterator<Item = ValueId>, max_stream_items: Option<usize>) -> Self {
        Self {
            slots: slots.into_iter().map(|id| (id, OnceLock::new())).collect(),
            max_stream_items,
        }
    }

    pub fn write(&self, id: ValueId, value: Value) -> Result<()> {
        let slot = self
            .slots
            .get(&id)
            .ok_or_else(|| Error::Invariant(format!("{} has no slot", id)))?;
        slot.set(value)
            .map_err(|_| Error::Invariant(format!("{} written twice", id)))
    }

    pub fn read(&self, id: ValueId) -> Result<Value> {
        self.slots
            .get(&id)
            .and_then(OnceLock::get)
            .cloned()
            .ok_or_else(|| Error::Invariant(format!("{} read before it was written", id)))
    }
}

#[derive(Clone)]
pub struct Frame {
    pub program: Arc<ProgramState>,
    pub context: TaskContext,
    pub locals: Locals,
}

impl Frame {
    pub fn new(program: Arc<ProgramState>, context: TaskContext) -> Self {
        Self {
            program,
            context,
            locals: Locals::default(),
        }
    }

    pub fn bind(&self, name: Arc<str>, value: Value) -> Frame {
        Frame {
            locals: self.locals.bind(name, value),
            ..self.clone()
        }
    }

    pub fn with_context(&self, context: TaskContext) -> Frame {
        Frame {
            context,
            ..self.clone()
        }
    }

    pub fn with_locals(&self, locals: Locals) -> Frame {
        Frame {
            locals,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locals_shadow_and_capture() {
        let x: Arc<str> = Arc::from("x");
        let y: Arc<str> = Arc::from("y");
        let outer = Locals::default()
            .bind(x.clone(), Value::I64(1))
            .bind(y.clone(), Value::I64(2));
        let inner = outer.bind(x.clone(), Value::I64(3));

        assert_eq!(inner.get("x"), Some(&Value::I64(3)));
        assert_eq!(outer.get("x"), Some(&Value::I64(1)));
        assert_eq!(inner.len(), 3);

        let captured = inner.capture(&[x, Arc::from("z")]);
        assert_eq!(captured.len(), 1);
        assert_eq!(captured.get("x"), Some(&Value::I64(3)));
        assert!(captured.get("y").is_none());
    }

    #[test]
    fn test_slots_are_write_once() {
        let id = ValueId::new(0);
        let state = ProgramState::new([id], None);
        assert!(state.read(id).is_err());
        state.write(id, Value::I64(7)).expect("first write");
        assert!(matches!(state.write(id, Value::I64(8)), Err(Error::Invariant(_))));
        assert_eq!(state.read(id).expect("read"), Value::I64(7));
        assert!(state.write(ValueId::new(9), Value::Null).is_err());
    }
}
