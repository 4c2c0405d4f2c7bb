//! Physical program: the value arena plus the ordered step list.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use plexus_core::id::ValueId;
use plexus_core::schema::DataType;
use plexus_core::types::Value;

use crate::error::PlanError;
use crate::expr::ExprNode;

/// One registered intermediate value. `name` stays `None` until the value is
/// first referenced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDecl {
    pub id: ValueId,
    #[serde(default)]
    pub name: Option<String>,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    RequiredArgument {
        value: ValueId,
        name: String,
        data_type: DataType,
    },
    OptionalArgument {
        value: ValueId,
        name: String,
        data_type: DataType,
        default: Value,
    },
    /// Compute `expr` into the slot of `value`.
    Evaluate {
        value: ValueId,
        expr: ExprNode,
        #[serde(default)]
        context: Option<ValueId>,
    },
    /// Compute `expr` for its effect only.
    Execute {
        expr: ExprNode,
        #[serde(default)]
        context: Option<ValueId>,
    },
    /// Like `Evaluate`, but always under the context deadline.
    EvaluateGuarded {
        value: ValueId,
        expr: ExprNode,
        #[serde(default)]
        context: Option<ValueId>,
    },
    Output {
        name: String,
        data_type: DataType,
        expr: ExprNode,
        #[serde(default)]
        context: Option<ValueId>,
    },
    End,
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::RequiredArgument { .. } => "required_argument",
            Step::OptionalArgument { .. } => "optional_argument",
            Step::Evaluate { .. } => "evaluate",
            Step::Execute { .. } => "execute",
            Step::EvaluateGuarded { .. } => "evaluate_guarded",
            Step::Output { .. } => "output",
            Step::End => "end",
        }
    }

    /// The slot this step writes, if any.
    pub fn writes(&self) -> Option<ValueId> {
        match self {
            Step::RequiredArgument { value, .. }
            | Step::OptionalArgument { value, .. }
            | Step::Evaluate { value, .. }
            | Step::EvaluateGuarded { value, .. } => Some(*value),
            Step::Execute { .. } | Step::Output { .. } | Step::End => None,
        }
    }

    /// Every slot this step reads: VALUE references plus the context slot.
    pub fn reads(&self) -> Vec<ValueId> {
        let (expr, context) = match self {
            Step::Evaluate { expr, context, .. }
            | Step::Execute { expr, context }
            | Step::EvaluateGuarded { expr, context, .. }
            | Step::Output { expr, context, .. } => (expr, context),
            _ => return Vec::new(),
        };
        let mut out = expr.value_refs();
        if let Some(ctx) = context {
            if !out.contains(ctx) {
                out.push(*ctx);
            }
        }
        out
    }
}

/// Declared program argument, as exposed to callers before invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgumentDecl {
    pub name: String,
    pub data_type: DataType,
    /// `None` for required arguments.
    pub default: Option<Value>,
}

impl ArgumentDecl {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputDecl {
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalProgram {
    pub name: String,
    #[serde(default)]
    pub values: Vec<ValueDecl>,
    pub steps: Vec<Step>,
}

impl PhysicalProgram {
    pub fn value(&self, id: ValueId) -> Option<&ValueDecl> {
        self.values.iter().find(|v| v.id == id)
    }

    pub fn arguments(&self) -> Vec<ArgumentDecl> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::RequiredArgument {
                    name, data_type, ..
                } => Some(ArgumentDecl {
                    name: name.clone(),
                    data_type: data_type.clone(),
                    default: None,
                }),
                Step::OptionalArgument {
                    name,
                    data_type,
                    default,
                    ..
                } => Some(ArgumentDecl {
                    name: name.clone(),
                    data_type: data_type.clone(),
                    default: Some(default.clone()),
                }),
                _ => None,
            })
            .collect()
    }

    /// Declared outputs in step order, which is also reporting order.
    pub fn outputs(&self) -> Vec<OutputDecl> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::Output {
                    name, data_type, ..
                } => Some(OutputDecl {
                    name: name.clone(),
                    data_type: data_type.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Give every referenced but unnamed value its generated name.
    pub fn assign_names(&mut self) -> Result<(), PlanError> {
        let mut table = ValueTable::from_decls(std::mem::take(&mut self.values))?;
        let mut result = Ok(());
        for step in &self.steps {
            let refs = step.reads().into_iter().chain(step.writes());
            for id in refs {
                if let Err(e) = table.reference(id) {
                    result = Err(e);
                }
            }
        }
        self.values = table.into_decls();
        result
    }
}

/// Arena of intermediate values keyed by `ValueId`.
///
/// Ids are assigned in registration order. Names are unique; generated names
/// skip anything already taken.
#[derive(Debug, Default, Clone)]
pub struct ValueTable {
    decls: Vec<ValueDecl>,
    index: HashMap<ValueId, usize>,
    names: HashSet<String>,
    next_id: u64,
    next_name: u64,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_decls(decls: Vec<ValueDecl>) -> Result<Self, PlanError> {
        let mut table = ValueTable::new();
        for decl in decls {
            table.insert(decl)?;
        }
        Ok(table)
    }

    fn insert(&mut self, decl: ValueDecl) -> Result<(), PlanError> {
        if self.index.contains_key(&decl.id) {
            return Err(PlanError::DuplicateValue(decl.id));
        }
        if let Some(name) = &decl.name {
            if !self.names.insert(name.clone()) {
                return Err(PlanError::DuplicateName(name.clone()));
            }
        }
        self.next_id = self.next_id.max(decl.id.get() + 1);
        self.index.insert(decl.id, self.decls.len());
        self.decls.push(decl);
        Ok(())
    }

    /// Register a new, still unnamed value.
    pub fn register(&mut self, data_type: DataType) -> ValueId {
        let id = ValueId::new(self.next_id);
        self.next_id += 1;
        self.index.insert(id, self.decls.len());
        self.decls.push(ValueDecl {
            id,
            name: None,
            data_type,
        });
        id
    }

    pub fn register_named(
        &mut self,
        name: impl Into<String>,
        data_type: DataType,
    ) -> Result<ValueId, PlanError> {
        let name = name.into();
        if self.names.contains(&name) {
            return Err(PlanError::DuplicateName(name));
        }
        let id = self.register(data_type);
        self.names.insert(name.clone());
        if let Some(decl) = self.decls.last_mut() {
            decl.name = Some(name);
        }
        Ok(id)
    }

    pub fn get(&self, id: ValueId) -> Option<&ValueDecl> {
        self.index.get(&id).map(|&i| &self.decls[i])
    }

    /// Name of `id`, generating one on first reference.
    pub fn reference(&mut self, id: ValueId) -> Result<String, PlanError> {
        let i = *self.index.get(&id).ok_or(PlanError::UnknownValue(id))?;
        if let Some(name) = &self.decls[i].name {
            return Ok(name.clone());
        }
        let name = loop {
            let candidate = format!("local{}", self.next_name);
            self.next_name += 1;
            if !self.names.contains(&candidate) {
                break candidate;
            }
        };
        self.names.insert(name.clone());
        self.decls[i].name = Some(name.clone());
        Ok(name)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    pub fn into_decls(self) -> Vec<ValueDecl> {
        self.decls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_generated_on_first_reference() {
        let mut table = ValueTable::new();
        let a = table.register(DataType::Int64);
        let b = table.register_named("local0", DataType::Utf8).expect("named");
        assert_eq!(table.get(a).and_then(|d| d.name.clone()), None);

        // "local0" is taken, so the generator skips it.
        assert_eq!(table.reference(a).expect("ref"), "local1");
        assert_eq!(table.reference(a).expect("ref again"), "local1");
        assert_eq!(table.reference(b).expect("ref named"), "local0");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut table = ValueTable::new();
        table.register_named("x", DataType::Int64).expect("first");
        assert!(matches!(
            table.register_named("x", DataType::Int64),
            Err(PlanError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_unknown_reference() {
        let mut table = ValueTable::new();
        assert!(matches!(
            table.reference(ValueId::new(9)),
            Err(PlanError::UnknownValue(_))
        ));
    }
}
