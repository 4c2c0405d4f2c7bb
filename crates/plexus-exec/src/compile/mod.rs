//! Lowering from the plan vocabulary to typed IR.
//!
//! `Compiler` walks one operator tree at a time. Locals are tracked in a
//! `Scope` so an unbound LOCAL is a compile error rather than a run-time
//! surprise; slot types come from the program's value table and are refined
//! as evaluate steps are compiled.

mod expr;
mod stream;

pub(crate) use expr::anchored;

use std::collections::HashMap;
use std::sync::Arc;

use plexus_core::config::EngineConfig;
use plexus_core::id::ValueId;
use plexus_core::location::Location;
use plexus_core::schema::{is_assignable, DataType};
use plexus_plan::{ExprNode, Function, PhysicalProgram, Step};

use crate::context::CONTEXT_KIND;
use crate::error::CompileError;
use crate::functions::{FunctionRegistry, Invocable};
use crate::ir::{CompiledFn, Expr, Node, NodeKind};
use crate::program::{CompiledProgram, CompiledStep};
use crate::scheduler::Scheduler;

pub(crate) fn context_type() -> DataType {
    DataType::Opaque(CONTEXT_KIND.to_string())
}

/// Locals visible at a point of the tree, innermost last.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: Vec<(Arc<str>, DataType)>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<(&Arc<str>, &DataType)> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| &**n == name)
            .map(|(n, t)| (n, t))
    }

    pub fn with(&self, bindings: impl IntoIterator<Item = (Arc<str>, DataType)>) -> Scope {
        let mut vars = self.vars.clone();
        vars.extend(bindings);
        Scope { vars }
    }
}

pub struct Compiler<'a> {
    registry: &'a FunctionRegistry,
    slots: HashMap<ValueId, DataType>,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a FunctionRegistry) -> Self {
        Self {
            registry,
            slots: HashMap::new(),
        }
    }

    pub fn declare_slot(&mut self, id: ValueId, ty: DataType) {
        self.slots.insert(id, ty);
    }

    pub fn slot_type(&self, id: ValueId) -> Option<&DataType> {
        self.slots.get(&id)
    }

    /// Compile a top-level expression (no locals in scope).
    pub fn compile(&self, node: &ExprNode) -> Result<Expr, CompileError> {
        self.expr(node, &Scope::new())
    }

    fn invocable(
        &self,
        name: &str,
        argc: usize,
        loc: Location,
    ) -> Result<Arc<dyn Invocable>, CompileError> {
        let f = self
            .registry
            .get(name)
            .ok_or_else(|| CompileError::UnknownFunction {
                loc,
                name: name.to_string(),
            })?;
        if let Some(expected) = f.arity() {
            if expected != argc {
                return Err(CompileError::Arity {
                    loc,
                    op: name.to_string(),
                    expected,
                    found: argc,
                });
            }
        }
        Ok(f)
    }

    fn struct_type(&self, name: &str, loc: Location) -> Result<DataType, CompileError> {
        self.registry
            .struct_type(name)
            .cloned()
            .ok_or_else(|| CompileError::UnknownType {
                loc,
                name: name.to_string(),
            })
    }

    /// Compile `f` with its parameters typed as `params`.
    fn function(
        &self,
        f: &Function,
        params: &[DataType],
        scope: &Scope,
        op: &str,
        loc: Location,
    ) -> Result<Arc<CompiledFn>, CompileError> {
        if f.params.len() != params.len() {
            return Err(CompileError::Arity {
                loc,
                op: format!("{} function", op),
                expected: params.len(),
                found: f.params.len(),
            });
        }
        let names: Vec<Arc<str>> = f.params.iter().map(|p| Arc::from(p.as_str())).collect();
        let inner = scope.with(names.iter().cloned().zip(params.iter().cloned()));
        let body = self.expr(&f.body, &inner)?;
        Ok(Arc::new(CompiledFn {
            params: names,
            body,
        }))
    }
}

/// Compile a validated program into its executable form.
pub fn compile_program(
    program: &PhysicalProgram,
    registry: &FunctionRegistry,
    config: EngineConfig,
    scheduler: Arc<Scheduler>,
) -> Result<CompiledProgram, CompileError> {
    let mut compiler = Compiler::new(registry);
    for decl in &program.values {
        compiler.declare_slot(decl.id, decl.data_type.clone());
    }

    let mut steps = Vec::with_capacity(program.steps.len());
    let mut slots = Vec::new();

    for step in &program.steps {
        let compiled = match step {
            Step::RequiredArgument {
                value,
                name,
                data_type,
            } => {
                compiler.declare_slot(*value, data_type.clone());
                slots.push(*value);
                CompiledStep::Bind {
                    slot: *value,
                    name: name.clone(),
                    ty: data_type.clone(),
                    default: None,
                }
            }
            Step::OptionalArgument {
                value,
                name,
                data_type,
                default,
            } => {
                compiler.declare_slot(*value, data_type.clone());
                slots.push(*value);
                CompiledStep::Bind {
                    slot: *value,
                    name: name.clone(),
                    ty: data_type.clone(),
                    default: Some(default.clone()),
                }
            }
            Step::Evaluate {
                value,
                expr,
                context,
            }
            | Step::EvaluateGuarded {
                value,
                expr,
                context,
            } => {
                let mut compiled = compiler.compile(expr)?;
                if matches!(step, Step::EvaluateGuarded { .. }) {
                    let ty = compiled.ty.resolved();
                    let loc = compiled.loc;
                    compiled = Node::new(
                        NodeKind::Enforce {
                            captures: Vec::new(),
                            body: compiled,
                        },
                        ty,
                        loc,
                    );
                }
                check_context_slot(&compiler, *context, expr.loc)?;
                let slot = if compiled.ty == DataType::Void {
                    None
                } else {
                    let declared = compiler.slot_type(*value).cloned().unwrap_or(DataType::Any);
                    if declared == DataType::Any {
                        compiler.declare_slot(*value, compiled.ty.clone());
                    } else if !is_assignable(&declared, &compiled.ty) {
                        return Err(CompileError::TypeUnification {
                            loc: expr.loc,
                            op: "evaluate",
                            left: declared.to_string(),
                            right: compiled.ty.to_string(),
                        });
                    }
                    slots.push(*value);
                    Some(*value)
                };
                CompiledStep::Evaluate {
                    slot,
                    expr: compiled,
                    context: *context,
                }
            }
            Step::Execute { expr, context } => {
                check_context_slot(&compiler, *context, expr.loc)?;
                CompiledStep::Execute {
                    expr: compiler.compile(expr)?,
                    context: *context,
                }
            }
            Step::Output {
                name,
                data_type,
                expr,
                context,
            } => {
                check_context_slot(&compiler, *context, expr.loc)?;
                CompiledStep::Output {
                    name: name.clone(),
                    ty: data_type.clone(),
                    expr: compiler.compile(expr)?,
                    context: *context,
                }
            }
            Step::End => CompiledStep::End,
        };
        steps.push(compiled);
    }

    Ok(CompiledProgram::new(
        program.name.clone(),
        steps,
        program.arguments(),
        program.outputs(),
        slots,
        config,
        scheduler,
    ))
}

fn check_context_slot(
    compiler: &Compiler<'_>,
    context: Option<ValueId>,
    loc: Location,
) -> Result<(), CompileError> {
    let Some(id) = context else {
        return Ok(());
    };
    match compiler.slot_type(id) {
        None => Err(CompileError::UnknownValue { loc, value: id }),
        Some(ty) if ty.is_dynamic() || *ty == context_type() => Ok(()),
        Some(ty) => Err(CompileError::InvalidArgument {
            loc,
            op: "step context",
            reason: format!("{} is {}, not a context", id, ty),
        }),
    }
}
