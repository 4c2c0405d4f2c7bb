//! Expression operators -> IR nodes, with static typing.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;

use plexus_core::location::Location;
use plexus_core::ops::cast;
use plexus_core::schema::{unify, unify_all, unify_comparable, unify_numeric, DataType, Field};
use plexus_core::types::Value;
use plexus_plan::{ExprNode, ExprOp, ProjectOp};

use super::{context_type, Compiler, Scope};
use crate::error::CompileError;
use crate::ir::{Expr, JoinArm, Node, NodeKind, Pattern, ProjectStep};
use crate::stream::STREAM_KIND;

/// Anchored form of a MATCHES pattern: the whole string must match.
pub(crate) fn anchored(pattern: &str) -> String {
    format!("^(?:{})$", pattern)
}

fn stream_type() -> DataType {
    DataType::Opaque(STREAM_KIND.to_string())
}

impl<'a> Compiler<'a> {
    fn exprs(&self, nodes: &[ExprNode], scope: &Scope) -> Result<Vec<Expr>, CompileError> {
        nodes.iter().map(|n| self.expr(n, scope)).collect()
    }

    fn comparable(
        &self,
        op: &'static str,
        left: &Expr,
        right: &Expr,
        loc: Location,
    ) -> Result<DataType, CompileError> {
        unify_comparable(&left.ty, &right.ty).ok_or_else(|| CompileError::TypeUnification {
            loc,
            op,
            left: left.ty.to_string(),
            right: right.ty.to_string(),
        })
    }

    fn expect_context(&self, op: &'static str, e: &Expr) -> Result<(), CompileError> {
        if e.ty.is_dynamic() || e.ty == context_type() {
            Ok(())
        } else {
            Err(CompileError::InvalidArgument {
                loc: e.loc,
                op,
                reason: format!("expected a context, found {}", e.ty),
            })
        }
    }

    fn expect_integer(&self, op: &'static str, e: &Expr) -> Result<(), CompileError> {
        if e.ty.is_dynamic() || matches!(e.ty, DataType::Int32 | DataType::Int64) {
            Ok(())
        } else {
            Err(CompileError::InvalidArgument {
                loc: e.loc,
                op,
                reason: format!("expected an integer, found {}", e.ty),
            })
        }
    }

    fn element(&self, op: &'static str, e: &Expr) -> Result<DataType, CompileError> {
        e.ty.resolved()
            .element_type()
            .ok_or_else(|| CompileError::InvalidArgument {
                loc: e.loc,
                op,
                reason: format!("expected a list, found {}", e.ty),
            })
    }

    fn same_len(
        &self,
        op: &str,
        names: &[String],
        values: &[ExprNode],
        loc: Location,
    ) -> Result<(), CompileError> {
        if names.len() != values.len() {
            return Err(CompileError::Arity {
                loc,
                op: op.to_string(),
                expected: names.len(),
                found: values.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn expr(&self, node: &ExprNode, scope: &Scope) -> Result<Expr, CompileError> {
        let loc = node.loc;
        let (kind, ty) = match &node.op {
            ExprOp::Invoke { function, args } => {
                let f = self.invocable(function, args.len(), loc)?;
                let ret = f.return_type();
                let ty = if f.is_async() {
                    DataType::future(ret)
                } else {
                    ret
                };
                let args = self.exprs(args, scope)?;
                (NodeKind::Invoke { function: f, args }, ty)
            }
            ExprOp::AsyncInvoke { function, args } => {
                let f = self.invocable(function, args.len(), loc)?;
                let ret = f.return_type();
                let inner_ty = if f.is_async() {
                    DataType::future(ret.clone())
                } else {
                    ret.clone()
                };
                let args = self.exprs(args, scope)?;
                let inner = Node::new(NodeKind::Invoke { function: f, args }, inner_ty, loc);
                (NodeKind::Resolve(inner), ret.resolved())
            }
            ExprOp::Call {
                function,
                result,
                args,
            } => {
                let f = self.invocable(function, args.len(), loc)?;
                let args = self.exprs(args, scope)?;
                (NodeKind::Call { function: f, args }, result.clone())
            }
            ExprOp::New { type_name, args } => {
                let ty = self.struct_type(type_name, loc)?;
                let fields = match &ty {
                    DataType::Struct(fields) => fields.len(),
                    other => {
                        return Err(CompileError::UnsupportedOperator {
                            loc,
                            op: "new",
                            reason: format!("'{}' is {}, not a record type", type_name, other),
                        })
                    }
                };
                if fields != args.len() {
                    return Err(CompileError::Arity {
                        loc,
                        op: format!("new {}", type_name),
                        expected: fields,
                        found: args.len(),
                    });
                }
                (
                    NodeKind::New {
                        args: self.exprs(args, scope)?,
                    },
                    ty,
                )
            }

            ExprOp::Constant { value, data_type } => match data_type {
                Some(ty) => {
                    let v = cast(value.clone(), ty).map_err(|e| CompileError::InvalidArgument {
                        loc,
                        op: "constant",
                        reason: e.to_string(),
                    })?;
                    (NodeKind::Const(v), ty.clone())
                }
                None => (NodeKind::Const(value.clone()), value.data_type()),
            },
            ExprOp::Null { data_type } => (NodeKind::Const(Value::Null), data_type.clone()),
            ExprOp::Local { name } => {
                let (name, ty) = scope.lookup(name).ok_or_else(|| CompileError::UnknownLocal {
                    loc,
                    name: name.clone(),
                })?;
                (NodeKind::Local(name.clone()), ty.clone())
            }
            ExprOp::Value { value } => {
                let ty = self
                    .slot_type(*value)
                    .cloned()
                    .ok_or(CompileError::UnknownValue { loc, value: *value })?;
                (NodeKind::Slot(*value), ty)
            }

            ExprOp::If { .. } => {
                let mut branches = Vec::new();
                let mut cur = node;
                while let ExprOp::If {
                    test,
                    then,
                    otherwise,
                } = &cur.op
                {
                    branches.push((self.expr(test, scope)?, self.expr(then, scope)?));
                    cur = &**otherwise;
                }
                let otherwise = self.expr(cur, scope)?;
                let ty = unify_all(
                    branches
                        .iter()
                        .map(|(_, then)| &then.ty)
                        .chain(std::iter::once(&otherwise.ty)),
                );
                (NodeKind::Case { branches, otherwise }, ty)
            }
            ExprOp::Coalesce { exprs } => {
                let exprs = self.exprs(exprs, scope)?;
                let ty = unify_all(exprs.iter().map(|e| &e.ty));
                (NodeKind::Coalesce(exprs), ty)
            }
            ExprOp::Catch { primary, fallback } => {
                let primary = self.expr(primary, scope)?;
                let fallback = self.expr(fallback, scope)?;
                let ty = unify(&primary.ty, &fallback.ty);
                (NodeKind::Catch { primary, fallback }, ty)
            }

            ExprOp::And { exprs } => (NodeKind::And(self.exprs(exprs, scope)?), DataType::Boolean),
            ExprOp::Or { exprs } => (NodeKind::Or(self.exprs(exprs, scope)?), DataType::Boolean),
            ExprOp::Not { expr } => (NodeKind::Not(self.expr(expr, scope)?), DataType::Boolean),
            ExprOp::Bool { expr } => (NodeKind::Bool(self.expr(expr, scope)?), DataType::Boolean),
            ExprOp::IsNull { expr } => (NodeKind::IsNull(self.expr(expr, scope)?), DataType::Boolean),

            ExprOp::Eq { left, right } | ExprOp::Neq { left, right } => {
                let (l, r) = (self.expr(left, scope)?, self.expr(right, scope)?);
                let op = node.kind();
                self.comparable(op, &l, &r, loc)?;
                let kind = if matches!(node.op, ExprOp::Eq { .. }) {
                    NodeKind::Eq(l, r)
                } else {
                    NodeKind::Neq(l, r)
                };
                (kind, DataType::Boolean)
            }
            ExprOp::BooleanCompare {
                comparison,
                left,
                right,
            } => {
                let (l, r) = (self.expr(left, scope)?, self.expr(right, scope)?);
                self.comparable("boolean_compare", &l, &r, loc)?;
                (NodeKind::BoolCompare(*comparison, l, r), DataType::Boolean)
            }
            ExprOp::Compare { left, right } => {
                let (l, r) = (self.expr(left, scope)?, self.expr(right, scope)?);
                self.comparable("compare", &l, &r, loc)?;
                (NodeKind::Compare(l, r), DataType::Int32)
            }
            ExprOp::MultiCompare { exprs } => {
                let exprs = self.exprs(exprs, scope)?;
                for e in &exprs {
                    self.expect_integer("multi_compare", e)?;
                }
                (NodeKind::MultiCompare(exprs), DataType::Int32)
            }
            ExprOp::In { value, collection } | ExprOp::Contains { collection, value } => {
                let value = self.expr(value, scope)?;
                let collection = self.expr(collection, scope)?;
                (NodeKind::In { value, collection }, DataType::Boolean)
            }
            ExprOp::Matches { value, pattern } => {
                let value = self.expr(value, scope)?;
                let pattern = match &pattern.op {
                    ExprOp::Constant {
                        value: Value::Str(p),
                        ..
                    } => Pattern::Fixed(Regex::new(&anchored(p)).map_err(|e| {
                        CompileError::InvalidArgument {
                            loc: pattern.loc,
                            op: "matches",
                            reason: e.to_string(),
                        }
                    })?),
                    _ => Pattern::Dynamic(self.expr(pattern, scope)?),
                };
                (NodeKind::Matches { value, pattern }, DataType::Boolean)
            }

            ExprOp::BinaryMath {
                operation,
                left,
                right,
            } => {
                let (l, r) = (self.expr(left, scope)?, self.expr(right, scope)?);
                let ty = unify_numeric(&l.ty, &r.ty).ok_or_else(|| {
                    CompileError::TypeUnification {
                        loc,
                        op: "binary_math",
                        left: l.ty.to_string(),
                        right: r.ty.to_string(),
                    }
                })?;
                (NodeKind::Math(*operation, l, r), ty)
            }
            ExprOp::Negate { expr } => {
                let e = self.expr(expr, scope)?;
                if !(e.ty.is_dynamic() || e.ty.is_numeric()) {
                    return Err(CompileError::InvalidArgument {
                        loc,
                        op: "negate",
                        reason: format!("expected a number, found {}", e.ty),
                    });
                }
                let ty = e.ty.clone();
                (NodeKind::Negate(e), ty)
            }

            ExprOp::Record { names, values } => {
                self.same_len("record", names, values, loc)?;
                let values = self.exprs(values, scope)?;
                let fields = names
                    .iter()
                    .zip(&values)
                    .map(|(n, v)| Field::new(n, v.ty.clone(), true))
                    .collect();
                (
                    NodeKind::Record {
                        names: names.clone(),
                        values,
                        checked: false,
                    },
                    DataType::Struct(fields),
                )
            }
            ExprOp::RecordAs {
                type_name,
                names,
                values,
            } => {
                self.same_len("record_as", names, values, loc)?;
                let ty = self.struct_type(type_name, loc)?;
                (
                    NodeKind::Record {
                        names: names.clone(),
                        values: self.exprs(values, scope)?,
                        checked: true,
                    },
                    ty,
                )
            }
            ExprOp::Project { operations, map } => {
                let mut steps = Vec::with_capacity(operations.len());
                // None once a merge of unknown shape makes the result dynamic
                let mut fields: Option<Vec<Field>> = Some(Vec::new());
                for op in operations {
                    match op {
                        ProjectOp::Field { name, expr } => {
                            let e = self.expr(expr, scope)?;
                            if let Some(fields) = fields.as_mut() {
                                set_field(fields, Field::new(name, e.ty.clone(), true));
                            }
                            steps.push(ProjectStep::Field(name.clone(), e));
                        }
                        ProjectOp::Merge { expr } => {
                            let e = self.expr(expr, scope)?;
                            match &e.ty {
                                DataType::Struct(merged) => {
                                    if let Some(fields) = fields.as_mut() {
                                        for f in merged {
                                            set_field(fields, f.clone());
                                        }
                                    }
                                }
                                DataType::Map(_) => fields = None,
                                t if t.is_dynamic() => fields = None,
                                other => {
                                    return Err(CompileError::InvalidArgument {
                                        loc: e.loc,
                                        op: "project",
                                        reason: format!("cannot merge {}", other),
                                    })
                                }
                            }
                            steps.push(ProjectStep::Merge(e));
                        }
                    }
                }
                let ty = match (map, fields) {
                    (true, Some(fields)) => DataType::Map(Box::new(unify_all(
                        fields.iter().map(|f| &f.data_type),
                    ))),
                    (true, None) => DataType::Map(Box::new(DataType::Any)),
                    (false, Some(fields)) => DataType::Struct(fields),
                    (false, None) => DataType::Any,
                };
                (NodeKind::Project { steps, map: *map }, ty)
            }
            ExprOp::Array { exprs } => {
                let exprs = self.exprs(exprs, scope)?;
                let ty = DataType::list(unify_all(exprs.iter().map(|e| &e.ty)));
                (NodeKind::Array(exprs), ty)
            }
            ExprOp::Index {
                target,
                index,
                default,
            } => {
                let target = self.expr(target, scope)?;
                let index = self.expr(index, scope)?;
                let elem = match &target.ty {
                    DataType::List(e) | DataType::Map(e) => (**e).clone(),
                    DataType::Struct(_) => DataType::Any,
                    t if t.is_dynamic() => DataType::Any,
                    other => {
                        return Err(CompileError::InvalidArgument {
                            loc,
                            op: "index",
                            reason: format!("cannot index {}", other),
                        })
                    }
                };
                let default = default.as_ref().map(|d| self.expr(d, scope)).transpose()?;
                let ty = match &default {
                    Some(d) => unify(&elem, &d.ty),
                    None => elem,
                };
                (
                    NodeKind::Index {
                        target,
                        index,
                        default,
                    },
                    ty,
                )
            }
            ExprOp::PropRef {
                target,
                name,
                default,
            } => {
                let target = self.expr(target, scope)?;
                let default = default.as_ref().map(|d| self.expr(d, scope)).transpose()?;
                let ty = match (target.ty.property_type(name), &default) {
                    (Some(t), Some(d)) => unify(&t, &d.ty),
                    (Some(t), None) => t,
                    (None, Some(d)) if matches!(target.ty, DataType::Struct(_)) => d.ty.clone(),
                    (None, _) => {
                        return Err(CompileError::InvalidArgument {
                            loc,
                            op: "prop_ref",
                            reason: format!("{} has no property '{}'", target.ty, name),
                        })
                    }
                };
                (
                    NodeKind::Prop {
                        target,
                        name: name.clone(),
                        default,
                    },
                    ty,
                )
            }
            ExprOp::Concat { exprs } => {
                let exprs = self.exprs(exprs, scope)?;
                let elems = exprs
                    .iter()
                    .map(|e| self.element("concat", e))
                    .collect::<Result<Vec<_>, _>>()?;
                let ty = DataType::list(unify_all(elems.iter()));
                (NodeKind::Concat(exprs), ty)
            }
            ExprOp::First { expr } => {
                let e = self.expr(expr, scope)?;
                let ty = self.element("first", &e)?;
                (NodeKind::First(e), ty)
            }
            ExprOp::Length { expr } => (NodeKind::Length(self.expr(expr, scope)?), DataType::Int64),
            ExprOp::Singleton { expr } => {
                let e = self.expr(expr, scope)?;
                let elem = if e.ty == DataType::Null {
                    DataType::Any
                } else {
                    e.ty.clone()
                };
                (NodeKind::Singleton(e), DataType::list(elem))
            }
            ExprOp::Foreach { input, function } => {
                let input = self.expr(input, scope)?;
                let elem = self.element("foreach", &input)?;
                let function = self.function(function, &[elem], scope, "foreach", loc)?;
                let ty = DataType::list(function.body.ty.clone());
                (NodeKind::Foreach { input, function }, ty)
            }
            ExprOp::Cast { data_type, expr } => {
                (NodeKind::Cast(self.expr(expr, scope)?), data_type.clone())
            }
            ExprOp::Serialize { expr } => {
                let e = self.expr(expr, scope)?;
                if matches!(e.ty, DataType::Opaque(_) | DataType::Future(_)) {
                    return Err(CompileError::UnsupportedOperator {
                        loc,
                        op: "serialize",
                        reason: format!("{} has no serialized form", e.ty),
                    });
                }
                (NodeKind::Serialize(e), DataType::Utf8)
            }
            ExprOp::Deserialize { data_type, expr } => {
                (NodeKind::Deserialize(self.expr(expr, scope)?), data_type.clone())
            }
            ExprOp::GenerateKeys { names, values } => {
                self.same_len("generate_keys", names, values, loc)?;
                let values = self.exprs(values, scope)?;
                let mut fields: Vec<Field> = Vec::new();
                for (name, v) in names.iter().zip(&values) {
                    let elem = self.element("generate_keys", v)?;
                    match fields.iter_mut().find(|f| &f.name == name) {
                        Some(f) => f.data_type = unify(&f.data_type, &elem),
                        None => fields.push(Field::new(name, elem, false)),
                    }
                }
                (
                    NodeKind::GenerateKeys {
                        names: names.clone(),
                        values,
                    },
                    DataType::list(DataType::Struct(fields)),
                )
            }

            ExprOp::RootContext => (NodeKind::RootContext, context_type()),
            ExprOp::CurrentContext => (NodeKind::CurrentContext, context_type()),
            ExprOp::TraceContext { names, values } => {
                self.same_len("trace_context", names, values, loc)?;
                (
                    NodeKind::TraceContext {
                        names: names.clone(),
                        values: self.exprs(values, scope)?,
                    },
                    context_type(),
                )
            }
            ExprOp::TimeoutMax { timeout, unit } => {
                let amount = self.expr(timeout, scope)?;
                self.expect_integer("timeout_max", &amount)?;
                (NodeKind::TimeoutMax { amount, unit: *unit }, context_type())
            }
            ExprOp::TimeoutGuard {
                min,
                min_unit,
                max,
                max_unit,
            } => {
                let min = self.expr(min, scope)?;
                let max = self.expr(max, scope)?;
                self.expect_integer("timeout_guard", &min)?;
                self.expect_integer("timeout_guard", &max)?;
                (
                    NodeKind::TimeoutGuard {
                        min,
                        min_unit: *min_unit,
                        max,
                        max_unit: *max_unit,
                    },
                    context_type(),
                )
            }
            ExprOp::TimeoutRemaining { unit } => (NodeKind::TimeoutRemaining(*unit), DataType::Int64),
            ExprOp::EndContext { context } => {
                let ctx = self.expr(context, scope)?;
                self.expect_context("end_context", &ctx)?;
                (NodeKind::EndContext(ctx), DataType::Void)
            }
            ExprOp::WithContext { context, expr } => {
                let ctx = self.expr(context, scope)?;
                self.expect_context("with_context", &ctx)?;
                let body = self.expr(expr, scope)?;
                let ty = body.ty.clone();
                (NodeKind::WithContext { context: ctx, body }, ty)
            }
            ExprOp::EnforceTimeout { expr } => {
                let captures = captured_locals(expr, scope);
                let body = self.expr(expr, scope)?;
                let ty = body.ty.resolved();
                (NodeKind::Enforce { captures, body }, ty)
            }
            ExprOp::Resolve { expr } => {
                let e = self.expr(expr, scope)?;
                let ty = e.ty.resolved();
                (NodeKind::Resolve(e), ty)
            }

            ExprOp::StreamExecute { input, stream } => {
                let input = self.expr(input, scope)?;
                let item = self.element("stream_execute", &input)?;
                let stream = self.stream(stream, item, scope, loc)?;
                let ty = stream.result_type.clone();
                (NodeKind::StreamExecute { input, stream }, ty)
            }
            ExprOp::StreamCreate { stream, item_type } => {
                let stream = self.stream(stream, item_type.clone(), scope, loc)?;
                (NodeKind::StreamCreate { stream }, stream_type())
            }
            ExprOp::StreamComplete { stream, inputs } => {
                let handle = self.expr(stream, scope)?;
                if !(handle.ty.is_dynamic() || handle.ty == stream_type()) {
                    return Err(CompileError::InvalidArgument {
                        loc,
                        op: "stream_complete",
                        reason: format!("expected a stream, found {}", handle.ty),
                    });
                }
                let inputs = self.exprs(inputs, scope)?;
                for input in &inputs {
                    self.element("stream_complete", input)?;
                }
                (
                    NodeKind::StreamComplete {
                        stream: handle,
                        inputs,
                    },
                    DataType::Any,
                )
            }

            ExprOp::Join { inputs, body } => {
                let mut arms = Vec::with_capacity(inputs.len());
                let mut bound: Vec<(Arc<str>, DataType)> = Vec::new();
                let mut seen = HashSet::new();
                for input in inputs {
                    let expr = self.expr(&input.expr, scope)?;
                    let produced = expr.ty.resolved();
                    let mut names = Vec::with_capacity(input.names.len());
                    for name in &input.names {
                        if !seen.insert(name.as_str()) {
                            return Err(CompileError::InvalidArgument {
                                loc,
                                op: "join",
                                reason: format!("join slot '{}' is produced twice", name),
                            });
                        }
                        let ty = if input.names.len() == 1 {
                            produced.clone()
                        } else {
                            produced.property_type(name).unwrap_or(DataType::Any)
                        };
                        let name: Arc<str> = Arc::from(name.as_str());
                        bound.push((name.clone(), ty));
                        names.push(name);
                    }
                    arms.push(JoinArm { names, expr });
                }
                let body = self.expr(body, &scope.with(bound))?;
                let ty = body.ty.clone();
                (NodeKind::Join { arms, body }, ty)
            }
        };
        Ok(Node::new(kind, ty, loc))
    }
}

fn set_field(fields: &mut Vec<Field>, field: Field) {
    match fields.iter_mut().find(|f| f.name == field.name) {
        Some(existing) => *existing = field,
        None => fields.push(field),
    }
}

/// Outer locals the enforced body references; only these are captured.
fn captured_locals(node: &ExprNode, scope: &Scope) -> Vec<Arc<str>> {
    let mut out: Vec<Arc<str>> = Vec::new();
    node.walk(&mut |n| {
        if let ExprOp::Local { name } = &n.op {
            if let Some((bound, _)) = scope.lookup(name) {
                if !out.iter().any(|c| c == bound) {
                    out.push(bound.clone());
                }
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use plexus_core::id::ValueId;
    use plexus_core::ops::ArithmeticOp;
    use plexus_plan::dsl::build::*;

    fn compiler(registry: &FunctionRegistry) -> Compiler<'_> {
        Compiler::new(registry)
    }

    #[test]
    fn test_if_chain_flattens_to_case() {
        let registry = FunctionRegistry::new();
        let c = compiler(&registry);
        let e = if_else(
            constant(false),
            constant(1i64),
            if_else(constant(true), constant(2i64), constant(3i64)),
        );
        let node = c.compile(&e).expect("compile");
        match &node.kind {
            NodeKind::Case { branches, .. } => assert_eq!(branches.len(), 2),
            other => panic!("expected case, found {}", other.name()),
        }
        assert_eq!(node.ty, DataType::Int64);
    }

    #[test]
    fn test_math_unifies_numeric_types() {
        let registry = FunctionRegistry::new();
        let c = compiler(&registry);
        let ok = c
            .compile(&math(ArithmeticOp::Add, constant(1i32), constant(2.5f64)))
            .expect("compile");
        assert_eq!(ok.ty, DataType::Float64);

        let err = c
            .compile(&math(ArithmeticOp::Add, constant("a"), constant(1i64)).at(3, 9))
            .expect_err("compile should fail");
        assert!(matches!(err, CompileError::TypeUnification { .. }));
        assert_eq!(err.location().line, 3);
        assert!(err.to_string().starts_with("L3:9"));
    }

    #[test]
    fn test_unknown_local_and_value() {
        let registry = FunctionRegistry::new();
        let c = compiler(&registry);
        assert!(matches!(
            c.compile(&local("x")),
            Err(CompileError::UnknownLocal { .. })
        ));
        assert!(matches!(
            c.compile(&value(ValueId::new(4))),
            Err(CompileError::UnknownValue { .. })
        ));
    }

    #[test]
    fn test_function_arity_checked() {
        let registry = FunctionRegistry::with_builtins();
        let c = compiler(&registry);
        let err = c
            .compile(&invoke("upper", vec![constant("a"), constant("b")]))
            .expect_err("compile should fail");
        assert!(matches!(err, CompileError::Arity { expected: 1, found: 2, .. }));
        assert!(matches!(
            c.compile(&invoke("nope", vec![])),
            Err(CompileError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_project_type_follows_override_order() {
        let registry = FunctionRegistry::new();
        let c = compiler(&registry);
        let e = project(
            vec![
                field("a", constant(1i64)),
                merge(record(vec![("a", constant("x")), ("b", constant(true))])),
            ],
            false,
        );
        let node = c.compile(&e).expect("compile");
        assert_eq!(
            node.ty,
            DataType::Struct(vec![
                Field::new("a", DataType::Utf8, true),
                Field::new("b", DataType::Boolean, true),
            ])
        );
    }

    #[test]
    fn test_bad_constant_pattern_rejected() {
        let registry = FunctionRegistry::new();
        let c = compiler(&registry);
        assert!(matches!(
            c.compile(&matches(constant("abc"), constant("(unclosed"))),
            Err(CompileError::InvalidArgument { op: "matches", .. })
        ));
    }

    #[test]
    fn test_enforce_captures_referenced_locals_only() {
        let registry = FunctionRegistry::new();
        let c = compiler(&registry);
        let scope = Scope::new().with([
            (Arc::from("a"), DataType::Int64),
            (Arc::from("b"), DataType::Int64),
        ]);
        let node = c
            .expr(&enforce_timeout(local("b")), &scope)
            .expect("compile");
        match &node.kind {
            NodeKind::Enforce { captures, .. } => {
                assert_eq!(captures.len(), 1);
                assert_eq!(&*captures[0], "b");
            }
            other => panic!("expected enforce, found {}", other.name()),
        }
    }
}
