//! Stream plans -> compiled stage chains.
//!
//! Types flow stage by stage: each stage's functions are compiled against
//! the item type it receives, and the type it emits feeds the next stage.

use std::sync::Arc;

use plexus_core::location::Location;
use plexus_core::schema::{unify_comparable, DataType};
use plexus_operators::join::JoinKind;
use plexus_plan::{ExprNode, SinkOp, StreamOp, StreamPlan};

use super::{Compiler, Scope};
use crate::error::CompileError;
use crate::ir::{CompiledFn, CompiledSink, CompiledStage, CompiledStream};
use crate::stream::STREAM_KIND;

impl<'a> Compiler<'a> {
    /// Zero-argument row count (offset/limit).
    fn count(&self, node: &ExprNode, scope: &Scope, op: &'static str) -> Result<Arc<CompiledFn>, CompileError> {
        let e = self.expr(node, scope)?;
        if !(e.ty.is_dynamic() || matches!(e.ty, DataType::Int32 | DataType::Int64)) {
            return Err(CompileError::InvalidArgument {
                loc: node.loc,
                op,
                reason: format!("row count must be an integer, found {}", e.ty),
            });
        }
        Ok(CompiledFn::thunk(e))
    }

    fn rows_of(&self, ty: &DataType, op: &'static str, loc: Location) -> Result<DataType, CompileError> {
        ty.resolved()
            .element_type()
            .ok_or_else(|| CompileError::InvalidArgument {
                loc,
                op,
                reason: format!("expected a list, found {}", ty),
            })
    }

    pub(crate) fn stream(
        &self,
        plan: &StreamPlan,
        input_type: DataType,
        scope: &Scope,
        loc: Location,
    ) -> Result<Arc<CompiledStream>, CompileError> {
        let mut item = input_type.clone();
        let mut stages = Vec::with_capacity(plan.stages.len());

        for node in &plan.stages {
            let loc = if node.loc.is_none() { loc } else { node.loc };
            let op = node.op.kind();
            let stage = match &node.op {
                StreamOp::Transform { function } => {
                    let f = self.function(function, &[item.clone()], scope, op, loc)?;
                    item = f.body.ty.clone();
                    CompiledStage::Transform(f)
                }
                StreamOp::Filter { predicate } => {
                    CompiledStage::Filter(self.function(predicate, &[item.clone()], scope, op, loc)?)
                }
                StreamOp::Distinct => CompiledStage::Distinct,
                StreamOp::Flatten => {
                    item = self.rows_of(&item, "flatten", loc)?;
                    CompiledStage::Flatten
                }
                StreamOp::Resolve => {
                    item = item.resolved();
                    CompiledStage::Resolve
                }
                StreamOp::Offset { offset } => CompiledStage::Slice {
                    offset: Some(self.count(offset, scope, "offset")?),
                    limit: None,
                },
                StreamOp::Limit { limit } => CompiledStage::Slice {
                    offset: None,
                    limit: Some(self.count(limit, scope, "limit")?),
                },
                StreamOp::Slice { offset, limit } => CompiledStage::Slice {
                    offset: Some(self.count(offset, scope, "slice")?),
                    limit: Some(self.count(limit, scope, "slice")?),
                },
                StreamOp::OrderBy { comparator } => {
                    let cmp =
                        self.function(comparator, &[item.clone(), item.clone()], scope, op, loc)?;
                    let ty = &cmp.body.ty;
                    if !(ty.is_dynamic() || matches!(ty, DataType::Int32 | DataType::Int64)) {
                        return Err(CompileError::InvalidArgument {
                            loc,
                            op: "order_by",
                            reason: format!("comparator must return an integer, found {}", ty),
                        });
                    }
                    CompiledStage::OrderBy(cmp)
                }
                StreamOp::GroupBy { key, output } => {
                    let key = self.function(key, &[item.clone()], scope, op, loc)?;
                    let rows = DataType::list(item.clone());
                    let output =
                        self.function(output, &[key.body.ty.clone(), rows], scope, op, loc)?;
                    item = output.body.ty.clone();
                    CompiledStage::GroupBy { key, output }
                }
                StreamOp::Cross { right, output } => {
                    let right = self.function(right, &[item.clone()], scope, op, loc)?;
                    let right_row = self.rows_of(&right.body.ty, "cross", loc)?;
                    let output =
                        self.function(output, &[item.clone(), right_row], scope, op, loc)?;
                    item = self.rows_of(&output.body.ty, "cross", loc)?;
                    CompiledStage::Cross { right, output }
                }
                StreamOp::HashJoin {
                    right,
                    left_key,
                    right_key,
                    output,
                }
                | StreamOp::OuterHashJoin {
                    right,
                    left_key,
                    right_key,
                    output,
                } => {
                    let kind = if matches!(node.op, StreamOp::HashJoin { .. }) {
                        JoinKind::Inner
                    } else {
                        JoinKind::LeftOuter
                    };
                    let right = self.expr(right, scope)?;
                    let right_row = self.rows_of(&right.ty, "hash_join", loc)?;
                    let left_key = self.function(left_key, &[item.clone()], scope, op, loc)?;
                    let right_key =
                        self.function(right_key, &[right_row.clone()], scope, op, loc)?;
                    if unify_comparable(&left_key.body.ty, &right_key.body.ty).is_none() {
                        return Err(CompileError::TypeUnification {
                            loc,
                            op: "hash_join",
                            left: left_key.body.ty.to_string(),
                            right: right_key.body.ty.to_string(),
                        });
                    }
                    let output = self.function(output, &[item.clone(), right_row], scope, op, loc)?;
                    item = output.body.ty.clone();
                    CompiledStage::HashJoin {
                        kind,
                        right: CompiledFn::thunk(right),
                        left_key,
                        right_key,
                        output,
                    }
                }
                StreamOp::Scatter { function } => {
                    let f = self.function(function, &[item.clone()], scope, op, loc)?;
                    item = f.body.ty.clone();
                    CompiledStage::Scatter(f)
                }
            };
            stages.push(stage);
        }

        let (sink, result_type) = match &plan.sink {
            SinkOp::Accumulate => (CompiledSink::Accumulate, DataType::list(item)),
            SinkOp::Stream { target } => {
                let target = self.expr(target, scope)?;
                let ok = target.ty.is_dynamic()
                    || matches!(&target.ty, DataType::Opaque(k) if k == STREAM_KIND);
                if !ok {
                    return Err(CompileError::InvalidArgument {
                        loc: target.loc,
                        op: "stream sink",
                        reason: format!("expected a stream, found {}", target.ty),
                    });
                }
                (CompiledSink::Stream(target), DataType::Void)
            }
        };

        Ok(Arc::new(CompiledStream {
            input_type,
            stages,
            sink,
            result_type,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use plexus_core::ops::ArithmeticOp;
    use plexus_plan::dsl::build::*;

    #[test]
    fn test_types_flow_through_stages() {
        let registry = FunctionRegistry::new();
        let c = Compiler::new(&registry);
        let plan = stream(vec![
            stage::transform(func(["x"], math(ArithmeticOp::Mult, local("x"), local("x")))),
            stage::filter(func(["x"], cmp(plexus_core::ops::Comparison::Gt, local("x"), constant(2i64)))),
            stage::limit(constant(2i64)),
        ]);
        let compiled = c
            .stream(&plan, DataType::Int64, &Scope::new(), Location::NONE)
            .expect("compile");
        assert_eq!(compiled.stages.len(), 3);
        assert_eq!(compiled.result_type, DataType::list(DataType::Int64));
    }

    #[test]
    fn test_stage_function_arity_checked() {
        let registry = FunctionRegistry::new();
        let c = Compiler::new(&registry);
        let plan = stream(vec![stage::order_by(func(["a"], constant(0i64)))]);
        let err = c
            .stream(&plan, DataType::Any, &Scope::new(), Location::new(2, 1))
            .expect_err("stream should fail");
        assert!(matches!(err, CompileError::Arity { expected: 2, found: 1, .. }));
    }

    #[test]
    fn test_flatten_requires_list_items() {
        let registry = FunctionRegistry::new();
        let c = Compiler::new(&registry);
        let plan = stream(vec![stage::flatten()]);
        assert!(c
            .stream(&plan, DataType::Int64, &Scope::new(), Location::NONE)
            .is_err());
        let ok = c
            .stream(&plan, DataType::list(DataType::Utf8), &Scope::new(), Location::NONE)
            .expect("compile");
        assert_eq!(ok.result_type, DataType::list(DataType::Utf8));
    }
}
