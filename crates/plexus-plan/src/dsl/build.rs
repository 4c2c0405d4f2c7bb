//! Constructor functions for expression trees and stream stages.
//!
//! ```
//! use plexus_plan::dsl::build::*;
//! use plexus_core::ops::ArithmeticOp;
//!
//! let square = func(["x"], math(ArithmeticOp::Mult, local("x"), local("x")));
//! let plan = stream(vec![stage::transform(square), stage::limit(constant(2i64))]);
//! assert_eq!(plan.stages.len(), 2);
//! ```

use plexus_core::id::ValueId;
use plexus_core::ops::{ArithmeticOp, Comparison};
use plexus_core::schema::DataType;
use plexus_core::time::TimeUnit;
use plexus_core::types::Value;

use crate::expr::{ExprNode, ExprOp, Function, JoinInput, ProjectOp};
use crate::stream::{SinkOp, StreamNode, StreamPlan};

fn boxed(e: ExprNode) -> Box<ExprNode> {
    Box::new(e)
}

pub fn func<S: Into<String>>(params: impl IntoIterator<Item = S>, body: ExprNode) -> Function {
    Function::new(params, body)
}

pub fn constant(v: impl Into<Value>) -> ExprNode {
    ExprOp::Constant {
        value: v.into(),
        data_type: None,
    }
    .into()
}

pub fn typed_constant(v: impl Into<Value>, data_type: DataType) -> ExprNode {
    ExprOp::Constant {
        value: v.into(),
        data_type: Some(data_type),
    }
    .into()
}

pub fn null(data_type: DataType) -> ExprNode {
    ExprOp::Null { data_type }.into()
}

pub fn local(name: &str) -> ExprNode {
    ExprOp::Local { name: name.into() }.into()
}

pub fn value(id: ValueId) -> ExprNode {
    ExprOp::Value { value: id }.into()
}

pub fn invoke(function: &str, args: Vec<ExprNode>) -> ExprNode {
    ExprOp::Invoke {
        function: function.into(),
        args,
    }
    .into()
}

pub fn async_invoke(function: &str, args: Vec<ExprNode>) -> ExprNode {
    ExprOp::AsyncInvoke {
        function: function.into(),
        args,
    }
    .into()
}

pub fn if_else(test: ExprNode, then: ExprNode, otherwise: ExprNode) -> ExprNode {
    ExprOp::If {
        test: boxed(test),
        then: boxed(then),
        otherwise: boxed(otherwise),
    }
    .into()
}

pub fn coalesce(exprs: Vec<ExprNode>) -> ExprNode {
    ExprOp::Coalesce { exprs }.into()
}

pub fn catch(primary: ExprNode, fallback: ExprNode) -> ExprNode {
    ExprOp::Catch {
        primary: boxed(primary),
        fallback: boxed(fallback),
    }
    .into()
}

pub fn and(exprs: Vec<ExprNode>) -> ExprNode {
    ExprOp::And { exprs }.into()
}

pub fn or(exprs: Vec<ExprNode>) -> ExprNode {
    ExprOp::Or { exprs }.into()
}

pub fn not(e: ExprNode) -> ExprNode {
    ExprOp::Not { expr: boxed(e) }.into()
}

pub fn is_null(e: ExprNode) -> ExprNode {
    ExprOp::IsNull { expr: boxed(e) }.into()
}

pub fn eq(left: ExprNode, right: ExprNode) -> ExprNode {
    ExprOp::Eq {
        left: boxed(left),
        right: boxed(right),
    }
    .into()
}

pub fn cmp(comparison: Comparison, left: ExprNode, right: ExprNode) -> ExprNode {
    ExprOp::BooleanCompare {
        comparison,
        left: boxed(left),
        right: boxed(right),
    }
    .into()
}

pub fn compare(left: ExprNode, right: ExprNode) -> ExprNode {
    ExprOp::Compare {
        left: boxed(left),
        right: boxed(right),
    }
    .into()
}

pub fn math(operation: ArithmeticOp, left: ExprNode, right: ExprNode) -> ExprNode {
    ExprOp::BinaryMath {
        operation,
        left: boxed(left),
        right: boxed(right),
    }
    .into()
}

pub fn matches(v: ExprNode, pattern: ExprNode) -> ExprNode {
    ExprOp::Matches {
        value: boxed(v),
        pattern: boxed(pattern),
    }
    .into()
}

pub fn record<S: Into<String>>(fields: Vec<(S, ExprNode)>) -> ExprNode {
    let (names, values) = fields.into_iter().map(|(n, e)| (n.into(), e)).unzip();
    ExprOp::Record { names, values }.into()
}

pub fn project(operations: Vec<ProjectOp>, map: bool) -> ExprNode {
    ExprOp::Project { operations, map }.into()
}

pub fn field(name: &str, expr: ExprNode) -> ProjectOp {
    ProjectOp::Field {
        name: name.into(),
        expr,
    }
}

pub fn merge(expr: ExprNode) -> ProjectOp {
    ProjectOp::Merge { expr }
}

pub fn array(exprs: Vec<ExprNode>) -> ExprNode {
    ExprOp::Array { exprs }.into()
}

pub fn prop(target: ExprNode, name: &str) -> ExprNode {
    ExprOp::PropRef {
        target: boxed(target),
        name: name.into(),
        default: None,
    }
    .into()
}

pub fn prop_or(target: ExprNode, name: &str, default: ExprNode) -> ExprNode {
    ExprOp::PropRef {
        target: boxed(target),
        name: name.into(),
        default: Some(boxed(default)),
    }
    .into()
}

pub fn index(target: ExprNode, idx: ExprNode) -> ExprNode {
    ExprOp::Index {
        target: boxed(target),
        index: boxed(idx),
        default: None,
    }
    .into()
}

pub fn length(e: ExprNode) -> ExprNode {
    ExprOp::Length { expr: boxed(e) }.into()
}

pub fn foreach(input: ExprNode, function: Function) -> ExprNode {
    ExprOp::Foreach {
        input: boxed(input),
        function,
    }
    .into()
}

pub fn cast(data_type: DataType, e: ExprNode) -> ExprNode {
    ExprOp::Cast {
        data_type,
        expr: boxed(e),
    }
    .into()
}

pub fn generate_keys<S: Into<String>>(columns: Vec<(S, ExprNode)>) -> ExprNode {
    let (names, values) = columns.into_iter().map(|(n, e)| (n.into(), e)).unzip();
    ExprOp::GenerateKeys { names, values }.into()
}

pub fn resolve(e: ExprNode) -> ExprNode {
    ExprOp::Resolve { expr: boxed(e) }.into()
}

pub fn enforce_timeout(e: ExprNode) -> ExprNode {
    ExprOp::EnforceTimeout { expr: boxed(e) }.into()
}

pub fn timeout_max(amount: ExprNode, unit: TimeUnit) -> ExprNode {
    ExprOp::TimeoutMax {
        timeout: boxed(amount),
        unit,
    }
    .into()
}

pub fn with_context(context: ExprNode, e: ExprNode) -> ExprNode {
    ExprOp::WithContext {
        context: boxed(context),
        expr: boxed(e),
    }
    .into()
}

pub fn stream(stages: Vec<StreamNode>) -> StreamPlan {
    StreamPlan::new(stages)
}

pub fn stream_execute(input: ExprNode, plan: StreamPlan) -> ExprNode {
    ExprOp::StreamExecute {
        input: boxed(input),
        stream: plan,
    }
    .into()
}

pub fn stream_create(plan: StreamPlan) -> ExprNode {
    ExprOp::StreamCreate {
        stream: plan,
        item_type: DataType::Any,
    }
    .into()
}

pub fn stream_complete(handle: ExprNode, inputs: Vec<ExprNode>) -> ExprNode {
    ExprOp::StreamComplete {
        stream: boxed(handle),
        inputs,
    }
    .into()
}

pub fn stream_to(target: ExprNode) -> SinkOp {
    SinkOp::Stream {
        target: boxed(target),
    }
}

pub fn join_input(names: &[&str], expr: ExprNode) -> JoinInput {
    JoinInput {
        names: names.iter().map(|n| n.to_string()).collect(),
        expr,
    }
}

pub fn join(inputs: Vec<JoinInput>, body: ExprNode) -> ExprNode {
    ExprOp::Join {
        inputs,
        body: boxed(body),
    }
    .into()
}

/// Stream stage constructors.
pub mod stage {
    use crate::expr::{ExprNode, Function};
    use crate::stream::{StreamNode, StreamOp};

    pub fn transform(function: Function) -> StreamNode {
        StreamOp::Transform { function }.into()
    }

    pub fn filter(predicate: Function) -> StreamNode {
        StreamOp::Filter { predicate }.into()
    }

    pub fn distinct() -> StreamNode {
        StreamOp::Distinct.into()
    }

    pub fn flatten() -> StreamNode {
        StreamOp::Flatten.into()
    }

    pub fn resolve() -> StreamNode {
        StreamOp::Resolve.into()
    }

    pub fn offset(offset: ExprNode) -> StreamNode {
        StreamOp::Offset { offset }.into()
    }

    pub fn limit(limit: ExprNode) -> StreamNode {
        StreamOp::Limit { limit }.into()
    }

    pub fn slice(offset: ExprNode, limit: ExprNode) -> StreamNode {
        StreamOp::Slice { offset, limit }.into()
    }

    pub fn order_by(comparator: Function) -> StreamNode {
        StreamOp::OrderBy { comparator }.into()
    }

    pub fn group_by(key: Function, output: Function) -> StreamNode {
        StreamOp::GroupBy { key, output }.into()
    }

    pub fn cross(right: Function, output: Function) -> StreamNode {
        StreamOp::Cross { right, output }.into()
    }

    pub fn hash_join(
        right: ExprNode,
        left_key: Function,
        right_key: Function,
        output: Function,
    ) -> StreamNode {
        StreamOp::HashJoin {
            right,
            left_key,
            right_key,
            output,
        }
        .into()
    }

    pub fn outer_hash_join(
        right: ExprNode,
        left_key: Function,
        right_key: Function,
        output: Function,
    ) -> StreamNode {
        StreamOp::OuterHashJoin {
            right,
            left_key,
            right_key,
            output,
        }
        .into()
    }

    pub fn scatter(function: Function) -> StreamNode {
        StreamOp::Scatter { function }.into()
    }
}
