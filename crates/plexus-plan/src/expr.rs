//! Expression operator tree.
//!
//! One `ExprOp` variant per operator kind; the variant's fields fix its
//! arity and argument shape. Nodes carry the source `Location` the planner
//! assigned so compile errors can point back at it.

use serde::{Deserialize, Serialize};

use plexus_core::id::ValueId;
use plexus_core::location::Location;
use plexus_core::ops::{ArithmeticOp, Comparison};
use plexus_core::schema::DataType;
use plexus_core::time::TimeUnit;
use plexus_core::types::Value;

use crate::stream::StreamPlan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprNode {
    #[serde(flatten)]
    pub op: ExprOp,
    #[serde(default, skip_serializing_if = "Location::is_none")]
    pub loc: Location,
}

impl ExprNode {
    pub fn new(op: ExprOp) -> Self {
        Self {
            op,
            loc: Location::NONE,
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.loc = Location::new(line, column);
        self
    }

    /// Snake-case operator name, as written in program documents.
    pub fn kind(&self) -> &'static str {
        self.op.kind()
    }

    /// Depth-first walk over this node and every node nested below it,
    /// including function bodies and embedded stream plans.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a ExprNode)) {
        f(self);
        for child in self.op.children() {
            child.walk(f);
        }
    }

    /// Every program slot this expression reads through VALUE.
    pub fn value_refs(&self) -> Vec<ValueId> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let ExprOp::Value { value } = &node.op {
                if !out.contains(value) {
                    out.push(*value);
                }
            }
        });
        out
    }
}

impl From<ExprOp> for ExprNode {
    fn from(op: ExprOp) -> Self {
        ExprNode::new(op)
    }
}

/// A compiled-later lambda: named parameters bound as locals over `body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Box<ExprNode>,
}

impl Function {
    pub fn new<S: Into<String>>(params: impl IntoIterator<Item = S>, body: ExprNode) -> Self {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            body: Box::new(body),
        }
    }
}

/// One record-building operation of PROJECT, applied in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProjectOp {
    Field { name: String, expr: ExprNode },
    Merge { expr: ExprNode },
}

/// One concurrently-evaluated producer of a JOIN. A single name binds the
/// produced value directly; several names destructure a record by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinInput {
    pub names: Vec<String>,
    pub expr: ExprNode,
}

fn any_type() -> DataType {
    DataType::Any
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ExprOp {
    // invocation
    Invoke {
        function: String,
        #[serde(default)]
        args: Vec<ExprNode>,
    },
    AsyncInvoke {
        function: String,
        #[serde(default)]
        args: Vec<ExprNode>,
    },
    Call {
        function: String,
        result: DataType,
        #[serde(default)]
        args: Vec<ExprNode>,
    },
    New {
        type_name: String,
        #[serde(default)]
        args: Vec<ExprNode>,
    },

    // literals and references
    Constant {
        value: Value,
        #[serde(default)]
        data_type: Option<DataType>,
    },
    Null {
        #[serde(default = "any_type")]
        data_type: DataType,
    },
    Local {
        name: String,
    },
    Value {
        value: ValueId,
    },

    // control flow
    If {
        test: Box<ExprNode>,
        then: Box<ExprNode>,
        otherwise: Box<ExprNode>,
    },
    Coalesce {
        exprs: Vec<ExprNode>,
    },
    Catch {
        primary: Box<ExprNode>,
        fallback: Box<ExprNode>,
    },

    // boolean algebra
    And {
        exprs: Vec<ExprNode>,
    },
    Or {
        exprs: Vec<ExprNode>,
    },
    Not {
        expr: Box<ExprNode>,
    },
    Bool {
        expr: Box<ExprNode>,
    },
    IsNull {
        expr: Box<ExprNode>,
    },

    // comparison and membership
    Eq {
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Neq {
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    BooleanCompare {
        comparison: Comparison,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Compare {
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    MultiCompare {
        exprs: Vec<ExprNode>,
    },
    In {
        value: Box<ExprNode>,
        collection: Box<ExprNode>,
    },
    Contains {
        collection: Box<ExprNode>,
        value: Box<ExprNode>,
    },
    Matches {
        value: Box<ExprNode>,
        pattern: Box<ExprNode>,
    },

    // arithmetic
    BinaryMath {
        operation: ArithmeticOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Negate {
        expr: Box<ExprNode>,
    },

    // structure
    Record {
        names: Vec<String>,
        values: Vec<ExprNode>,
    },
    RecordAs {
        type_name: String,
        names: Vec<String>,
        values: Vec<ExprNode>,
    },
    Project {
        operations: Vec<ProjectOp>,
        #[serde(default)]
        map: bool,
    },
    Array {
        #[serde(default)]
        exprs: Vec<ExprNode>,
    },
    Index {
        target: Box<ExprNode>,
        index: Box<ExprNode>,
        #[serde(default)]
        default: Option<Box<ExprNode>>,
    },
    PropRef {
        target: Box<ExprNode>,
        name: String,
        #[serde(default)]
        default: Option<Box<ExprNode>>,
    },
    Concat {
        exprs: Vec<ExprNode>,
    },
    First {
        expr: Box<ExprNode>,
    },
    Length {
        expr: Box<ExprNode>,
    },
    Singleton {
        expr: Box<ExprNode>,
    },
    Foreach {
        input: Box<ExprNode>,
        function: Function,
    },
    Cast {
        data_type: DataType,
        expr: Box<ExprNode>,
    },
    Serialize {
        expr: Box<ExprNode>,
    },
    Deserialize {
        data_type: DataType,
        expr: Box<ExprNode>,
    },
    GenerateKeys {
        names: Vec<String>,
        values: Vec<ExprNode>,
    },

    // context and deadlines
    RootContext,
    CurrentContext,
    TraceContext {
        #[serde(default)]
        names: Vec<String>,
        #[serde(default)]
        values: Vec<ExprNode>,
    },
    TimeoutMax {
        timeout: Box<ExprNode>,
        unit: TimeUnit,
    },
    TimeoutGuard {
        min: Box<ExprNode>,
        min_unit: TimeUnit,
        max: Box<ExprNode>,
        max_unit: TimeUnit,
    },
    TimeoutRemaining {
        unit: TimeUnit,
    },
    EndContext {
        context: Box<ExprNode>,
    },
    WithContext {
        context: Box<ExprNode>,
        expr: Box<ExprNode>,
    },
    EnforceTimeout {
        expr: Box<ExprNode>,
    },
    Resolve {
        expr: Box<ExprNode>,
    },

    // embedded stream programs
    StreamExecute {
        input: Box<ExprNode>,
        stream: StreamPlan,
    },
    StreamCreate {
        stream: StreamPlan,
        #[serde(default = "any_type")]
        item_type: DataType,
    },
    StreamComplete {
        stream: Box<ExprNode>,
        #[serde(default)]
        inputs: Vec<ExprNode>,
    },

    Join {
        inputs: Vec<JoinInput>,
        body: Box<ExprNode>,
    },
}

impl ExprOp {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invoke { .. } => "invoke",
            Self::AsyncInvoke { .. } => "async_invoke",
            Self::Call { .. } => "call",
            Self::New { .. } => "new",
            Self::Constant { .. } => "constant",
            Self::Null { .. } => "null",
            Self::Local { .. } => "local",
            Self::Value { .. } => "value",
            Self::If { .. } => "if",
            Self::Coalesce { .. } => "coalesce",
            Self::Catch { .. } => "catch",
            Self::And { .. } => "and",
            Self::Or { .. } => "or",
            Self::Not { .. } => "not",
            Self::Bool { .. } => "bool",
            Self::IsNull { .. } => "is_null",
            Self::Eq { .. } => "eq",
            Self::Neq { .. } => "neq",
            Self::BooleanCompare { .. } => "boolean_compare",
            Self::Compare { .. } => "compare",
            Self::MultiCompare { .. } => "multi_compare",
            Self::In { .. } => "in",
            Self::Contains { .. } => "contains",
            Self::Matches { .. } => "matches",
            Self::BinaryMath { .. } => "binary_math",
            Self::Negate { .. } => "negate",
            Self::Record { .. } => "record",
            Self::RecordAs { .. } => "record_as",
            Self::Project { .. } => "project",
            Self::Array { .. } => "array",
            Self::Index { .. } => "index",
            Self::PropRef { .. } => "prop_ref",
            Self::Concat { .. } => "concat",
            Self::First { .. } => "first",
            Self::Length { .. } => "length",
            Self::Singleton { .. } => "singleton",
            Self::Foreach { .. } => "foreach",
            Self::Cast { .. } => "cast",
            Self::Serialize { .. } => "serialize",
            Self::Deserialize { .. } => "deserialize",
            Self::GenerateKeys { .. } => "generate_keys",
            Self::RootContext => "root_context",
            Self::CurrentContext => "current_context",
            Self::TraceContext { .. } => "trace_context",
            Self::TimeoutMax { .. } => "timeout_max",
            Self::TimeoutGuard { .. } => "timeout_guard",
            Self::TimeoutRemaining { .. } => "timeout_remaining",
            Self::EndContext { .. } => "end_context",
            Self::WithContext { .. } => "with_context",
            Self::EnforceTimeout { .. } => "enforce_timeout",
            Self::Resolve { .. } => "resolve",
            Self::StreamExecute { .. } => "stream_execute",
            Self::StreamCreate { .. } => "stream_create",
            Self::StreamComplete { .. } => "stream_complete",
            Self::Join { .. } => "join",
        }
    }

    /// Direct sub-expressions, in argument order.
    pub fn children(&self) -> Vec<&ExprNode> {
        match self {
            Self::Invoke { args, .. }
            | Self::AsyncInvoke { args, .. }
            | Self::Call { args, .. }
            | Self::New { args, .. } => args.iter().collect(),
            Self::Constant { .. } | Self::Null { .. } | Self::Local { .. } | Self::Value { .. } => Vec::new(),
            Self::RootContext | Self::CurrentContext | Self::TimeoutRemaining { .. } => Vec::new(),
            Self::If {
                test,
                then,
                otherwise,
            } => vec![&**test, &**then, &**otherwise],
            Self::Catch { primary, fallback } => vec![&**primary, &**fallback],
            Self::Coalesce { exprs }
            | Self::And { exprs }
            | Self::Or { exprs }
            | Self::MultiCompare { exprs }
            | Self::Array { exprs }
            | Self::Concat { exprs } => exprs.iter().collect(),
            Self::Not { expr }
            | Self::Bool { expr }
            | Self::IsNull { expr }
            | Self::Negate { expr }
            | Self::First { expr }
            | Self::Length { expr }
            | Self::Singleton { expr }
            | Self::Cast { expr, .. }
            | Self::Serialize { expr }
            | Self::Deserialize { expr, .. }
            | Self::EnforceTimeout { expr }
            | Self::Resolve { expr } => vec![&**expr],
            Self::Eq { left, right }
            | Self::Neq { left, right }
            | Self::BooleanCompare { left, right, .. }
            | Self::Compare { left, right }
            | Self::BinaryMath { left, right, .. } => vec![&**left, &**right],
            Self::In { value, collection } => vec![&**value, &**collection],
            Self::Contains { collection, value } => vec![&**collection, &**value],
            Self::Matches { value, pattern } => vec![&**value, &**pattern],
            Self::Record { values, .. }
            | Self::RecordAs { values, .. }
            | Self::GenerateKeys { values, .. }
            | Self::TraceContext { values, .. } => values.iter().collect(),
            Self::Project { operations, .. } => operations
                .iter()
                .map(|op| match op {
                    ProjectOp::Field { expr, .. } | ProjectOp::Merge { expr } => expr,
                })
                .collect(),
            Self::Index {
                target,
                index,
                default,
            } => {
                let mut out = vec![&**target, &**index];
                out.extend(default.as_deref());
                out
            }
            Self::PropRef {
                target, default, ..
            } => {
                let mut out = vec![&**target];
                out.extend(default.as_deref());
                out
            }
            Self::Foreach { input, function } => vec![&**input, &*function.body],
            Self::TimeoutMax { timeout, .. } => vec![&**timeout],
            Self::TimeoutGuard { min, max, .. } => vec![&**min, &**max],
            Self::EndContext { context } => vec![&**context],
            Self::WithContext { context, expr } => vec![&**context, &**expr],
            Self::StreamExecute { input, stream } => {
                let mut out = vec![&**input];
                out.extend(stream.children());
                out
            }
            Self::StreamCreate { stream, .. } => stream.children(),
            Self::StreamComplete { stream, inputs } => {
                let mut out = vec![&**stream];
                out.extend(inputs.iter());
                out
            }
            Self::Join { inputs, body } => {
                let mut out: Vec<&ExprNode> = inputs.iter().map(|i| &i.expr).collect();
                out.push(&**body);
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::build::*;

    #[test]
    fn test_value_refs_reach_into_functions() {
        let e = foreach(
            value(ValueId::new(1)),
            func(["x"], math(ArithmeticOp::Add, local("x"), value(ValueId::new(2)))),
        );
        assert_eq!(e.value_refs(), vec![ValueId::new(1), ValueId::new(2)]);
    }

    #[test]
    fn test_json_shape() {
        let e = math(ArithmeticOp::Mult, local("x"), constant(2i64)).at(3, 7);
        let json = serde_json::to_value(&e).expect("serialize");
        assert_eq!(json["op"], "binary_math");
        assert_eq!(json["operation"], "mult");
        assert_eq!(json["loc"]["line"], 3);
        let back: ExprNode = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, e);
    }

    #[test]
    fn test_location_defaults_to_none() {
        let e: ExprNode = serde_json::from_str(r#"{"op": "local", "name": "x"}"#).expect("parse");
        assert!(e.loc.is_none());
        assert_eq!(e.kind(), "local");
    }
}
