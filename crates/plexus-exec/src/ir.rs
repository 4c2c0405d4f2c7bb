//! Compiled expression IR.
//!
//! Every node carries its static type and source location. Children are
//! `Arc`ed so spawned work (async invocations, enforced regions, join
//! producers, stage functions) can own the subtree it evaluates.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use plexus_core::id::ValueId;
use plexus_core::location::Location;
use plexus_core::ops::{ArithmeticOp, Comparison};
use plexus_core::schema::DataType;
use plexus_core::time::TimeUnit;
use plexus_core::types::Value;
use plexus_operators::join::JoinKind;

use crate::functions::Invocable;

pub type Expr = Arc<Node>;

pub struct Node {
    pub kind: NodeKind,
    pub ty: DataType,
    pub loc: Location,
}

impl Node {
    pub fn new(kind: NodeKind, ty: DataType, loc: Location) -> Expr {
        Arc::new(Node { kind, ty, loc })
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind.name())
            .field("ty", &self.ty)
            .field("loc", &self.loc)
            .finish()
    }
}

/// A compiled function: parameters bind as locals around `body`.
#[derive(Debug)]
pub struct CompiledFn {
    pub params: Vec<Arc<str>>,
    pub body: Expr,
}

impl CompiledFn {
    /// Zero-parameter function over an expression (offset, limit, join right).
    pub fn thunk(body: Expr) -> Arc<CompiledFn> {
        Arc::new(CompiledFn {
            params: Vec::new(),
            body,
        })
    }
}

pub enum Pattern {
    /// Constant pattern, compiled once, anchored to the whole string.
    Fixed(Regex),
    Dynamic(Expr),
}

pub enum ProjectStep {
    Field(String, Expr),
    Merge(Expr),
}

pub struct JoinArm {
    pub names: Vec<Arc<str>>,
    pub expr: Expr,
}

pub enum NodeKind {
    Const(Value),
    Local(Arc<str>),
    Slot(ValueId),

    Invoke {
        function: Arc<dyn Invocable>,
        args: Vec<Expr>,
    },
    Call {
        function: Arc<dyn Invocable>,
        args: Vec<Expr>,
    },
    /// Record built positionally from the fields of the node's struct type.
    New {
        args: Vec<Expr>,
    },

    /// Flattened IF/ELSE-IF chain.
    Case {
        branches: Vec<(Expr, Expr)>,
        otherwise: Expr,
    },
    Coalesce(Vec<Expr>),
    Catch {
        primary: Expr,
        fallback: Expr,
    },

    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Expr),
    Bool(Expr),
    IsNull(Expr),

    Eq(Expr, Expr),
    Neq(Expr, Expr),
    BoolCompare(Comparison, Expr, Expr),
    Compare(Expr, Expr),
    MultiCompare(Vec<Expr>),
    In {
        value: Expr,
        collection: Expr,
    },
    Matches {
        value: Expr,
        pattern: Pattern,
    },

    Math(ArithmeticOp, Expr, Expr),
    Negate(Expr),

    /// `checked` records are cast to the node's declared struct type.
    Record {
        names: Vec<String>,
        values: Vec<Expr>,
        checked: bool,
    },
    Project {
        steps: Vec<ProjectStep>,
        map: bool,
    },
    Array(Vec<Expr>),
    Index {
        target: Expr,
        index: Expr,
        default: Option<Expr>,
    },
    Prop {
        target: Expr,
        name: String,
        default: Option<Expr>,
    },
    Concat(Vec<Expr>),
    First(Expr),
    Length(Expr),
    Singleton(Expr),
    Foreach {
        input: Expr,
        function: Arc<CompiledFn>,
    },
    Cast(Expr),
    Serialize(Expr),
    Deserialize(Expr),
    GenerateKeys {
        names: Vec<String>,
        values: Vec<Expr>,
    },

    RootContext,
    CurrentContext,
    TraceContext {
        names: Vec<String>,
        values: Vec<Expr>,
    },
    TimeoutMax {
        amount: Expr,
        unit: TimeUnit,
    },
    TimeoutGuard {
        min: Expr,
        min_unit: TimeUnit,
        max: Expr,
        max_unit: TimeUnit,
    },
    TimeoutRemaining(TimeUnit),
    EndContext(Expr),
    WithContext {
        context: Expr,
        body: Expr,
    },
    Enforce {
        captures: Vec<Arc<str>>,
        body: Expr,
    },
    Resolve(Expr),

    StreamExecute {
        input: Expr,
        stream: Arc<CompiledStream>,
    },
    StreamCreate {
        stream: Arc<CompiledStream>,
    },
    StreamComplete {
        stream: Expr,
        inputs: Vec<Expr>,
    },

    Join {
        arms: Vec<JoinArm>,
        body: Expr,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Const(_) => "const",
            NodeKind::Local(_) => "local",
            NodeKind::Slot(_) => "slot",
            NodeKind::Invoke { .. } => "invoke",
            NodeKind::Call { .. } => "call",
            NodeKind::New { .. } => "new",
            NodeKind::Case { .. } => "case",
            NodeKind::Coalesce(_) => "coalesce",
            NodeKind::Catch { .. } => "catch",
            NodeKind::And(_) => "and",
            NodeKind::Or(_) => "or",
            NodeKind::Not(_) => "not",
            NodeKind::Bool(_) => "bool",
            NodeKind::IsNull(_) => "is_null",
            NodeKind::Eq(..) => "eq",
            NodeKind::Neq(..) => "neq",
            NodeKind::BoolCompare(..) => "boolean_compare",
            NodeKind::Compare(..) => "compare",
            NodeKind::MultiCompare(_) => "multi_compare",
            NodeKind::In { .. } => "in",
            NodeKind::Matches { .. } => "matches",
            NodeKind::Math(..) => "binary_math",
            NodeKind::Negate(_) => "negate",
            NodeKind::Record { .. } => "record",
            NodeKind::Project { .. } => "project",
            NodeKind::Array(_) => "array",
            NodeKind::Index { .. } => "index",
            NodeKind::Prop { .. } => "prop_ref",
            NodeKind::Concat(_) => "concat",
            NodeKind::First(_) => "first",
            NodeKind::Length(_) => "length",
            NodeKind::Singleton(_) => "singleton",
            NodeKind::Foreach { .. } => "foreach",
            NodeKind::Cast(_) => "cast",
            NodeKind::Serialize(_) => "serialize",
            NodeKind::Deserialize(_) => "deserialize",
            NodeKind::GenerateKeys { .. } => "generate_keys",
            NodeKind::RootContext => "root_context",
            NodeKind::CurrentContext => "current_context",
            NodeKind::TraceContext { .. } => "trace_context",
            NodeKind::TimeoutMax { .. } => "timeout_max",
            NodeKind::TimeoutGuard { .. } => "timeout_guard",
            NodeKind::TimeoutRemaining(_) => "timeout_remaining",
            NodeKind::EndContext(_) => "end_context",
            NodeKind::WithContext { .. } => "with_context",
            NodeKind::Enforce { .. } => "enforce_timeout",
            NodeKind::Resolve(_) => "resolve",
            NodeKind::StreamExecute { .. } => "stream_execute",
            NodeKind::StreamCreate { .. } => "stream_create",
            NodeKind::StreamComplete { .. } => "stream_complete",
            NodeKind::Join { .. } => "join",
        }
    }
}

/// One compiled stage; functions are bound to a frame when the pipeline is
/// built for a run.
#[derive(Debug)]
pub enum CompiledStage {
    Transform(Arc<CompiledFn>),
    Filter(Arc<CompiledFn>),
    Distinct,
    Flatten,
    Resolve,
    Slice {
        offset: Option<Arc<CompiledFn>>,
        limit: Option<Arc<CompiledFn>>,
    },
    OrderBy(Arc<CompiledFn>),
    GroupBy {
        key: Arc<CompiledFn>,
        output: Arc<CompiledFn>,
    },
    Cross {
        right: Arc<CompiledFn>,
        output: Arc<CompiledFn>,
    },
    HashJoin {
        kind: JoinKind,
        right: Arc<CompiledFn>,
        left_key: Arc<CompiledFn>,
        right_key: Arc<CompiledFn>,
        output: Arc<CompiledFn>,
    },
    Scatter(Arc<CompiledFn>),
}

#[derive(Debug)]
pub enum CompiledSink {
    Accumulate,
    /// Target expression evaluates to a stream handle.
    Stream(Expr),
}

#[derive(Debug)]
pub struct CompiledStream {
    pub input_type: DataType,
    pub stages: Vec<CompiledStage>,
    pub sink: CompiledSink,
    /// What running the pipeline yields: a list for accumulate, void for
    /// a stream sink.
    pub result_type: DataType,
}
