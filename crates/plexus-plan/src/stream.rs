//! Stream stage vocabulary: a linear chain of stages closed by one sink.

use serde::{Deserialize, Serialize};

use plexus_core::location::Location;

use crate::expr::{ExprNode, Function};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamPlan {
    #[serde(default)]
    pub stages: Vec<StreamNode>,
    #[serde(default)]
    pub sink: SinkOp,
}

impl StreamPlan {
    pub fn new(stages: Vec<StreamNode>) -> Self {
        Self {
            stages,
            sink: SinkOp::Accumulate,
        }
    }

    pub fn with_sink(mut self, sink: SinkOp) -> Self {
        self.sink = sink;
        self
    }

    /// Expressions nested in stage arguments and the sink, in chain order.
    pub fn children(&self) -> Vec<&ExprNode> {
        let mut out: Vec<&ExprNode> = self.stages.iter().flat_map(|s| s.op.children()).collect();
        if let SinkOp::Stream { target } = &self.sink {
            out.push(target);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamNode {
    #[serde(flatten)]
    pub op: StreamOp,
    #[serde(default, skip_serializing_if = "Location::is_none")]
    pub loc: Location,
}

impl StreamNode {
    pub fn new(op: StreamOp) -> Self {
        Self {
            op,
            loc: Location::NONE,
        }
    }
}

impl From<StreamOp> for StreamNode {
    fn from(op: StreamOp) -> Self {
        StreamNode::new(op)
    }
}

/// One transform stage. Functions receive the row as their first parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StreamOp {
    Transform {
        function: Function,
    },
    Filter {
        predicate: Function,
    },
    Distinct,
    Flatten,
    Resolve,
    Offset {
        offset: ExprNode,
    },
    Limit {
        limit: ExprNode,
    },
    Slice {
        offset: ExprNode,
        limit: ExprNode,
    },
    /// `comparator(a, b)` returns a negative, zero or positive integer.
    OrderBy {
        comparator: Function,
    },
    /// `output(key, rows)` produces one row per distinct key.
    GroupBy {
        key: Function,
        output: Function,
    },
    /// `right(left)` yields the collection to pair with each left row;
    /// `output(left, right)` yields the rows to forward for that pair.
    Cross {
        right: Function,
        output: Function,
    },
    HashJoin {
        right: ExprNode,
        left_key: Function,
        right_key: Function,
        output: Function,
    },
    OuterHashJoin {
        right: ExprNode,
        left_key: Function,
        right_key: Function,
        output: Function,
    },
    Scatter {
        function: Function,
    },
}

impl StreamOp {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamOp::Transform { .. } => "transform",
            StreamOp::Filter { .. } => "filter",
            StreamOp::Distinct => "distinct",
            StreamOp::Flatten => "flatten",
            StreamOp::Resolve => "resolve",
            StreamOp::Offset { .. } => "offset",
            StreamOp::Limit { .. } => "limit",
            StreamOp::Slice { .. } => "slice",
            StreamOp::OrderBy { .. } => "order_by",
            StreamOp::GroupBy { .. } => "group_by",
            StreamOp::Cross { .. } => "cross",
            StreamOp::HashJoin { .. } => "hash_join",
            StreamOp::OuterHashJoin { .. } => "outer_hash_join",
            StreamOp::Scatter { .. } => "scatter",
        }
    }

    pub fn children(&self) -> Vec<&ExprNode> {
        match self {
            StreamOp::Transform { function } | StreamOp::Scatter { function } => {
                vec![&*function.body]
            }
            StreamOp::Filter { predicate } => vec![&*predicate.body],
            StreamOp::Distinct | StreamOp::Flatten | StreamOp::Resolve => Vec::new(),
            StreamOp::Offset { offset } => vec![offset],
            StreamOp::Limit { limit } => vec![limit],
            StreamOp::Slice { offset, limit } => vec![offset, limit],
            StreamOp::OrderBy { comparator } => vec![&*comparator.body],
            StreamOp::GroupBy { key, output } => vec![&*key.body, &*output.body],
            StreamOp::Cross { right, output } => vec![&*right.body, &*output.body],
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
            } => vec![right, &*left_key.body, &*right_key.body, &*output.body],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkOp {
    /// Materialize every item into a list.
    #[default]
    Accumulate,
    /// Push each item into a stream handle as it arrives.
    Stream { target: Box<ExprNode> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_defaults_to_accumulate() {
        let plan: StreamPlan =
            serde_json::from_str(r#"{"stages": [{"stage": "distinct"}]}"#).expect("parse");
        assert_eq!(plan.sink, SinkOp::Accumulate);
        assert_eq!(plan.stages[0].op.kind(), "distinct");
    }

    #[test]
    fn test_stream_sink_nests_inside_stream_execute() {
        use crate::dsl::build::*;

        let inner = stream(vec![stage::distinct()]).with_sink(stream_to(local("out")));
        let outer = stream_execute(constant(vec![1i64, 2]), inner.clone());
        assert_eq!(inner.children().len(), 1);
        assert_eq!(inner.children()[0].kind(), "local");

        let json = serde_json::to_string(&outer).expect("serialize");
        let back: ExprNode = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, outer);
    }
}
