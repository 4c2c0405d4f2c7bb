use thiserror::Error;

use plexus_core::error::Error;
use plexus_core::id::ValueId;
use plexus_core::location::Location;
use plexus_plan::PlanError;

/// Fatal, compile-time problems with an operator tree. Never raised while a
/// compiled program runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("{loc}: unsupported operator '{op}': {reason}")]
    UnsupportedOperator {
        loc: Location,
        op: &'static str,
        reason: String,
    },

    #[error("{loc}: cannot unify {left} and {right} in '{op}'")]
    TypeUnification {
        loc: Location,
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("{loc}: unknown local '{name}'")]
    UnknownLocal { loc: Location, name: String },

    #[error("{loc}: unknown {value}")]
    UnknownValue { loc: Location, value: ValueId },

    #[error("{loc}: unknown function '{name}'")]
    UnknownFunction { loc: Location, name: String },

    #[error("{loc}: unknown type '{name}'")]
    UnknownType { loc: Location, name: String },

    #[error("{loc}: '{op}' expects {expected} argument(s), found {found}")]
    Arity {
        loc: Location,
        op: String,
        expected: usize,
        found: usize,
    },

    #[error("{loc}: invalid argument to '{op}': {reason}")]
    InvalidArgument {
        loc: Location,
        op: &'static str,
        reason: String,
    },
}

impl CompileError {
    pub fn location(&self) -> Location {
        match self {
            CompileError::UnsupportedOperator { loc, .. }
            | CompileError::TypeUnification { loc, .. }
            | CompileError::UnknownLocal { loc, .. }
            | CompileError::UnknownValue { loc, .. }
            | CompileError::UnknownFunction { loc, .. }
            | CompileError::UnknownType { loc, .. }
            | CompileError::Arity { loc, .. }
            | CompileError::InvalidArgument { loc, .. } => *loc,
        }
    }
}

/// Errors at the engine boundary.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Run(#[from] Error),
}
