#![forbid(unsafe_code)]
//! plexus-plan: the physical operator vocabulary handed to the executor.
//!
//! Design intent:
//! - Expression operators and stream stages are closed sum types; every
//!   consumer matches them exhaustively.
//! - Intermediate values live in an arena keyed by `ValueId`. A value is
//!   unnamed until first referenced, then receives a generated unique name.
//! - Programs are plain serde data so the CLI and tests can load them from
//!   YAML (or JSON) documents; `validate` enforces the structural invariants
//!   (write-once slots, unique names, ordered reads) before compilation.
//!
//! NOTE: no runtime here. Type checking and lowering happen in plexus-exec.

pub mod builder;
pub mod dsl;
pub mod error;
pub mod expr;
pub mod physical;
pub mod stream;
pub mod validate;

pub use builder::ProgramBuilder;
pub use dsl::yaml::{parse_program, parse_yaml_program};
pub use error::PlanError;
pub use expr::{ExprNode, ExprOp, Function, JoinInput, ProjectOp};
pub use physical::{ArgumentDecl, OutputDecl, PhysicalProgram, Step, ValueDecl, ValueTable};
pub use stream::{SinkOp, StreamNode, StreamOp, StreamPlan};
pub use validate::validate;
