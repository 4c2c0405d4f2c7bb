#![forbid(unsafe_code)]
//! plexus-exec: compiler, evaluator and runtime for physical programs.
//!
//! Design intent:
//! - Compilation is the only place type and operator errors surface; a
//!   compiled program never fails for structural reasons at run time.
//! - Expressions lower to a small typed IR that a tree-walking async
//!   evaluator runs. Stream plans lower to `plexus-operators` stage chains.
//! - Every invocation reports each declared output exactly once and then
//!   ends, whether or not the run aborts.
//! - Concurrency (async calls, scatter, join producers) goes through one
//!   bounded `Scheduler`; deadlines come from the `TaskContext` tree.

pub mod compile;
pub mod context;
pub mod error;
pub mod eval;
pub mod frame;
pub mod functions;
pub mod handler;
pub mod ir;
pub mod join;
pub mod metrics;
pub mod program;
pub mod runtime;
pub mod scheduler;
pub mod stream;

pub use compile::{compile_program, Compiler, Scope};
pub use context::TaskContext;
pub use error::{CompileError, ExecError};
pub use functions::{FunctionRegistry, Invocable};
pub use handler::{CollectingHandler, HandlerEvent, ResultHandler};
pub use program::CompiledProgram;
pub use runtime::Engine;
pub use scheduler::Scheduler;
pub use stream::StreamHandle;
