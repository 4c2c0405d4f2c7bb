#![forbid(unsafe_code)]
//! plexus: physical-program compiler and execution core.
//!
//! Re-exports the workspace crates under one name for embedders and the
//! benchmarks.

pub use plexus_core as core;
pub use plexus_exec as exec;
pub use plexus_operators as operators;
pub use plexus_plan as plan;

pub use plexus_exec::{CollectingHandler, CompiledProgram, Engine, ResultHandler};
pub use plexus_plan::{parse_program, PhysicalProgram, ProgramBuilder};
