//! Join stages: hash join (inner/outer) against a materialized right side,
//! and cross join against a per-row right-hand collection.

pub mod cross;
pub mod hash;

pub use cross::Cross;
pub use hash::{HashJoin, JoinKind};
