#![forbid(unsafe_code)]
//! plexus-operators: stream stages with a prepare/item/end lifecycle.
//!
//! Design intent:
//! - Every stage owns its downstream stage; a pipeline is a chain of boxed
//!   `Stage`s closed by a sink (accumulate or push-to-target).
//! - Stages never evaluate expressions themselves. Per-row computations come
//!   in as `RowFunction`s and runtime services (await, scatter) through
//!   `TaskRuntime`; both are implemented by plexus-exec.
//! - Streaming stages forward items as they arrive. Order-by, group-by,
//!   scatter and the right side of hash joins are materialization barriers.

pub mod traits;

pub mod filter;
pub mod group;
pub mod map;
pub mod pipeline;
pub mod scatter;
pub mod sink;
pub mod skip_nulls;
pub mod slice;

pub mod join;
pub mod sort;

pub use pipeline::Pipeline;
pub use sink::{Accumulate, StreamSink, StreamTarget};
pub use traits::{Flow, OpError, RowFn, RowFunction, Stage, TaskRuntime};
