//! Convenient re-exports for downstream crates.

pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::hash::Hash256;
pub use crate::id::{InvocationId, ValueId};
pub use crate::location::Location;
pub use crate::ops::{ArithmeticOp, Comparison};
pub use crate::schema::{DataType, Field};
pub use crate::time::TimeUnit;
pub use crate::types::{AsyncValue, Opaque, Record, Value};
