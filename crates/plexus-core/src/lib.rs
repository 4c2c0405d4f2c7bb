#![forbid(unsafe_code)]
//! plexus-core: values, data types, strongly-typed ids, errors, config, hashing.
//!
//! Design intent:
//! - Everything here is plain data shared by the planner vocabulary, the stream
//!   stages, and the executor. No runtime, no I/O.
//! - `Value` is the single dynamic representation flowing through compiled
//!   programs; `DataType` is its static counterpart used by the compiler.
//! - Value-level semantics (arithmetic promotion, null-aware comparison, casts)
//!   live in `ops` so that every layer agrees on them.

pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod location;
pub mod ops;
pub mod schema;
pub mod time;
pub mod types;

pub mod prelude;

pub use error::{Error, Result};
pub use schema::DataType;
pub use types::Value;
